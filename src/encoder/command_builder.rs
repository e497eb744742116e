use crate::config::OutputResolution;
use std::ffi::OsString;
use std::path::PathBuf;

/// Parameters for one conversion
#[derive(Debug, Clone)]
pub struct ConvertParams {
    pub input: PathBuf,
    pub output: PathBuf,
    pub quality_scale: u32,
    pub audio_sample_rate: u32,
    pub resolution: OutputResolution,
}

/// Build FFmpeg arguments for a conversion
pub fn build_ffmpeg_args(params: &ConvertParams) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-y".into(),
        "-nostdin".into(),
        "-i".into(),
        params.input.clone().into_os_string(),
    ];

    args.extend([
        "-qscale".into(),
        params.quality_scale.to_string().into(),
        "-ar".into(),
        params.audio_sample_rate.to_string().into(),
        "-s".into(),
        params.resolution.ffmpeg_size().into(),
    ]);

    args.push(params.output.clone().into_os_string());
    args
}
