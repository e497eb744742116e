use crate::encoder::command_builder::{ConvertParams, build_ffmpeg_args};
use crate::error::ConvertError;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::info;

/// Convert a video file using FFmpeg, blocking until it exits.
///
/// stderr is forwarded line by line to stdout while the process runs so the
/// pipe never fills up. A successful return does not prove the output exists.
pub fn convert_video(ffmpeg: &Path, params: &ConvertParams) -> Result<(), ConvertError> {
    let args = build_ffmpeg_args(params);

    info!(
        "Encoding: {} -> {} (qscale {}, {})",
        params.input.display(),
        params.output.display(),
        params.quality_scale,
        params.resolution
    );

    let mut child = Command::new(ffmpeg)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| ConvertError::Launch {
            binary: ffmpeg.to_path_buf(),
            source,
        })?;

    if let Some(stderr) = child.stderr.take() {
        forward_lines(stderr, std::io::stdout());
    }

    let status = child.wait().map_err(ConvertError::Wait)?;
    if !status.success() {
        return Err(ConvertError::Exit(status));
    }

    Ok(())
}

/// Copy every line of `reader` to `out` until EOF.
///
/// Lines are split on `\n` and decoded lossily; a failing writer does not
/// stop the draining.
fn forward_lines<R: Read, W: Write>(reader: R, mut out: W) {
    let reader = BufReader::new(reader);
    for line in reader.split(b'\n').map_while(Result::ok) {
        let _ = writeln!(out, "{}", String::from_utf8_lossy(&line).trim_end_matches('\r'));
    }
    let _ = out.flush();
}
