pub mod command_builder;
pub mod ffmpeg;

pub use command_builder::ConvertParams;
pub use ffmpeg::convert_video;

use crate::analyzer::{self, MediaInfo};
use crate::error::ConvertError;
use std::path::{Path, PathBuf};

/// External transcoder used by the worker
pub trait Transcode {
    /// Read media metadata; never fails, missing fields are empty
    fn probe(&self, input: &Path) -> MediaInfo;

    /// Re-encode `params.input` into `params.output`
    fn convert(&self, params: &ConvertParams) -> Result<(), ConvertError>;
}

/// The ffmpeg binary configured for this host
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    binary: PathBuf,
}

impl Ffmpeg {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Transcode for Ffmpeg {
    fn probe(&self, input: &Path) -> MediaInfo {
        analyzer::probe(&self.binary, input)
    }

    fn convert(&self, params: &ConvertParams) -> Result<(), ConvertError> {
        convert_video(&self.binary, params)
    }
}
