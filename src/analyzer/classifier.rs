use crate::config::QualityConfig;
use std::path::Path;

/// Encoder quality level, chosen from the source width
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityLevel {
    High,
    Middle,
    Low,
}

impl QualityLevel {
    /// Widths at or above this encode with the high quality scale
    pub const HIGH_MIN_WIDTH: u32 = 1440;
    /// Widths at or below this encode with the low quality scale
    pub const LOW_MAX_WIDTH: u32 = 848;

    /// Classify a source width; an unknown width is treated as middle
    pub fn select(width: Option<u32>) -> Self {
        match width {
            Some(w) if w >= Self::HIGH_MIN_WIDTH => QualityLevel::High,
            Some(w) if w <= Self::LOW_MAX_WIDTH => QualityLevel::Low,
            _ => QualityLevel::Middle,
        }
    }

    /// The configured `-qscale` value for this level
    pub fn scale(&self, config: &QualityConfig) -> u32 {
        match self {
            QualityLevel::High => config.high,
            QualityLevel::Middle => config.middle,
            QualityLevel::Low => config.low,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            QualityLevel::High => "high",
            QualityLevel::Middle => "middle",
            QualityLevel::Low => "low",
        }
    }
}

impl std::fmt::Display for QualityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// How a source container can be handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatClass {
    /// ffmpeg reads it directly
    Native,
    /// Needs another tool (e.g. mencoder) to produce an avi first
    NeedsIntermediate,
    Unknown,
}

impl FormatClass {
    const NATIVE_EXTENSIONS: [&'static str; 9] =
        ["avi", "mpg", "wmv", "3gp", "mov", "mp4", "asf", "asx", "flv"];
    const INTERMEDIATE_EXTENSIONS: [&'static str; 3] = ["wmv9", "rm", "rmvb"];

    /// Classify a file by its extension, case-insensitively
    pub fn classify(path: &str) -> Self {
        let ext = match Path::new(path).extension().and_then(|e| e.to_str()) {
            Some(e) => e.to_lowercase(),
            None => return FormatClass::Unknown,
        };

        if Self::NATIVE_EXTENSIONS.contains(&ext.as_str()) {
            FormatClass::Native
        } else if Self::INTERMEDIATE_EXTENSIONS.contains(&ext.as_str()) {
            FormatClass::NeedsIntermediate
        } else {
            FormatClass::Unknown
        }
    }

    /// Only natively readable sources are converted by this daemon
    pub fn is_convertible(&self) -> bool {
        matches!(self, FormatClass::Native)
    }
}
