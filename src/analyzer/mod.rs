pub mod classifier;
pub mod probe;

pub use classifier::{FormatClass, QualityLevel};
pub use probe::{MediaInfo, probe};
