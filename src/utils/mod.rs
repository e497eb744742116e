pub mod deps;
pub mod logger;

pub use deps::check_transcoder;
pub use logger::init_logging;
