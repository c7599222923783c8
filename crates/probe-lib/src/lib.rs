pub mod probe;
pub mod video;

use ffmpeg_next as ffmpeg;
use ffmpeg_next::util::log::Level;
use probe_types::ProbeError;

pub use probe::run_probe;
pub use probe_types;

pub fn init() -> Result<(), ProbeError> {
    ffmpeg::init().map_err(|e| ProbeError::FFmpeg(e.to_string()))
}

/// Sets FFmpeg's own verbosity and installs the `log` backend.
pub fn init_logging(ffmpeg_level: Level) {
    ffmpeg::util::log::set_level(ffmpeg_level);
    let _ = pretty_env_logger::try_init();
}

pub fn parse_ffmpeg_log_level(name: &str) -> Result<Level, ProbeError> {
    match name.to_ascii_lowercase().as_str() {
        "quiet" => Ok(Level::Quiet),
        "panic" => Ok(Level::Panic),
        "fatal" => Ok(Level::Fatal),
        "error" => Ok(Level::Error),
        "warning" | "warn" => Ok(Level::Warning),
        "info" => Ok(Level::Info),
        "verbose" => Ok(Level::Verbose),
        "debug" => Ok(Level::Debug),
        "trace" => Ok(Level::Trace),
        other => Err(ProbeError::InvalidOption(format!(
            "unknown FFmpeg log level '{}'",
            other
        ))),
    }
}
