use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Frames decoded by a probe run unless told otherwise.
pub const DEFAULT_MAX_FRAMES: usize = 1000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("{0}")]
    FFmpeg(String),

    #[error("Error opening input file {path}: {reason}")]
    OpenInput { path: String, reason: String },

    #[error("Error creating output file {path}: {reason}")]
    OpenOutput { path: String, reason: String },

    #[error("Error finding video stream for file: {0}")]
    NoVideoStream(String),

    #[error("No decoder available for {0}")]
    DecoderNotFound(String),

    #[error("Unknown hardware device type: {0}")]
    UnknownDeviceType(String),

    #[error("Error creating {device_type} device: {reason}")]
    HardwareDevice { device_type: String, reason: String },

    #[error("Error creating frames context: {0}")]
    HardwareFrames(String),

    #[error("Encoder not found: {0}")]
    EncoderNotFound(String),

    #[error("Encoder cannot take these frames: {0}")]
    EncoderInput(String),

    #[error("Decoder produced no frames after {0} consecutive packets")]
    Stalled(usize),

    #[error("No frames to process: {0}")]
    NoFrames(String),

    #[error("Image error: {0}")]
    Image(String),

    #[error("Invalid option: {0}")]
    InvalidOption(String),
}

/// Where the probe loop gets its packets from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PacketSource {
    /// Resubmit the first video packet on every iteration.
    #[default]
    Repeat,
    /// Read successive packets and flush the decoder at end of file.
    Stream,
}

impl FromStr for PacketSource {
    type Err = ProbeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "repeat" => Ok(PacketSource::Repeat),
            "stream" => Ok(PacketSource::Stream),
            other => Err(ProbeError::InvalidOption(format!(
                "packet source must be 'repeat' or 'stream', got '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for PacketSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketSource::Repeat => write!(f, "repeat"),
            PacketSource::Stream => write!(f, "stream"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProbeOptions {
    pub input: PathBuf,
    /// FFmpeg device type name; `None` runs without any GPU device.
    pub device_type: Option<String>,
    /// Device string handed to the device constructor as is.
    pub device: Option<String>,
    /// Bind the device to the decoder.
    pub hw_decode: bool,
    /// Upload software-decoded frames into GPU memory.
    pub upload: bool,
    pub max_frames: usize,
    pub packets: PacketSource,
    pub snapshot: Option<PathBuf>,
    pub dump_format: bool,
}

impl ProbeOptions {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            device_type: Some("vulkan".to_string()),
            device: None,
            hw_decode: false,
            upload: true,
            max_frames: DEFAULT_MAX_FRAMES,
            packets: PacketSource::Repeat,
            snapshot: None,
            dump_format: true,
        }
    }

    /// Software-only run: no device, no upload.
    pub fn software(input: impl Into<PathBuf>) -> Self {
        Self {
            device_type: None,
            upload: false,
            ..Self::new(input)
        }
    }
}

#[derive(Debug, Clone)]
pub struct EncodeOptions {
    pub encoder: String,
    pub output: PathBuf,
    pub bit_rate: Option<usize>,
    /// Private encoder options passed through to the codec.
    pub options: Vec<(String, String)>,
}

impl EncodeOptions {
    pub fn new(encoder: impl Into<String>, output: impl Into<PathBuf>) -> Self {
        Self {
            encoder: encoder.into(),
            output: output.into(),
            bit_rate: None,
            options: Vec::new(),
        }
    }
}

/// Parses a `key=value` pair as given on the command line.
pub fn parse_key_value(s: &str) -> Result<(String, String), ProbeError> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(ProbeError::InvalidOption(format!(
            "expected key=value, got '{}'",
            s
        ))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodePath {
    Hardware,
    Software,
}

impl fmt::Display for DecodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodePath::Hardware => write!(f, "Hardware decoding"),
            DecodePath::Software => write!(f, "Software decoding"),
        }
    }
}

/// Emitted once per decoded frame inside the timed loop.
#[derive(Debug, Clone)]
pub struct FrameProgress {
    /// 1-based count of frames decoded so far.
    pub index: usize,
    pub format_id: i32,
    pub format: String,
}

#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub decode_path: DecodePath,
    pub pixel_format: String,
    pub frames_decoded: usize,
    pub frames_uploaded: usize,
    pub frames_encoded: usize,
    pub packets_sent: usize,
    /// Muxed packets, including those flushed at the end.
    pub packets_written: usize,
    pub elapsed: Duration,
}

impl ProbeReport {
    pub fn frames_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.frames_decoded as f64 / secs
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_source_parses_case_insensitively() {
        assert_eq!("repeat".parse::<PacketSource>(), Ok(PacketSource::Repeat));
        assert_eq!("STREAM".parse::<PacketSource>(), Ok(PacketSource::Stream));
        assert!(matches!(
            "seek".parse::<PacketSource>(),
            Err(ProbeError::InvalidOption(_))
        ));
    }

    #[test]
    fn key_value_requires_a_key() {
        assert_eq!(
            parse_key_value("preset=fast").unwrap(),
            ("preset".to_string(), "fast".to_string())
        );
        assert_eq!(
            parse_key_value("x265-params=a=1:b=2").unwrap(),
            ("x265-params".to_string(), "a=1:b=2".to_string())
        );
        assert!(parse_key_value("=fast").is_err());
        assert!(parse_key_value("preset").is_err());
    }

    #[test]
    fn software_options_drop_the_device() {
        let opts = ProbeOptions::software("clip.mkv");
        assert!(opts.device_type.is_none());
        assert!(!opts.upload);
        assert_eq!(opts.max_frames, DEFAULT_MAX_FRAMES);
        assert_eq!(opts.packets, PacketSource::Repeat);
    }

    #[test]
    fn fps_handles_zero_elapsed() {
        let mut report = ProbeReport {
            decode_path: DecodePath::Software,
            pixel_format: "yuv420p".to_string(),
            frames_decoded: 500,
            frames_uploaded: 0,
            frames_encoded: 0,
            packets_sent: 500,
            packets_written: 0,
            elapsed: Duration::ZERO,
        };
        assert_eq!(report.frames_per_second(), 0.0);

        report.elapsed = Duration::from_millis(250);
        assert!((report.frames_per_second() - 2000.0).abs() < 1e-9);
    }

    #[test]
    fn errors_render_their_context() {
        let err = ProbeError::HardwareDevice {
            device_type: "vulkan".to_string(),
            reason: "Cannot allocate memory".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Error creating vulkan device: Cannot allocate memory"
        );
        assert_eq!(DecodePath::Hardware.to_string(), "Hardware decoding");
    }
}
