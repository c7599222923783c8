//! FFmpeg glue for the probe: decoding with an optional GPU device, uploading
//! software frames into device memory, and re-encoding.
//!
//! Device contexts are shared via Arc so the decoder and the upload path can
//! hold the same device.

mod codec_options;
mod decoder;
mod encoder;
mod hardware;
mod pixfmt;
mod snapshot;
#[cfg(test)]
mod tests;

pub use codec_options::{encoder_private_options, EncoderOption, EncoderOptions, OptionKind};
pub use decoder::ProbeDecoder;
pub use encoder::ProbeEncoder;
pub use hardware::{
    available_device_types, device_type_name, download, parse_device_type, HardwareContext,
    HardwareFrames,
};
pub use pixfmt::{fallback_hw_format, format_name, is_hardware_format, remap_sw_format};
pub use snapshot::save_png;
