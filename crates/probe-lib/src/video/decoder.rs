use super::hardware::HardwareContext;
use super::pixfmt::{format_list, format_name, is_hardware_format};
use ffmpeg_next::codec::Context;
use ffmpeg_next::ffi::{
    av_buffer_ref, avcodec_get_hw_config, AVCodecContext, AVHWDeviceType, AVPixelFormat,
    AV_CODEC_HW_CONFIG_METHOD_HW_DEVICE_CTX,
};
use ffmpeg_next::frame::Video;
use ffmpeg_next::util::error::EAGAIN;
use ffmpeg_next::{codec, format, media, Codec, Packet, Rational};
use log::{debug, info, warn};
use probe_types::ProbeError;
use std::path::Path;
use std::sync::Arc;

/// Read by `select_hw_format` through the codec context's opaque pointer.
#[repr(C)]
pub(super) struct HwFormatState {
    pub(super) pix_fmt: AVPixelFormat,
}

/// Prefers the device format; otherwise takes the first software format so a
/// stream the hardware cannot handle still decodes.
pub(super) unsafe extern "C" fn select_hw_format(
    ctx: *mut AVCodecContext,
    pix_fmts: *const AVPixelFormat,
) -> AVPixelFormat {
    let state = (*ctx).opaque as *const HwFormatState;
    let offered = format_list(pix_fmts);

    if !state.is_null() && offered.contains(&(*state).pix_fmt) {
        return (*state).pix_fmt;
    }
    offered
        .into_iter()
        .find(|f| !is_hardware_format(*f))
        .unwrap_or(AVPixelFormat::AV_PIX_FMT_NONE)
}

/// Device-backed pixel format the codec can decode into, if any.
fn codec_hw_format(codec: &Codec, device_type: AVHWDeviceType) -> Option<AVPixelFormat> {
    let mut i = 0;
    loop {
        let config = unsafe { avcodec_get_hw_config(codec.as_ptr(), i) };
        if config.is_null() {
            return None;
        }
        let config = unsafe { &*config };
        if (config.methods & AV_CODEC_HW_CONFIG_METHOD_HW_DEVICE_CTX as i32) != 0
            && config.device_type == device_type
        {
            return Some(config.pix_fmt);
        }
        i += 1;
    }
}

fn ffmpeg_error(context: &'static str) -> impl Fn(ffmpeg_next::Error) -> ProbeError {
    move |e| ProbeError::FFmpeg(format!("{}: {}", context, e))
}

/// Decoder for the best video stream of a file, optionally bound to a GPU
/// device.
///
/// The output pixel format is only settled once the first frame has gone
/// through `get_format`, so callers probe with one packet before relying on
/// `pixel_format`.
pub struct ProbeDecoder {
    decoder: codec::decoder::Video,
    // Must outlive `decoder`, which points at it.
    hw_state: Option<Box<HwFormatState>>,
    input_context: format::context::Input,
    video_stream_index: usize,
    frame_rate: Rational,
    path: String,
    eof_sent: bool,
}

impl ProbeDecoder {
    pub fn open(
        input_path: &Path,
        device: Option<Arc<HardwareContext>>,
    ) -> Result<Self, ProbeError> {
        let path = input_path.display().to_string();
        let utf8_path = input_path.to_str().ok_or_else(|| ProbeError::OpenInput {
            path: path.clone(),
            reason: "path is not valid UTF-8".to_string(),
        })?;
        let input_context =
            format::input(&utf8_path).map_err(|e| ProbeError::OpenInput {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        let (video_stream_index, frame_rate, mut decoder_context) = {
            let stream = input_context
                .streams()
                .best(media::Type::Video)
                .ok_or_else(|| ProbeError::NoVideoStream(path.clone()))?;
            let context = Context::from_parameters(stream.parameters())
                .map_err(ffmpeg_error("Error using codec parameters"))?;
            let rate = stream.avg_frame_rate();
            let rate = if rate.numerator() > 0 && rate.denominator() > 0 {
                rate
            } else {
                Rational::new(25, 1)
            };
            (stream.index(), rate, context)
        };

        let codec = ffmpeg_next::decoder::find(decoder_context.id())
            .ok_or_else(|| ProbeError::DecoderNotFound(format!("{:?}", decoder_context.id())))?;
        let codec_name = codec.name().to_string();

        let mut hw_state = None;
        if let Some(device) = device {
            match codec_hw_format(&codec, device.device_type()) {
                Some(pix_fmt) => {
                    let state = Box::new(HwFormatState { pix_fmt });
                    unsafe {
                        let ctx = decoder_context.as_mut_ptr();
                        let hw_ref = av_buffer_ref(device.as_ptr());
                        if hw_ref.is_null() {
                            return Err(ProbeError::FFmpeg(
                                "Failed to reference hardware context".to_string(),
                            ));
                        }
                        (*ctx).hw_device_ctx = hw_ref;
                        (*ctx).opaque =
                            &*state as *const HwFormatState as *mut std::ffi::c_void;
                        (*ctx).get_format = Some(select_hw_format);
                    }
                    debug!(
                        "Bound {} device to {} decoder ({})",
                        device.name(),
                        codec_name,
                        format_name(pix_fmt)
                    );
                    hw_state = Some(state);
                }
                None => warn!(
                    "{} has no {} hardware config, decoding in software",
                    codec_name,
                    device.name()
                ),
            }
        }

        let decoder = decoder_context
            .decoder()
            .open_as(codec)
            .and_then(|opened| opened.video())
            .map_err(ffmpeg_error("Error opening decoder"))?;

        info!(
            "Opened {} decoder for stream {} of {} ({}x{})",
            codec_name,
            video_stream_index,
            path,
            decoder.width(),
            decoder.height()
        );

        Ok(Self {
            decoder,
            hw_state,
            input_context,
            video_stream_index,
            frame_rate,
            path,
            eof_sent: false,
        })
    }

    /// Next packet of the selected stream, `None` at end of file.
    pub fn read_packet(&mut self) -> Result<Option<Packet>, ProbeError> {
        loop {
            let mut packet = Packet::empty();
            match packet.read(&mut self.input_context) {
                Ok(()) => {
                    if packet.stream() == self.video_stream_index {
                        return Ok(Some(packet));
                    }
                }
                Err(ffmpeg_next::Error::Eof) => return Ok(None),
                Err(e) => return Err(ffmpeg_error("Error reading packet")(e)),
            }
        }
    }

    /// Submits `packet` (or end of stream for `None`) and drains every frame
    /// the decoder has ready.
    pub fn decode(&mut self, packet: Option<&Packet>) -> Result<Vec<Video>, ProbeError> {
        match packet {
            Some(packet) => self
                .decoder
                .send_packet(packet)
                .map_err(ffmpeg_error("Error submitting a packet for decoding"))?,
            None if self.eof_sent => {}
            None => {
                self.decoder
                    .send_eof()
                    .map_err(ffmpeg_error("Error flushing decoder"))?;
                self.eof_sent = true;
            }
        }

        let mut frames = Vec::new();
        loop {
            let mut frame = Video::empty();
            match self.decoder.receive_frame(&mut frame) {
                Ok(()) => frames.push(frame),
                Err(ffmpeg_next::Error::Eof) => break,
                Err(ffmpeg_next::Error::Other { errno }) if errno == EAGAIN => break,
                Err(e) => return Err(ffmpeg_error("Error during decoding")(e)),
            }
        }
        Ok(frames)
    }

    pub fn pixel_format(&self) -> AVPixelFormat {
        unsafe { (*self.decoder.as_ptr()).pix_fmt }
    }

    pub fn hardware_decoding(&self) -> bool {
        is_hardware_format(self.pixel_format())
    }

    pub fn width(&self) -> u32 {
        self.decoder.width()
    }

    pub fn height(&self) -> u32 {
        self.decoder.height()
    }

    pub fn frame_rate(&self) -> Rational {
        self.frame_rate
    }

    pub fn dump_format(&self) {
        format::context::input::dump(&self.input_context, 0, Some(&self.path));
    }
}

impl Drop for ProbeDecoder {
    fn drop(&mut self) {
        if self.hw_state.is_some() {
            unsafe {
                if let Some(ctx) = self.decoder.as_mut_ptr().as_mut() {
                    ctx.opaque = std::ptr::null_mut();
                }
            }
        }
    }
}
