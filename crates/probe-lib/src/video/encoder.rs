use super::hardware::download;
use super::pixfmt::{format_name, is_hardware_format};
use ffmpeg_next::ffi::{
    av_buffer_ref, av_frame_ref, av_opt_find, AVCodecContext, AVHWFramesContext, AVPixelFormat,
    AV_OPT_SEARCH_CHILDREN,
};
use ffmpeg_next::format::Pixel;
use ffmpeg_next::frame::Video;
use ffmpeg_next::util::error::EAGAIN;
use ffmpeg_next::software::scaling;
use ffmpeg_next::{codec, encoder, format, Codec, Dictionary, Packet, Rational};
use log::{debug, info};
use probe_types::{EncodeOptions, ProbeError};
use std::ffi::CString;

fn ffmpeg_error(context: &'static str) -> impl Fn(ffmpeg_next::Error) -> ProbeError {
    move |e| ProbeError::FFmpeg(format!("{}: {}", context, e))
}

/// New frame sharing `frame`'s buffers.
fn reference(frame: &Video) -> Result<Video, ProbeError> {
    let mut out = Video::empty();
    let ret = unsafe { av_frame_ref(out.as_mut_ptr(), frame.as_ptr()) };
    if ret < 0 {
        return Err(ProbeError::FFmpeg(format!(
            "Error referencing frame: {}",
            ffmpeg_next::Error::from(ret)
        )));
    }
    Ok(out)
}

/// Software format the encoder should be fed for frames in `sw_format`.
///
/// `None` means the frames go in unconverted. Encoders that list only device
/// formats cannot take host frames at all.
pub(super) fn software_target(
    encoder: &str,
    sw_format: Pixel,
    supported: &[Pixel],
) -> Result<Option<Pixel>, ProbeError> {
    if supported.is_empty() || supported.contains(&sw_format) {
        return Ok(None);
    }
    match supported
        .iter()
        .find(|fmt| !is_hardware_format((**fmt).into()))
    {
        Some(target) => Ok(Some(*target)),
        None => Err(ProbeError::EncoderInput(format!(
            "{} only accepts device frames ({}), upload {} frames to a matching device first",
            encoder,
            supported
                .iter()
                .map(|fmt| format_name((*fmt).into()))
                .collect::<Vec<_>>()
                .join(", "),
            format_name(sw_format.into())
        ))),
    }
}

/// Keys neither the codec context nor the encoder's private class know.
fn unknown_options(ctx: *mut AVCodecContext, options: &[(String, String)]) -> Vec<String> {
    options
        .iter()
        .filter(|(key, _)| match CString::new(key.as_str()) {
            Ok(name) => unsafe {
                av_opt_find(
                    ctx as *mut std::ffi::c_void,
                    name.as_ptr(),
                    std::ptr::null(),
                    0,
                    AV_OPT_SEARCH_CHILDREN as i32,
                )
                .is_null()
            },
            Err(_) => true,
        })
        .map(|(key, _)| key.clone())
        .collect()
}

/// How decoded frames reach the encoder once it is open.
enum FrameInput {
    /// Frames are passed through as they are, device frames included.
    Direct,
    /// Device frames are downloaded, then optionally converted.
    Software(Option<scaling::Context>),
}

struct OpenEncoder {
    encoder: encoder::Video,
    input: FrameInput,
    stream_index: usize,
    time_base: Rational,
}

/// Re-encodes decoded (or uploaded) frames into a container file.
///
/// The encoder is configured from the first frame it sees. Timestamps are
/// assigned from a frame counter so repeated-packet runs still mux.
pub struct ProbeEncoder {
    codec: Codec,
    output_context: format::context::Output,
    frame_rate: Rational,
    bit_rate: Option<usize>,
    options: Vec<(String, String)>,
    opened: Option<OpenEncoder>,
    frame_count: i64,
    packets_written: usize,
}

impl ProbeEncoder {
    pub fn new(options: &EncodeOptions, frame_rate: Rational) -> Result<Self, ProbeError> {
        let codec = encoder::find_by_name(&options.encoder)
            .ok_or_else(|| ProbeError::EncoderNotFound(options.encoder.clone()))?;
        if codec.video().is_err() {
            return Err(ProbeError::EncoderNotFound(format!(
                "{} is not a video encoder",
                options.encoder
            )));
        }

        let output_path =
            options
                .output
                .to_str()
                .ok_or_else(|| ProbeError::OpenOutput {
                    path: options.output.display().to_string(),
                    reason: "path is not valid UTF-8".to_string(),
                })?;
        let output_context =
            format::output(&output_path).map_err(|e| ProbeError::OpenOutput {
                path: output_path.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            codec,
            output_context,
            frame_rate,
            bit_rate: options.bit_rate,
            options: options.options.clone(),
            opened: None,
            frame_count: 0,
            packets_written: 0,
        })
    }

    pub fn frames_encoded(&self) -> usize {
        self.frame_count as usize
    }

    pub fn packets_written(&self) -> usize {
        self.packets_written
    }

    fn supported_formats(&self) -> Vec<Pixel> {
        self.codec
            .video()
            .ok()
            .and_then(|video| video.formats().map(|formats| formats.collect()))
            .unwrap_or_default()
    }

    fn open(&mut self, frame: &Video) -> Result<(), ProbeError> {
        let frame_format: AVPixelFormat = frame.format().into();
        let supported = self.supported_formats();
        let accepts = |fmt: Pixel| supported.is_empty() || supported.contains(&fmt);

        let hw_direct = is_hardware_format(frame_format) && accepts(frame.format());
        let (encoder_format, input) = if hw_direct {
            (frame.format(), FrameInput::Direct)
        } else {
            let sw_format = if is_hardware_format(frame_format) {
                // Format after download.
                let hw_frames = unsafe { (*frame.as_ptr()).hw_frames_ctx };
                if hw_frames.is_null() {
                    return Err(ProbeError::FFmpeg(
                        "Hardware frame has no frames context".to_string(),
                    ));
                }
                let hwfc =
                    unsafe { (*hw_frames).data as *const AVHWFramesContext };
                Pixel::from(unsafe { (*hwfc).sw_format })
            } else {
                frame.format()
            };

            match software_target(self.codec.name(), sw_format, &supported)? {
                None => (sw_format, FrameInput::Software(None)),
                Some(target) => {
                    debug!(
                        "Converting {} to {} for {}",
                        format_name(sw_format.into()),
                        format_name(target.into()),
                        self.codec.name()
                    );
                    let scaler = scaling::Context::get(
                        sw_format,
                        frame.width(),
                        frame.height(),
                        target,
                        frame.width(),
                        frame.height(),
                        scaling::Flags::BILINEAR,
                    )
                    .map_err(ffmpeg_error("Error creating scaler"))?;
                    (target, FrameInput::Software(Some(scaler)))
                }
            }
        };

        let time_base = self.frame_rate.invert();
        let global_header = self
            .output_context
            .format()
            .flags()
            .contains(format::flag::Flags::GLOBAL_HEADER);

        let mut video = codec::context::Context::new_with_codec(self.codec)
            .encoder()
            .video()
            .map_err(ffmpeg_error("Error creating encoder context"))?;
        video.set_width(frame.width());
        video.set_height(frame.height());
        video.set_format(encoder_format);
        video.set_time_base(time_base);
        video.set_frame_rate(Some(self.frame_rate));
        if let Some(bit_rate) = self.bit_rate {
            video.set_bit_rate(bit_rate);
        }

        let unknown = unknown_options(unsafe { video.as_mut_ptr() }, &self.options);
        if !unknown.is_empty() {
            return Err(ProbeError::InvalidOption(format!(
                "{} does not recognise {}",
                self.codec.name(),
                unknown.join(", ")
            )));
        }

        unsafe {
            let ctx = video.as_mut_ptr();
            if global_header {
                (*ctx).flags |= codec::flag::Flags::GLOBAL_HEADER.bits() as i32;
            }
            if let FrameInput::Direct = input {
                let frames_ref = av_buffer_ref((*frame.as_ptr()).hw_frames_ctx);
                if frames_ref.is_null() {
                    return Err(ProbeError::FFmpeg(
                        "Failed to reference hardware frames context".to_string(),
                    ));
                }
                (*ctx).hw_frames_ctx = frames_ref;
            }
        }

        let mut dictionary = Dictionary::new();
        for (key, value) in &self.options {
            dictionary.set(key, value);
        }

        let encoder = video
            .open_as_with(self.codec, dictionary)
            .map_err(ffmpeg_error("Error opening encoder"))?;

        let stream_index = {
            let mut stream = self
                .output_context
                .add_stream(self.codec)
                .map_err(ffmpeg_error("Error adding output stream"))?;
            stream.set_parameters(&encoder);
            stream.set_time_base(time_base);
            stream.index()
        };
        self.output_context
            .write_header()
            .map_err(ffmpeg_error("Error writing header"))?;

        info!(
            "Encoding {}x{} {} with {}",
            frame.width(),
            frame.height(),
            format_name(encoder_format.into()),
            self.codec.name()
        );
        self.opened = Some(OpenEncoder {
            encoder,
            input,
            stream_index,
            time_base,
        });
        Ok(())
    }

    /// Opens the encoder for frames shaped like `frame` without encoding it.
    /// Later frames must match its size and format.
    pub fn prepare(&mut self, frame: &Video) -> Result<(), ProbeError> {
        if self.opened.is_none() {
            self.open(frame)?;
        }
        Ok(())
    }

    pub fn encode(&mut self, frame: &Video) -> Result<(), ProbeError> {
        self.prepare(frame)?;
        let opened = match self.opened.as_mut() {
            Some(opened) => opened,
            None => return Err(ProbeError::FFmpeg("Encoder is not open".to_string())),
        };

        let mut prepared = match &mut opened.input {
            FrameInput::Direct => reference(frame)?,
            FrameInput::Software(scaler) => {
                let sw_frame = if is_hardware_format(frame.format().into()) {
                    download(frame)?
                } else {
                    reference(frame)?
                };
                match scaler {
                    Some(scaler) => {
                        let mut converted = Video::empty();
                        scaler
                            .run(&sw_frame, &mut converted)
                            .map_err(ffmpeg_error("Error converting frame"))?;
                        converted
                    }
                    None => sw_frame,
                }
            }
        };
        prepared.set_pts(Some(self.frame_count));
        self.frame_count += 1;

        opened
            .encoder
            .send_frame(&prepared)
            .map_err(ffmpeg_error("Error submitting frame for encoding"))?;
        self.write_packets()
    }

    fn write_packets(&mut self) -> Result<(), ProbeError> {
        let opened = match self.opened.as_mut() {
            Some(opened) => opened,
            None => return Ok(()),
        };
        let stream_time_base = self
            .output_context
            .stream(opened.stream_index)
            .map(|stream| stream.time_base())
            .ok_or_else(|| ProbeError::FFmpeg("Output stream not found".to_string()))?;

        loop {
            let mut packet = Packet::empty();
            match opened.encoder.receive_packet(&mut packet) {
                Ok(()) => {
                    packet.set_stream(opened.stream_index);
                    packet.rescale_ts(opened.time_base, stream_time_base);
                    packet
                        .write_interleaved(&mut self.output_context)
                        .map_err(ffmpeg_error("Error writing packet"))?;
                    self.packets_written += 1;
                }
                Err(ffmpeg_next::Error::Eof) => return Ok(()),
                Err(ffmpeg_next::Error::Other { errno }) if errno == EAGAIN => return Ok(()),
                Err(e) => return Err(ffmpeg_error("Error during encoding")(e)),
            }
        }
    }

    /// Flushes the encoder and closes the container.
    pub fn finish(&mut self) -> Result<(), ProbeError> {
        let opened = self.opened.as_mut().ok_or_else(|| {
            ProbeError::NoFrames(format!("{} never received a frame", self.codec.name()))
        })?;
        opened
            .encoder
            .send_eof()
            .map_err(ffmpeg_error("Error flushing encoder"))?;
        self.write_packets()?;
        self.output_context
            .write_trailer()
            .map_err(ffmpeg_error("Error writing trailer"))?;
        info!(
            "Encoded {} frames into {} packets",
            self.frame_count, self.packets_written
        );
        Ok(())
    }
}
