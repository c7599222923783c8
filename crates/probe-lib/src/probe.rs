use crate::video::{
    format_name, parse_device_type, save_png, HardwareContext, HardwareFrames, ProbeDecoder,
    ProbeEncoder,
};
use ffmpeg_next::frame::Video;
use ffmpeg_next::Packet;
use log::{debug, info};
use probe_types::{
    DecodePath, EncodeOptions, FrameProgress, PacketSource, ProbeError, ProbeOptions,
    ProbeReport,
};
use std::time::Instant;

/// Consecutive submissions without output before a run is declared stuck.
pub const STALL_LIMIT: usize = 32;

/// Counts consecutive submissions that produced no frame.
#[derive(Debug, Default)]
struct StallGuard {
    empty: usize,
}

impl StallGuard {
    fn record(&mut self, frames: usize) -> Result<(), ProbeError> {
        if frames > 0 {
            self.empty = 0;
            return Ok(());
        }
        self.empty += 1;
        if self.empty >= STALL_LIMIT {
            return Err(ProbeError::Stalled(self.empty));
        }
        Ok(())
    }
}

enum PacketFeed {
    Repeat(Packet),
    Stream {
        pending: Option<Packet>,
        finished: bool,
    },
}

impl PacketFeed {
    fn new(source: PacketSource, first: Packet) -> Self {
        match source {
            PacketSource::Repeat => PacketFeed::Repeat(first),
            PacketSource::Stream => PacketFeed::Stream {
                pending: Some(first),
                finished: false,
            },
        }
    }

    /// Feeds the decoder once. `None` once the stream has been flushed.
    fn submit(
        &mut self,
        decoder: &mut ProbeDecoder,
        packets_sent: &mut usize,
    ) -> Result<Option<Vec<Video>>, ProbeError> {
        match self {
            PacketFeed::Repeat(packet) => {
                *packets_sent += 1;
                decoder.decode(Some(packet)).map(Some)
            }
            PacketFeed::Stream { finished: true, .. } => Ok(None),
            PacketFeed::Stream { pending, finished } => {
                let packet = match pending.take() {
                    Some(packet) => Some(packet),
                    None => decoder.read_packet()?,
                };
                match packet {
                    Some(packet) => {
                        *packets_sent += 1;
                        decoder.decode(Some(&packet)).map(Some)
                    }
                    None => {
                        *finished = true;
                        decoder.decode(None).map(Some)
                    }
                }
            }
        }
    }
}

/// Runs one probe: open, probe the output format, set up upload and encode,
/// then time the decode loop.
///
/// `progress` is called once per decoded frame inside the timed section, so
/// it should stay cheap.
pub fn run_probe(
    options: &ProbeOptions,
    encode: Option<&EncodeOptions>,
    progress: &mut dyn FnMut(&FrameProgress),
) -> Result<ProbeReport, ProbeError> {
    let device = match options.device_type.as_deref() {
        Some(name) => Some(HardwareContext::new(
            parse_device_type(name)?,
            options.device.as_deref(),
        )?),
        None => None,
    };

    let decode_device = if options.hw_decode {
        device.clone()
    } else {
        None
    };
    let mut decoder = ProbeDecoder::open(&options.input, decode_device)?;
    if options.dump_format {
        decoder.dump_format();
    }

    let first = decoder.read_packet()?.ok_or_else(|| {
        ProbeError::NoFrames(format!("{} has no video packets", options.input.display()))
    })?;
    let mut feed = PacketFeed::new(options.packets, first);

    // Probe: one frame settles the decoder's real output format.
    let mut probe_packets = 0;
    let mut stall = StallGuard::default();
    let probe_frame = loop {
        match feed.submit(&mut decoder, &mut probe_packets)? {
            Some(mut frames) if !frames.is_empty() => break frames.swap_remove(0),
            Some(_) => stall.record(0)?,
            None => {
                return Err(ProbeError::NoFrames(format!(
                    "{} ended before a frame decoded",
                    options.input.display()
                )))
            }
        }
    };
    debug!("Probe decoded a frame after {} packets", probe_packets);

    let decode_path = if decoder.hardware_decoding() {
        DecodePath::Hardware
    } else {
        DecodePath::Software
    };
    let pixel_format = format_name(decoder.pixel_format());
    info!("{} ({})", decode_path, pixel_format);

    let mut frames_ctx = match (&device, decode_path, options.upload) {
        (Some(device), DecodePath::Software, true) => {
            info!("Creating frame context to upload hardware frames into");
            Some(HardwareFrames::new(
                device,
                decoder.pixel_format(),
                decoder.width(),
                decoder.height(),
            )?)
        }
        _ => None,
    };

    let mut encoder = encode
        .map(|encode| ProbeEncoder::new(encode, decoder.frame_rate()))
        .transpose()?;

    // One-time setup stays outside the timed loop.
    if let Some(encoder) = encoder.as_mut() {
        match frames_ctx.as_mut() {
            Some(frames_ctx) => encoder.prepare(&frames_ctx.upload(&probe_frame)?)?,
            None => encoder.prepare(&probe_frame)?,
        }
    }
    if let Some(path) = &options.snapshot {
        save_png(&probe_frame, path)?;
    }
    drop(probe_frame);

    let mut report = ProbeReport {
        decode_path,
        pixel_format,
        frames_decoded: 0,
        frames_uploaded: 0,
        frames_encoded: 0,
        packets_sent: 0,
        packets_written: 0,
        elapsed: Default::default(),
    };
    let mut stall = StallGuard::default();

    info!("Decoding {} frames", options.max_frames);
    let start = Instant::now();
    'decode: while report.frames_decoded < options.max_frames {
        let frames = match feed.submit(&mut decoder, &mut report.packets_sent)? {
            Some(frames) => frames,
            None => break,
        };
        stall.record(frames.len())?;

        for frame in frames {
            if report.frames_decoded >= options.max_frames {
                break 'decode;
            }
            report.frames_decoded += 1;
            let format_id = decoder.pixel_format();
            progress(&FrameProgress {
                index: report.frames_decoded,
                format_id: format_id as i32,
                format: format_name(format_id),
            });

            let uploaded = match frames_ctx.as_mut() {
                Some(frames_ctx) => {
                    let hw_frame = frames_ctx.upload(&frame)?;
                    report.frames_uploaded += 1;
                    Some(hw_frame)
                }
                None => None,
            };

            if let Some(encoder) = encoder.as_mut() {
                encoder.encode(uploaded.as_ref().unwrap_or(&frame))?;
            }
        }
    }

    if let Some(encoder) = encoder.as_mut() {
        encoder.finish()?;
        report.frames_encoded = encoder.frames_encoded();
        report.packets_written = encoder.packets_written();
    }
    report.elapsed = start.elapsed();

    info!(
        "Decoded {} frames in {:.3}s ({:.1} fps)",
        report.frames_decoded,
        report.elapsed.as_secs_f64(),
        report.frames_per_second()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stall_guard_trips_at_the_limit() {
        let mut stall = StallGuard::default();
        for _ in 1..STALL_LIMIT {
            stall.record(0).expect("below the limit");
        }
        assert_eq!(stall.record(0), Err(ProbeError::Stalled(STALL_LIMIT)));
    }

    #[test]
    fn stall_guard_resets_on_output() {
        let mut stall = StallGuard::default();
        for _ in 1..STALL_LIMIT {
            stall.record(0).expect("below the limit");
        }
        stall.record(2).expect("frames reset the count");
        for _ in 1..STALL_LIMIT {
            stall.record(0).expect("count restarted");
        }
        assert!(stall.record(0).is_err());
    }
}
