use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use probe_lib::probe_types::{
    parse_key_value, EncodeOptions, FrameProgress, PacketSource, ProbeOptions, ProbeReport,
    DEFAULT_MAX_FRAMES,
};
use probe_lib::video::{available_device_types, encoder_private_options};
use std::io::Write;
use std::path::PathBuf;

#[derive(Args, Clone, Debug)]
struct DecodeArgs {
    /// Media file to decode
    input: PathBuf,

    /// FFmpeg hardware device type, or "none" to run without a device
    #[arg(long, env = "HWPROBE_DEVICE_TYPE", default_value = "vulkan")]
    device_type: String,

    /// Device to open, e.g. a Vulkan device index or a DRM render node
    #[arg(long, env = "HWPROBE_DEVICE")]
    device: Option<String>,

    /// Bind the device to the decoder
    #[arg(long)]
    hw_decode: bool,

    /// Do not upload software-decoded frames to the device
    #[arg(long)]
    no_upload: bool,

    /// Number of frames to decode
    #[arg(long, default_value_t = DEFAULT_MAX_FRAMES)]
    frames: usize,

    /// "repeat" resubmits the first packet, "stream" reads the file
    #[arg(long, default_value_t = PacketSource::Repeat, value_parser = parse_packet_source)]
    packets: PacketSource,

    /// Save the first decoded frame as a PNG
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Skip the stream summary
    #[arg(long)]
    no_dump: bool,
}

#[derive(Subcommand, Clone, Debug)]
enum Command {
    /// Decode frames and report wall-clock time
    Decode(DecodeArgs),
    /// Decode, optionally upload, and re-encode into OUTPUT
    Transcode {
        #[command(flatten)]
        decode: DecodeArgs,

        /// Container to write
        output: PathBuf,

        /// Encoder name, e.g. h264_vulkan, hevc_vaapi, libx264
        #[arg(long)]
        encoder: String,

        /// Target bit rate in bits per second
        #[arg(long)]
        bitrate: Option<usize>,

        /// Private encoder option, repeatable
        #[arg(long = "encoder-opt", value_parser = parse_encoder_opt)]
        encoder_opts: Vec<(String, String)>,
    },
    /// List hardware device types supported by the linked FFmpeg
    Devices,
    /// Show an encoder's private options
    EncoderOptions { encoder: String },
}

#[derive(Parser)]
#[command(name = "hwprobe", version, about = "Hardware video decode/encode probe")]
struct Cli {
    /// FFmpeg log level (quiet, error, warning, info, verbose, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    ffmpeg_log: String,

    #[command(subcommand)]
    command: Command,
}

fn parse_packet_source(s: &str) -> Result<PacketSource, String> {
    s.parse().map_err(|e: probe_lib::probe_types::ProbeError| e.to_string())
}

fn parse_encoder_opt(s: &str) -> Result<(String, String), String> {
    parse_key_value(s).map_err(|e| e.to_string())
}

impl DecodeArgs {
    fn to_options(&self) -> ProbeOptions {
        let device_type = match self.device_type.as_str() {
            "none" | "" => None,
            name => Some(name.to_string()),
        };
        ProbeOptions {
            input: self.input.clone(),
            upload: device_type.is_some() && !self.no_upload,
            device_type,
            device: self.device.clone(),
            hw_decode: self.hw_decode,
            max_frames: self.frames,
            packets: self.packets,
            snapshot: self.snapshot.clone(),
            dump_format: !self.no_dump,
        }
    }
}

fn print_progress(progress: &FrameProgress) {
    print!(
        "\rFrame decoded: {}, fmt: {}",
        progress.index, progress.format_id
    );
    let _ = std::io::stdout().flush();
}

fn print_report(report: &ProbeReport) {
    println!();
    println!("{} ({})", report.decode_path, report.pixel_format);
    if report.frames_uploaded > 0 {
        println!("Frames uploaded: {}", report.frames_uploaded);
    }
    if report.frames_encoded > 0 {
        println!(
            "Frames encoded: {} ({} packets written)",
            report.frames_encoded, report.packets_written
        );
    }
    println!("Time = {:.6}", report.elapsed.as_secs_f64());
    println!(
        "{} frames, {} packets, {:.2} fps",
        report.frames_decoded,
        report.packets_sent,
        report.frames_per_second()
    );
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Decode(args) => {
            let options = args.to_options();
            println!("Decoding {} frames", options.max_frames);
            let report = probe_lib::run_probe(&options, None, &mut print_progress)
                .with_context(|| format!("decoding {}", options.input.display()))?;
            print_report(&report);
        }
        Command::Transcode {
            decode,
            output,
            encoder,
            bitrate,
            encoder_opts,
        } => {
            let options = decode.to_options();
            let encode = EncodeOptions {
                encoder,
                output,
                bit_rate: bitrate,
                options: encoder_opts,
            };
            println!(
                "Decoding {} frames into {} ({})",
                options.max_frames,
                encode.output.display(),
                encode.encoder
            );
            let report = probe_lib::run_probe(&options, Some(&encode), &mut print_progress)
                .with_context(|| format!("transcoding {}", options.input.display()))?;
            print_report(&report);
        }
        Command::Devices => {
            for name in available_device_types() {
                println!("{}", name);
            }
        }
        Command::EncoderOptions { encoder } => {
            let options = encoder_private_options(&encoder)?;
            print!("{}", options);
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = probe_lib::parse_ffmpeg_log_level(&cli.ffmpeg_log)?;
    probe_lib::init_logging(level);
    probe_lib::init()?;
    log::debug!("hwprobe {}", env!("CARGO_PKG_VERSION"));

    run(cli)
}
