use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use reelforge::{
    AudioTrack, EncodeRequest, EncoderConfig, FrameBatch, FrameSource, OutputLocation,
    PipelineContext, combine_media,
};

#[derive(Parser, Debug)]
#[command(name = "reelforge", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Encode a directory of still frames into animated media.
    Encode(EncodeArgs),
    /// List the accepted format identifiers.
    Formats,
    /// Apply or undo the byte mask on a file in place (the transform is its
    /// own inverse).
    Mask(MaskArgs),
}

#[derive(Parser, Debug)]
struct EncodeArgs {
    /// Directory of image frames, consumed in lexical filename order.
    #[arg(long = "in")]
    in_dir: PathBuf,

    /// Directory the outputs land in.
    #[arg(long, default_value = "out")]
    out_dir: PathBuf,

    /// Filename prefix; may carry subdirectories (`renders/clip`).
    #[arg(long, default_value = "reelforge")]
    prefix: String,

    /// Format identifier, e.g. `image/gif` or `video/h264-mp4`.
    #[arg(long, default_value = "video/h264-mp4")]
    format: String,

    /// Playback rate in frames per second.
    #[arg(long, default_value_t = 24.0)]
    fps: f32,

    /// Quality from 1 (smallest) to 100 (best).
    #[arg(long, default_value_t = 85)]
    quality: u8,

    /// Loop count for animated images; 0 loops forever.
    #[arg(long, default_value_t = 0)]
    loops: u32,

    /// Append the reversed interior frames for a seamless bounce.
    #[arg(long)]
    pingpong: bool,

    /// WAV file to mux into video outputs.
    #[arg(long)]
    audio: Option<PathBuf>,

    /// Mask every produced file with the built-in key.
    #[arg(long)]
    mask: bool,

    /// Explicit path to the ffmpeg binary.
    #[arg(long)]
    ffmpeg: Option<PathBuf>,

    /// Print the outcome as JSON on stdout.
    #[arg(long)]
    json: bool,
}

#[derive(Parser, Debug)]
struct MaskArgs {
    /// File to transform in place.
    file: PathBuf,

    /// Key text overriding the built-in key.
    #[arg(long)]
    key: Option<String>,
}

fn main() -> anyhow::Result<()> {
    // Respect RUST_LOG when set; logs go to stderr so --json stays clean.
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "reelforge=info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(&filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Encode(args) => cmd_encode(args),
        Command::Formats => cmd_formats(),
        Command::Mask(args) => cmd_mask(args),
    }
}

fn cmd_encode(args: EncodeArgs) -> anyhow::Result<()> {
    let batch = load_frames(&args.in_dir)?;
    let audio = match &args.audio {
        Some(path) => Some(load_wav(path)?),
        None => None,
    };

    let request = EncodeRequest {
        frame_rate: args.fps,
        loop_count: args.loops,
        quality: args.quality,
        pingpong: args.pingpong,
        format: args.format,
        audio,
        mask_outputs: args.mask,
        filename_prefix: args.prefix,
        ..EncodeRequest::default()
    };

    // An explicit --ffmpeg must exist; otherwise a missing encoder only
    // matters once a video format asks for it.
    let encoder = match &args.ffmpeg {
        Some(path) => Some(EncoderConfig::locate(Some(path))?),
        None => EncoderConfig::locate(None).ok(),
    };

    let location = OutputLocation::resolve(&args.out_dir, &request.filename_prefix)?;
    let mut ctx = PipelineContext::new();
    if let Some(config) = encoder.as_ref() {
        ctx = ctx.with_encoder(config);
    }

    let outcome = combine_media(&request, FrameSource::Pixels(batch), &location, &ctx)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else if let Some(primary) = &outcome.primary {
        eprintln!("wrote {}", primary.display());
    } else {
        eprintln!("no frames, nothing written");
    }
    Ok(())
}

fn cmd_formats() -> anyhow::Result<()> {
    println!("{:<22} animated GIF, encoded in process", "image/gif");
    println!("{:<22} animated WebP, encoded in process", "image/webp");
    for profile in reelforge::formats::VIDEO_PROFILES {
        println!("{:<22} {}", format!("video/{}", profile.key), profile.description);
    }
    Ok(())
}

fn cmd_mask(args: MaskArgs) -> anyhow::Result<()> {
    let key: &[u8] = match &args.key {
        Some(text) => text.as_bytes(),
        None => reelforge::DEFAULT_MASK_KEY,
    };
    reelforge::mask_file(&args.file, key)?;
    eprintln!("transformed {}", args.file.display());
    Ok(())
}

/// Loads every image file in `dir` (sorted by name) as RGB8 frames.
fn load_frames(dir: &Path) -> anyhow::Result<FrameBatch> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("read frame directory '{}'", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| is_image_file(path))
        .collect();
    paths.sort();
    if paths.is_empty() {
        anyhow::bail!("no image frames found in '{}'", dir.display());
    }

    let mut dims: Option<(u32, u32)> = None;
    let mut frames = Vec::with_capacity(paths.len());
    for path in &paths {
        let img = image::open(path)
            .with_context(|| format!("decode frame '{}'", path.display()))?
            .to_rgb8();
        let (w, h) = img.dimensions();
        match dims {
            None => dims = Some((w, h)),
            Some(expected) if expected != (w, h) => anyhow::bail!(
                "frame '{}' is {}x{}, expected {}x{}",
                path.display(),
                w,
                h,
                expected.0,
                expected.1
            ),
            Some(_) => {}
        }
        frames.push(img.into_raw());
    }

    let Some((width, height)) = dims else {
        anyhow::bail!("no decodable frames in '{}'", dir.display());
    };
    Ok(FrameBatch::from_rgb8(width, height, frames)?)
}

fn is_image_file(path: &Path) -> bool {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    matches!(ext.as_deref(), Some("png" | "jpg" | "jpeg" | "bmp" | "webp"))
}

/// Reads a WAV file into interleaved f32 samples, normalizing integer depths.
fn load_wav(path: &Path) -> anyhow::Result<AudioTrack> {
    let mut reader = hound::WavReader::open(path)
        .with_context(|| format!("open audio file '{}'", path.display()))?;
    let spec = reader.spec();
    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .with_context(|| format!("decode audio samples from '{}'", path.display()))?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()
                .with_context(|| format!("decode audio samples from '{}'", path.display()))?
        }
    };
    Ok(AudioTrack {
        samples,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
    })
}
