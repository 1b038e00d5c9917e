//! Second-pass audio muxing. The video stream is copied without re-encoding;
//! raw samples flow to the encoder over stdin.
//!
//! Everything here is degrade-friendly: an unavailable encoder skips the
//! pass, and callers treat errors as "ship the video without audio", never
//! as a request failure.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::encode_ffmpeg::EncoderConfig;
use crate::error::{ReelforgeError, ReelforgeResult};

/// Interleaved f32 samples plus their layout.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AudioTrack {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioTrack {
    pub fn validate(&self) -> ReelforgeResult<()> {
        if self.sample_rate == 0 {
            return Err(ReelforgeError::validation("audio sample rate must be nonzero"));
        }
        if self.channels == 0 {
            return Err(ReelforgeError::validation("audio channel count must be nonzero"));
        }
        Ok(())
    }
}

/// Audio codec matched to the output container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    Aac,
    Vorbis,
    Mp3,
}

impl AudioCodec {
    pub fn for_extension(extension: &str) -> Self {
        match extension.to_ascii_lowercase().as_str() {
            "webm" => Self::Vorbis,
            "avi" => Self::Mp3,
            _ => Self::Aac,
        }
    }

    pub fn ffmpeg_name(self) -> &'static str {
        match self {
            Self::Aac => "aac",
            Self::Vorbis => "libvorbis",
            Self::Mp3 => "libmp3lame",
        }
    }

    fn bitrate(self) -> Option<&'static str> {
        match self {
            Self::Aac => Some("192k"),
            _ => None,
        }
    }
}

/// The muxed sibling of a video file: `<stem>-audio.<ext>` in place.
fn muxed_path(video: &Path) -> PathBuf {
    let stem = video
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    let extension = video
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("mp4");
    video.with_file_name(format!("{stem}-audio.{extension}"))
}

/// Audio must cover the video plus a second of margin so the encoder never
/// truncates the tail; `-shortest` trims the excess afterwards.
fn min_audio_duration(total_frames: usize, frame_rate: f32) -> f64 {
    total_frames as f64 / f64::from(frame_rate) + 1.0
}

/// Arguments between the raw-audio input declaration and the destination:
/// sample layout, stream handling, tail padding, and the audio codec. The
/// video path and destination are appended separately at spawn.
fn assemble_args(track: &AudioTrack, codec: AudioCodec, min_duration: f64) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-ar".into(),
        track.sample_rate.to_string(),
        "-ac".into(),
        track.channels.to_string(),
        "-f".into(),
        "f32le".into(),
        "-i".into(),
        "-".into(),
        "-c:v".into(),
        "copy".into(),
        "-af".into(),
        format!("apad=whole_dur={min_duration}"),
        "-shortest".into(),
        "-c:a".into(),
        codec.ffmpeg_name().into(),
    ];
    if let Some(bitrate) = codec.bitrate() {
        args.push("-b:a".into());
        args.push(bitrate.into());
    }
    args
}

/// Muxes `track` into a copy of `video`, producing the `-audio` sibling.
///
/// `Ok(None)` means the pass was skipped: empty waveform, or no encoder
/// binary at the configured path. Errors mean the encoder ran and failed;
/// callers degrade to the video-only artifact.
pub fn mux_audio(
    encoder: &EncoderConfig,
    video: &Path,
    track: &AudioTrack,
    total_frames: usize,
    frame_rate: f32,
) -> ReelforgeResult<Option<PathBuf>> {
    if track.samples.is_empty() {
        return Ok(None);
    }
    track.validate()?;

    let extension = video.extension().and_then(|s| s.to_str()).unwrap_or("mp4");
    let codec = AudioCodec::for_extension(extension);
    let dest = muxed_path(video);
    let args = assemble_args(track, codec, min_audio_duration(total_frames, frame_rate));

    let mut cmd = Command::new(encoder.path());
    cmd.args(["-v", "error", "-n", "-i"])
        .arg(video)
        .args(&args)
        .arg(&dest)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

    let command_line = format!(
        "{} -v error -n -i {} {} {}",
        encoder.path().display(),
        video.display(),
        args.join(" "),
        dest.display()
    );
    tracing::debug!(target: "reelforge::mux", %command_line, samples = track.samples.len());

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(ReelforgeError::from(e)),
    };

    let mut bytes = Vec::with_capacity(track.samples.len() * 4);
    for sample in &track.samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| ReelforgeError::validation("encoder stdin unavailable"))?;
    let write_result = stdin.write_all(&bytes);
    drop(stdin);

    let output = child.wait_with_output()?;
    if !output.status.success() {
        let _ = std::fs::remove_file(&dest);
        return Err(ReelforgeError::EncoderFailed {
            status: output.status.to_string(),
            command: command_line,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    write_result?;

    Ok(Some(dest))
}
