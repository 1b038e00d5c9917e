//! The external-encoder path: locating the ffmpeg binary, aligning frame
//! dimensions, and piping raw RGB24 frames through a child process.
//!
//! The whole frame stream is buffered and written in one blocking call; there
//! is no streaming overlap with the encoder and no cancellation once the
//! child is running.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::{ReelforgeError, ReelforgeResult};
use crate::formats::FormatProfile;
use crate::frames::FrameBatch;
use crate::pipeline::ProgressSink;

pub(crate) const INSTALL_GUIDANCE: &str = "ffmpeg is required for video outputs and could not be found. \
    Install it (Linux: `sudo apt install ffmpeg`, macOS: `brew install ffmpeg`, Windows: \
    https://ffmpeg.org/download.html) or pass an explicit encoder path.";

#[cfg(windows)]
const FFMPEG_BIN: &str = "ffmpeg.exe";
#[cfg(not(windows))]
const FFMPEG_BIN: &str = "ffmpeg";

/// Probed after the search path, before the sidecar fallback. Non-native
/// entries are harmless; the probe is a plain file check.
const WELL_KNOWN_DIRS: &[&str] = &[
    "/usr/bin",
    "/usr/local/bin",
    "/opt/homebrew/bin",
    r"C:\ffmpeg\bin",
];

/// Resolved location of the external encoder binary.
///
/// Resolve once at startup and pass by reference; requests never re-discover
/// the binary. Tests inject arbitrary paths with [`EncoderConfig::from_path`].
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    path: PathBuf,
}

impl EncoderConfig {
    /// Wraps `path` without any existence check.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Locates the encoder: an explicit override wins, then the process
    /// search path, then well-known install directories, then a sidecar
    /// binary next to the current executable.
    pub fn locate(explicit: Option<&Path>) -> ReelforgeResult<Self> {
        if let Some(path) = explicit {
            if path.is_file() {
                return Ok(Self::from_path(path));
            }
            return Err(ReelforgeError::encoder_not_found(format!(
                "no encoder binary at {}. {INSTALL_GUIDANCE}",
                path.display()
            )));
        }
        if let Ok(path) = which::which(FFMPEG_BIN) {
            return Ok(Self::from_path(path));
        }
        for dir in WELL_KNOWN_DIRS {
            let candidate = Path::new(dir).join(FFMPEG_BIN);
            if candidate.is_file() {
                return Ok(Self::from_path(candidate));
            }
        }
        if let Some(sidecar) = sidecar_candidate()
            && sidecar.is_file()
        {
            return Ok(Self::from_path(sidecar));
        }
        Err(ReelforgeError::encoder_not_found(INSTALL_GUIDANCE))
    }

    /// True when the resolved binary answers `-version`. Callers that degrade
    /// instead of failing use this before committing to a second pass.
    pub fn is_available(&self) -> bool {
        Command::new(&self.path)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

fn sidecar_candidate() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(FFMPEG_BIN)))
}

/// Smallest multiple of `alignment` at or above `dim`.
pub fn aligned_dim(dim: u32, alignment: u32) -> u32 {
    let a = alignment.max(1);
    dim.div_ceil(a) * a
}

/// What a successful external encode produced.
#[derive(Debug, Clone)]
pub struct EncodeReport {
    pub path: PathBuf,
    pub frames_encoded: usize,
    pub profile: &'static str,
}

/// Concatenates every frame into one raw byte stream, embedding each frame
/// top-left into a zero-filled buffer when the aligned size differs from the
/// native size. Source frames are never mutated.
fn build_raw_stream(
    batch: &FrameBatch,
    aligned_w: u32,
    aligned_h: u32,
    progress: &dyn ProgressSink,
) -> Vec<u8> {
    let src_w = batch.width() as usize;
    let src_h = batch.height() as usize;
    let src_row = src_w * 3;
    let dst_row = aligned_w as usize * 3;
    let dst_len = dst_row * aligned_h as usize;

    let mut stream = Vec::with_capacity(dst_len * batch.len());
    for frame in batch.frames() {
        if src_row == dst_row && src_h == aligned_h as usize {
            stream.extend_from_slice(frame);
        } else {
            for y in 0..src_h {
                stream.extend_from_slice(&frame[y * src_row..(y + 1) * src_row]);
                stream.resize(stream.len() + (dst_row - src_row), 0);
            }
            stream.resize(stream.len() + (aligned_h as usize - src_h) * dst_row, 0);
        }
        progress.frame_done();
    }
    stream
}

/// Input-side and container-side arguments surrounding the profile's own
/// parameter list. The destination path is appended separately at spawn.
fn assemble_args(
    aligned_w: u32,
    aligned_h: u32,
    frame_rate: f32,
    encoder_args: &[String],
    profile: &FormatProfile,
) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-v".into(),
        "error".into(),
        "-y".into(),
        "-f".into(),
        "rawvideo".into(),
        "-pix_fmt".into(),
        "rgb24".into(),
        "-s".into(),
        format!("{aligned_w}x{aligned_h}"),
        "-r".into(),
        frame_rate.to_string(),
        "-i".into(),
        "-".into(),
    ];
    args.extend(encoder_args.iter().cloned());
    if profile.wants_faststart() {
        args.push("-movflags".into());
        args.push("+faststart".into());
    }
    args
}

/// Encodes the batch to `dest` through the external encoder. The profile's
/// resolved parameter list comes from
/// [`crate::formats::resolve_encoder_args`]; frame dimensions are aligned to
/// the profile's unit and padded as needed.
pub fn encode_video(
    encoder: &EncoderConfig,
    dest: &Path,
    batch: &FrameBatch,
    frame_rate: f32,
    profile: &'static FormatProfile,
    encoder_args: &[String],
    progress: &dyn ProgressSink,
) -> ReelforgeResult<EncodeReport> {
    if batch.is_empty() {
        return Err(ReelforgeError::validation(
            "video encode requires at least one frame",
        ));
    }
    if !frame_rate.is_finite() || frame_rate <= 0.0 {
        return Err(ReelforgeError::validation(format!(
            "frame rate must be positive, got {frame_rate}"
        )));
    }

    let aligned_w = aligned_dim(batch.width(), profile.dim_alignment);
    let aligned_h = aligned_dim(batch.height(), profile.dim_alignment);
    let args = assemble_args(aligned_w, aligned_h, frame_rate, encoder_args, profile);
    let command_line = format!(
        "{} {} {}",
        encoder.path().display(),
        args.join(" "),
        dest.display()
    );

    tracing::debug!(target: "reelforge::encode", %command_line, frames = batch.len());

    let mut child = Command::new(encoder.path())
        .args(&args)
        .arg(dest)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ReelforgeError::encoder_not_found(format!(
                    "no encoder binary at {}. {INSTALL_GUIDANCE}",
                    encoder.path().display()
                ))
            } else {
                ReelforgeError::from(e)
            }
        })?;

    let stream = build_raw_stream(batch, aligned_w, aligned_h, progress);
    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| ReelforgeError::validation("encoder stdin unavailable"))?;
    // A broken pipe here usually means the encoder already died; its own
    // diagnostics from wait_with_output are the useful error.
    let write_result = stdin.write_all(&stream);
    drop(stdin);

    let output = child.wait_with_output()?;
    if !output.status.success() {
        let _ = std::fs::remove_file(dest);
        return Err(ReelforgeError::EncoderFailed {
            status: output.status.to_string(),
            command: command_line,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    write_result?;

    Ok(EncodeReport {
        path: dest.to_path_buf(),
        frames_encoded: batch.len(),
        profile: profile.key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::resolve_video_profile;
    use crate::pipeline::NoProgress;

    #[test]
    fn alignment_finds_smallest_multiple_at_or_above() {
        assert_eq!(aligned_dim(1920, 2), 1920);
        assert_eq!(aligned_dim(1919, 2), 1920);
        assert_eq!(aligned_dim(7, 4), 8);
        assert_eq!(aligned_dim(7, 1), 7);
        for dim in 1..64u32 {
            for alignment in 1..8u32 {
                let aligned = aligned_dim(dim, alignment);
                assert!(aligned >= dim);
                assert_eq!(aligned % alignment, 0);
                assert!(aligned - dim < alignment);
            }
        }
    }

    #[test]
    fn raw_stream_pads_top_left() {
        let frame: Vec<u8> = (1..=9).collect();
        let batch = FrameBatch::from_rgb8(3, 1, vec![frame]).unwrap();
        let stream = build_raw_stream(&batch, 4, 2, &NoProgress);
        assert_eq!(stream.len(), 4 * 2 * 3);
        assert_eq!(&stream[..9], &[1, 2, 3, 4, 5, 6, 7, 8, 9]);
        assert!(stream[9..].iter().all(|b| *b == 0));
    }

    #[test]
    fn raw_stream_is_identity_when_aligned() {
        let frames = vec![vec![5u8; 12], vec![9u8; 12]];
        let batch = FrameBatch::from_rgb8(2, 2, frames.clone()).unwrap();
        let stream = build_raw_stream(&batch, 2, 2, &NoProgress);
        assert_eq!(stream, [frames[0].clone(), frames[1].clone()].concat());
    }

    #[test]
    fn input_args_precede_profile_args() {
        let profile = resolve_video_profile("h264-mp4");
        let encoder_args = vec!["-c:v".to_string(), "libx264".to_string()];
        let args = assemble_args(16, 8, 24.0, &encoder_args, profile);
        assert_eq!(
            &args[..13],
            &[
                "-v", "error", "-y", "-f", "rawvideo", "-pix_fmt", "rgb24", "-s", "16x8", "-r",
                "24", "-i", "-"
            ]
        );
        assert_eq!(&args[13..15], &["-c:v", "libx264"]);
        assert_eq!(&args[args.len() - 2..], &["-movflags", "+faststart"]);
    }

    #[test]
    fn faststart_is_skipped_for_non_mp4_containers() {
        let webm = resolve_video_profile("vp9-webm");
        let args = assemble_args(16, 8, 24.0, &[], webm);
        assert!(!args.contains(&"-movflags".to_string()));

        let avi = resolve_video_profile("avi");
        let args = assemble_args(16, 8, 24.0, &[], avi);
        assert!(!args.contains(&"+faststart".to_string()));
    }

    #[test]
    fn explicit_locate_requires_existing_file() {
        let missing = Path::new("/nonexistent/dir/ffmpeg-missing");
        assert!(matches!(
            EncoderConfig::locate(Some(missing)),
            Err(ReelforgeError::EncoderNotFound(_))
        ));

        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join(FFMPEG_BIN);
        std::fs::write(&fake, b"#!/bin/sh\n").unwrap();
        let config = EncoderConfig::locate(Some(&fake)).unwrap();
        assert_eq!(config.path(), fake);
    }

    #[test]
    fn missing_binary_maps_to_encoder_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = EncoderConfig::from_path("/nonexistent/dir/ffmpeg-missing");
        let batch = FrameBatch::from_rgb8(2, 2, vec![vec![0; 12]]).unwrap();
        let profile = resolve_video_profile("h264-mp4");
        let err = encode_video(
            &encoder,
            &dir.path().join("out.mp4"),
            &batch,
            24.0,
            profile,
            &[],
            &NoProgress,
        )
        .unwrap_err();
        assert!(matches!(err, ReelforgeError::EncoderNotFound(_)));
        assert!(err.to_string().contains("Install it"));
    }

    #[test]
    fn degenerate_requests_fail_validation() {
        let encoder = EncoderConfig::from_path("/usr/bin/true");
        let profile = resolve_video_profile("h264-mp4");
        let empty = FrameBatch::empty();
        assert!(matches!(
            encode_video(&encoder, Path::new("o.mp4"), &empty, 24.0, profile, &[], &NoProgress),
            Err(ReelforgeError::Validation(_))
        ));

        let batch = FrameBatch::from_rgb8(2, 2, vec![vec![0; 12]]).unwrap();
        assert!(matches!(
            encode_video(&encoder, Path::new("o.mp4"), &batch, 0.0, profile, &[], &NoProgress),
            Err(ReelforgeError::Validation(_))
        ));
    }
}
