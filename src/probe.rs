//! Best-effort stream verification of produced video files via ffprobe.
//! Purely informational; every failure path collapses to `None`.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::encode_ffmpeg::EncoderConfig;

#[cfg(windows)]
const FFPROBE_BIN: &str = "ffprobe.exe";
#[cfg(not(windows))]
const FFPROBE_BIN: &str = "ffprobe";

/// ffprobe usually ships next to ffmpeg, so the encoder's directory is
/// checked before the search path.
fn locate_ffprobe(encoder: Option<&EncoderConfig>) -> Option<PathBuf> {
    if let Some(encoder) = encoder
        && let Some(dir) = encoder.path().parent()
    {
        let sibling = dir.join(FFPROBE_BIN);
        if sibling.is_file() {
            return Some(sibling);
        }
    }
    which::which(FFPROBE_BIN).ok()
}

/// Queries codec name, profile, and pixel format of the first video stream
/// and logs the summary. `None` when ffprobe is unavailable or the file does
/// not parse as video.
pub fn probe_video(encoder: Option<&EncoderConfig>, path: &Path) -> Option<String> {
    let ffprobe = locate_ffprobe(encoder)?;
    let output = Command::new(&ffprobe)
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=codec_name,profile,pix_fmt",
            "-of",
            "default=noprint_wrappers=1",
        ])
        .arg(path)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let summary = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if summary.is_empty() {
        return None;
    }
    tracing::info!(target: "reelforge::probe", video = %path.display(), %summary);
    Some(summary)
}
