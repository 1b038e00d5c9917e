//! Output placement: directory resolution, the per-request sequence counter,
//! and the artifact bookkeeping the masking layer iterates at the end.
//!
//! Every artifact of one request shares a single counter value, assigned
//! before the first byte is written and reserved on disk so two requests
//! scanning the same directory cannot claim the same number.

use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use anyhow::Context;
use regex::Regex;

use crate::error::{ReelforgeError, ReelforgeResult};

/// Role of one produced file within a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactRole {
    FrameSnapshot,
    EncodedMedia,
    AudioMuxedMedia,
}

/// One file written on behalf of a request.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct OutputArtifact {
    pub path: PathBuf,
    pub role: ArtifactRole,
}

/// Where a request's artifacts land: the directory, the filename stem before
/// the `_NNNNN.ext` suffix, and a reporting-only subfolder label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLocation {
    pub dir: PathBuf,
    pub stem: String,
    pub subfolder: String,
}

impl OutputLocation {
    /// Splits a prefix such as `renders/loop` into a directory part and a
    /// stem, creating directories under `root` as needed. The prefix must
    /// stay inside `root`.
    pub fn resolve(root: &Path, prefix: &str) -> ReelforgeResult<Self> {
        if prefix.trim().is_empty() {
            return Err(ReelforgeError::validation(
                "filename prefix must not be empty",
            ));
        }
        let rel = Path::new(prefix);
        if rel.is_absolute()
            || rel
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::RootDir))
        {
            return Err(ReelforgeError::validation(format!(
                "filename prefix {prefix:?} must be relative and must not traverse upward"
            )));
        }
        let stem = rel
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                ReelforgeError::validation(format!(
                    "filename prefix {prefix:?} has no final component"
                ))
            })?
            .to_string();
        let parent = rel.parent().filter(|p| !p.as_os_str().is_empty());
        let dir = match parent {
            Some(p) => root.join(p),
            None => root.to_path_buf(),
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating output directory {}", dir.display()))?;
        Ok(Self {
            dir,
            stem,
            subfolder: parent.map(|p| p.to_string_lossy().into_owned()).unwrap_or_default(),
        })
    }

    /// Full path of the artifact carrying `counter`, zero-padded to five
    /// digits.
    pub fn artifact_path(&self, counter: u32, extension: &str) -> PathBuf {
        self.dir
            .join(format!("{}_{counter:05}.{extension}", self.stem))
    }
}

/// Scans `dir` for `<stem>_<digits><non-digit-suffix>.<ext>` and returns the
/// highest existing counter plus one. Matching is case-insensitive; files
/// with trailing suffixes after the digit run (such as muxed `-audio`
/// siblings) count toward the maximum.
pub fn next_counter(dir: &Path, stem: &str) -> ReelforgeResult<u32> {
    let pattern = format!(r"(?i)^{}_(\d+)\D*\..+$", regex::escape(stem));
    let matcher = Regex::new(&pattern).map_err(|e| {
        ReelforgeError::validation(format!("invalid counter pattern for stem {stem:?}: {e}"))
    })?;
    let entries = fs::read_dir(dir)
        .with_context(|| format!("scanning {} for existing outputs", dir.display()))?;
    let mut max_counter = 0u32;
    for entry in entries {
        let entry =
            entry.with_context(|| format!("reading directory entry in {}", dir.display()))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(caps) = matcher.captures(name)
            && let Ok(value) = caps[1].parse::<u32>()
        {
            max_counter = max_counter.max(value);
        }
    }
    Ok(max_counter + 1)
}

/// Reserves a sequence number for one request by exclusively creating its
/// first artifact, the snapshot file. Two requests that scanned the same
/// counter race on the create; the loser moves to the next number.
pub fn reserve_snapshot(location: &OutputLocation) -> ReelforgeResult<(u32, PathBuf)> {
    fs::create_dir_all(&location.dir)
        .with_context(|| format!("creating output directory {}", location.dir.display()))?;
    let mut counter = next_counter(&location.dir, &location.stem)?;
    loop {
        let path = location.artifact_path(counter, "png");
        match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => return Ok((counter, path)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => counter += 1,
            Err(e) => return Err(ReelforgeError::from(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_takes_max_plus_one_across_extensions() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["clip_00001.mp4", "clip_00007.png", "notes.txt", "other_00099.gif"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        assert_eq!(next_counter(dir.path(), "clip").unwrap(), 8);
    }

    #[test]
    fn counter_matching_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("CLIP_00003.GIF"), b"x").unwrap();
        assert_eq!(next_counter(dir.path(), "clip").unwrap(), 4);
    }

    #[test]
    fn counter_counts_suffixed_siblings() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("clip_00005-audio.mp4"), b"x").unwrap();
        assert_eq!(next_counter(dir.path(), "clip").unwrap(), 6);
    }

    #[test]
    fn counter_ignores_malformed_names() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["clip_abc.mp4", "clip_.png", "clip_12", "clip.mp4"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        assert_eq!(next_counter(dir.path(), "clip").unwrap(), 1);
    }

    #[test]
    fn resolve_splits_subfolder_prefixes() {
        let root = tempfile::tempdir().unwrap();
        let location = OutputLocation::resolve(root.path(), "renders/night/loop").unwrap();
        assert_eq!(location.stem, "loop");
        assert_eq!(location.subfolder, "renders/night");
        assert!(location.dir.ends_with("renders/night"));
        assert!(location.dir.is_dir());

        let flat = OutputLocation::resolve(root.path(), "loop").unwrap();
        assert_eq!(flat.stem, "loop");
        assert_eq!(flat.subfolder, "");
        assert_eq!(flat.dir, root.path());
    }

    #[test]
    fn resolve_rejects_escaping_prefixes() {
        let root = tempfile::tempdir().unwrap();
        assert!(matches!(
            OutputLocation::resolve(root.path(), "../evil"),
            Err(ReelforgeError::Validation(_))
        ));
        assert!(matches!(
            OutputLocation::resolve(root.path(), "/abs/evil"),
            Err(ReelforgeError::Validation(_))
        ));
        assert!(matches!(
            OutputLocation::resolve(root.path(), "  "),
            Err(ReelforgeError::Validation(_))
        ));
    }

    #[test]
    fn reservation_lands_after_existing_outputs() {
        let root = tempfile::tempdir().unwrap();
        let location = OutputLocation::resolve(root.path(), "clip").unwrap();
        fs::write(location.dir.join("clip_00001.mp4"), b"x").unwrap();
        fs::write(location.dir.join("clip_00002.png"), b"x").unwrap();

        let (counter, path) = reserve_snapshot(&location).unwrap();
        assert_eq!(counter, 3);
        assert!(path.ends_with("clip_00003.png"));
        assert!(path.exists());
    }

    #[test]
    fn reservation_placeholder_blocks_the_number() {
        let root = tempfile::tempdir().unwrap();
        let location = OutputLocation::resolve(root.path(), "clip").unwrap();

        // The placeholder file alone must push the next request onward even
        // before any real artifact lands.
        let (first, _) = reserve_snapshot(&location).unwrap();
        let (second, _) = reserve_snapshot(&location).unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 2);
    }

    #[test]
    fn artifact_paths_share_the_counter() {
        let location = OutputLocation {
            dir: PathBuf::from("/out"),
            stem: "clip".into(),
            subfolder: String::new(),
        };
        assert_eq!(
            location.artifact_path(7, "png"),
            PathBuf::from("/out/clip_00007.png")
        );
        assert_eq!(
            location.artifact_path(7, "mp4"),
            PathBuf::from("/out/clip_00007.mp4")
        );
    }
}
