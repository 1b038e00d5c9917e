//! Request orchestration: one call takes a frame source to finished,
//! optionally masked artifacts on disk.
//!
//! Stage order is fixed: validate and parse, normalize, reserve the counter
//! and write the first-frame snapshot, transform the sequence, encode, mux,
//! probe, mask. Audio and masking failures on non-primary artifacts degrade
//! with a warning instead of failing the request.

use std::path::Path;

use crate::encode_ffmpeg::{self, EncoderConfig};
use crate::encode_image::{self, AnimatedImageSettings};
use crate::error::{ReelforgeError, ReelforgeResult};
use crate::formats::{AdvancedParams, OutputFormat, resolve_encoder_args};
use crate::frames::{self, FrameBatch, FrameSource, LatentDecoder};
use crate::mask;
use crate::mux::{self, AudioTrack};
use crate::output::{ArtifactRole, OutputArtifact, OutputLocation, reserve_snapshot};
use crate::probe;

/// Observer advanced once per processed frame. Monotonic increase is the
/// only contract.
pub trait ProgressSink {
    fn frame_done(&self);
}

/// Sink that ignores progress.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn frame_done(&self) {}
}

/// Fully resolved parameters of one encode request.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct EncodeRequest {
    pub frame_rate: f32,
    /// 0 loops forever; animated images only.
    pub loop_count: u32,
    /// 1-100. Ignored by profiles that take explicit parameters.
    pub quality: u8,
    pub pingpong: bool,
    /// `image/gif`, `image/webp`, or `video/<profile>`.
    pub format: String,
    pub advanced: Option<AdvancedParams>,
    pub audio: Option<AudioTrack>,
    pub mask_outputs: bool,
    pub filename_prefix: String,
}

impl Default for EncodeRequest {
    fn default() -> Self {
        Self {
            frame_rate: 24.0,
            loop_count: 0,
            quality: 85,
            pingpong: false,
            format: "image/gif".into(),
            advanced: None,
            audio: None,
            mask_outputs: true,
            filename_prefix: "reelforge".into(),
        }
    }
}

impl EncodeRequest {
    pub fn validate(&self) -> ReelforgeResult<()> {
        if !self.frame_rate.is_finite() || self.frame_rate <= 0.0 {
            return Err(ReelforgeError::validation(format!(
                "frame rate must be positive, got {}",
                self.frame_rate
            )));
        }
        if !(1..=100).contains(&self.quality) {
            return Err(ReelforgeError::validation(format!(
                "quality must be within 1-100, got {}",
                self.quality
            )));
        }
        if self.filename_prefix.trim().is_empty() {
            return Err(ReelforgeError::validation(
                "filename prefix must not be empty",
            ));
        }
        Ok(())
    }
}

/// Capabilities and knobs shared across requests. Resolve the encoder once
/// at startup; requests themselves never discover binaries.
pub struct PipelineContext<'a> {
    pub encoder: Option<&'a EncoderConfig>,
    pub decoder: Option<&'a dyn LatentDecoder>,
    pub progress: &'a dyn ProgressSink,
    pub mask_key: &'a [u8],
}

impl<'a> PipelineContext<'a> {
    pub fn new() -> Self {
        Self {
            encoder: None,
            decoder: None,
            progress: &NoProgress,
            mask_key: mask::DEFAULT_MASK_KEY,
        }
    }

    pub fn with_encoder(mut self, encoder: &'a EncoderConfig) -> Self {
        self.encoder = Some(encoder);
        self
    }

    pub fn with_decoder(mut self, decoder: &'a dyn LatentDecoder) -> Self {
        self.decoder = Some(decoder);
        self
    }

    pub fn with_progress(mut self, progress: &'a dyn ProgressSink) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_mask_key(mut self, key: &'a [u8]) -> Self {
        self.mask_key = key;
        self
    }
}

impl Default for PipelineContext<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Result summary of one request.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct EncodeOutcome {
    /// The richest artifact: the muxed file when audio landed, else the
    /// encoded media. `None` only for zero-frame no-op requests.
    pub primary: Option<std::path::PathBuf>,
    pub subfolder: String,
    pub format: String,
    pub frame_rate: f32,
    pub artifacts: Vec<OutputArtifact>,
}

/// Runs one request end to end and returns the artifact summary.
///
/// Zero input frames produce an empty outcome without touching the
/// filesystem. Format parsing and validation also happen before any I/O.
#[tracing::instrument(skip_all, fields(format = %req.format, stem = %location.stem))]
pub fn combine_media(
    req: &EncodeRequest,
    source: FrameSource,
    location: &OutputLocation,
    ctx: &PipelineContext<'_>,
) -> ReelforgeResult<EncodeOutcome> {
    req.validate()?;
    let format = OutputFormat::parse(&req.format)?;

    let batch = frames::normalize(source, ctx.decoder)?;
    if batch.is_empty() {
        tracing::debug!("no frames supplied, nothing to encode");
        return Ok(EncodeOutcome {
            primary: None,
            subfolder: location.subfolder.clone(),
            format: req.format.clone(),
            frame_rate: req.frame_rate,
            artifacts: Vec::new(),
        });
    }

    // The snapshot always shows the first input frame, pre-transform, and
    // doubles as the on-disk reservation of this request's counter.
    let (counter, snapshot_path) = reserve_snapshot(location)?;
    write_snapshot(&snapshot_path, &batch)?;
    let mut artifacts = vec![OutputArtifact {
        path: snapshot_path,
        role: ArtifactRole::FrameSnapshot,
    }];

    let batch = if req.pingpong { batch.pingpong() } else { batch };
    tracing::debug!(frames = batch.len(), counter, "sequence ready");

    let media_path = location.artifact_path(counter, format.extension());
    match format {
        OutputFormat::AnimatedImage(container) => {
            let settings = AnimatedImageSettings {
                container,
                frame_rate: req.frame_rate,
                loop_count: req.loop_count,
                quality: req.quality,
            };
            encode_image::write_animated_image(&media_path, &batch, &settings, ctx.progress)?;
            artifacts.push(OutputArtifact {
                path: media_path,
                role: ArtifactRole::EncodedMedia,
            });
        }
        OutputFormat::Video(profile) => {
            let encoder = ctx
                .encoder
                .ok_or_else(|| ReelforgeError::encoder_not_found(encode_ffmpeg::INSTALL_GUIDANCE))?;
            let encoder_args = resolve_encoder_args(profile, req.quality, req.advanced.as_ref())?;
            let report = encode_ffmpeg::encode_video(
                encoder,
                &media_path,
                &batch,
                req.frame_rate,
                profile,
                &encoder_args,
                ctx.progress,
            )?;
            tracing::info!(
                frames = report.frames_encoded,
                profile = report.profile,
                "video encoded"
            );
            artifacts.push(OutputArtifact {
                path: report.path.clone(),
                role: ArtifactRole::EncodedMedia,
            });

            if let Some(track) = req.audio.as_ref() {
                match mux::mux_audio(encoder, &report.path, track, batch.len(), req.frame_rate) {
                    Ok(Some(muxed)) => artifacts.push(OutputArtifact {
                        path: muxed,
                        role: ArtifactRole::AudioMuxedMedia,
                    }),
                    Ok(None) => tracing::debug!("audio mux skipped"),
                    Err(e) => {
                        tracing::warn!(error = %e, "audio mux failed, keeping video-only output");
                    }
                }
            }

            probe::probe_video(ctx.encoder, &report.path);
        }
    }

    if req.mask_outputs {
        apply_masks(&artifacts, ctx.mask_key)?;
    }

    Ok(EncodeOutcome {
        primary: artifacts.last().map(|a| a.path.clone()),
        subfolder: location.subfolder.clone(),
        format: req.format.clone(),
        frame_rate: req.frame_rate,
        artifacts,
    })
}

fn write_snapshot(path: &Path, batch: &FrameBatch) -> ReelforgeResult<()> {
    let first = batch
        .first_frame()
        .ok_or_else(|| ReelforgeError::validation("snapshot requires at least one frame"))?;
    image::save_buffer_with_format(
        path,
        first,
        batch.width(),
        batch.height(),
        image::ColorType::Rgb8,
        image::ImageFormat::Png,
    )
    .map_err(|e| ReelforgeError::image_encode(format!("frame snapshot: {e}")))?;
    Ok(())
}

/// Masks every artifact. Failures on non-primary artifacts are logged and
/// skipped; a failure on the last (primary) artifact is fatal.
fn apply_masks(artifacts: &[OutputArtifact], key: &[u8]) -> ReelforgeResult<()> {
    let last = artifacts.len().saturating_sub(1);
    for (i, artifact) in artifacts.iter().enumerate() {
        match mask::mask_file(&artifact.path, key) {
            Ok(()) => {}
            Err(e) if i == last => return Err(e),
            Err(e) => tracing::warn!(
                file = %artifact.path.display(),
                error = %e,
                "masking failed for non-primary artifact"
            ),
        }
    }
    Ok(())
}
