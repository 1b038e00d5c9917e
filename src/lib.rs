#![forbid(unsafe_code)]

pub mod encode_ffmpeg;
pub mod encode_image;
pub mod error;
pub mod formats;
pub mod frames;
pub mod mask;
pub mod mux;
pub mod output;
pub mod pipeline;
pub mod probe;

pub use encode_ffmpeg::{EncodeReport, EncoderConfig, aligned_dim};
pub use error::{ReelforgeError, ReelforgeResult};
pub use formats::{
    AdvancedParams, FormatProfile, ImageContainer, OutputFormat, ProfileKind,
    available_format_ids, quality_to_crf, quality_to_q, resolve_video_profile,
};
pub use frames::{FrameBatch, FrameSource, LatentBatch, LatentDecoder, looks_like_latent};
pub use mask::{DEFAULT_MASK_KEY, mask_file, unmask_file};
pub use mux::{AudioCodec, AudioTrack};
pub use output::{ArtifactRole, OutputArtifact, OutputLocation, next_counter};
pub use pipeline::{
    EncodeOutcome, EncodeRequest, NoProgress, PipelineContext, ProgressSink, combine_media,
};
