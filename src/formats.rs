//! Format identifiers, the video profile registry, and the mapping from the
//! request quality scalar to concrete encoder parameters.
//!
//! Identifiers are `mode-class/key` strings (`image/gif`, `video/h264-mp4`).
//! The registry is static; unknown keys inside a known mode-class fall back
//! to that class's default instead of failing the request.

use crate::error::{ReelforgeError, ReelforgeResult};

/// Animated-image container handled in process, without the external encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageContainer {
    Gif,
    Webp,
}

impl ImageContainer {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Gif => "gif",
            Self::Webp => "webp",
        }
    }
}

/// One argument slot in a standard profile's template. Exactly one quantizer
/// placeholder appears per template; everything else is literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateArg {
    Lit(&'static str),
    /// CRF-style placeholder, 0 best / 51 worst.
    Crf,
    /// Q-scale placeholder, 1 best / 31 worst.
    QScale,
}

/// How a profile turns a request into encoder parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileKind {
    /// Fixed template; the request quality fills the single placeholder.
    Standard { template: &'static [TemplateArg] },
    /// Caller-supplied [`AdvancedParams`] for a fixed codec. The quality
    /// scalar is ignored entirely.
    Advanced { codec: &'static str },
    /// As [`ProfileKind::Advanced`] plus a caller-supplied codec name.
    Manual,
    /// Professional tuning: preset and pixel format are fixed, the quality
    /// scalar is ignored, and only an explicit CRF override is honored.
    FixedHighFidelity {
        codec: &'static str,
        preset: &'static str,
        pix_fmt: &'static str,
        default_crf: u8,
    },
}

/// Static per-key configuration of one video output format.
#[derive(Debug, PartialEq, Eq)]
pub struct FormatProfile {
    pub key: &'static str,
    pub extension: &'static str,
    /// Informational only, surfaced in format listings.
    pub description: &'static str,
    /// Encoder input dimensions must be multiples of this per axis.
    pub dim_alignment: u32,
    pub kind: ProfileKind,
}

impl FormatProfile {
    /// MP4-family containers get `-movflags +faststart` appended so the moov
    /// atom lands at the front of the file.
    pub fn wants_faststart(&self) -> bool {
        matches!(self.extension, "mp4" | "mov")
    }
}

/// Registry of known video profiles. The first entry is the fallback for
/// unknown keys.
pub static VIDEO_PROFILES: &[FormatProfile] = &[
    FormatProfile {
        key: "h264-mp4",
        extension: "mp4",
        description: "H.264 MP4 - best compatibility",
        dim_alignment: 2,
        kind: ProfileKind::Standard {
            template: &[
                TemplateArg::Lit("-c:v"),
                TemplateArg::Lit("libx264"),
                TemplateArg::Lit("-preset"),
                TemplateArg::Lit("medium"),
                TemplateArg::Lit("-crf"),
                TemplateArg::Crf,
                TemplateArg::Lit("-pix_fmt"),
                TemplateArg::Lit("yuv420p"),
            ],
        },
    },
    FormatProfile {
        key: "h265-mp4",
        extension: "mp4",
        description: "H.265/HEVC MP4 - better compression",
        dim_alignment: 2,
        kind: ProfileKind::Standard {
            template: &[
                TemplateArg::Lit("-c:v"),
                TemplateArg::Lit("libx265"),
                TemplateArg::Lit("-preset"),
                TemplateArg::Lit("medium"),
                TemplateArg::Lit("-crf"),
                TemplateArg::Crf,
                TemplateArg::Lit("-pix_fmt"),
                TemplateArg::Lit("yuv420p"),
                TemplateArg::Lit("-tag:v"),
                TemplateArg::Lit("hvc1"),
            ],
        },
    },
    FormatProfile {
        key: "vp9-webm",
        extension: "webm",
        description: "VP9 WebM - web friendly",
        dim_alignment: 2,
        kind: ProfileKind::Standard {
            template: &[
                TemplateArg::Lit("-c:v"),
                TemplateArg::Lit("libvpx-vp9"),
                TemplateArg::Lit("-crf"),
                TemplateArg::Crf,
                TemplateArg::Lit("-b:v"),
                TemplateArg::Lit("0"),
                TemplateArg::Lit("-pix_fmt"),
                TemplateArg::Lit("yuv420p"),
            ],
        },
    },
    FormatProfile {
        key: "avi",
        extension: "avi",
        description: "Motion JPEG AVI",
        dim_alignment: 2,
        kind: ProfileKind::Standard {
            template: &[
                TemplateArg::Lit("-c:v"),
                TemplateArg::Lit("mjpeg"),
                TemplateArg::Lit("-q:v"),
                TemplateArg::QScale,
                TemplateArg::Lit("-pix_fmt"),
                TemplateArg::Lit("yuvj420p"),
            ],
        },
    },
    FormatProfile {
        key: "mov",
        extension: "mov",
        description: "QuickTime MOV",
        dim_alignment: 2,
        kind: ProfileKind::Standard {
            template: &[
                TemplateArg::Lit("-c:v"),
                TemplateArg::Lit("libx264"),
                TemplateArg::Lit("-preset"),
                TemplateArg::Lit("medium"),
                TemplateArg::Lit("-crf"),
                TemplateArg::Crf,
                TemplateArg::Lit("-pix_fmt"),
                TemplateArg::Lit("yuv420p"),
            ],
        },
    },
    FormatProfile {
        key: "h264-advanced",
        extension: "mp4",
        description: "H.264 MP4 with explicit encoder parameters",
        dim_alignment: 2,
        kind: ProfileKind::Advanced { codec: "libx264" },
    },
    FormatProfile {
        key: "h264-high444",
        extension: "mp4",
        description: "H.264 High 4:4:4 Predictive - studio color fidelity",
        dim_alignment: 2,
        kind: ProfileKind::FixedHighFidelity {
            codec: "libx264",
            preset: "slow",
            pix_fmt: "yuv444p",
            default_crf: 16,
        },
    },
    FormatProfile {
        key: "manual",
        extension: "mp4",
        description: "Caller-supplied codec and parameters",
        dim_alignment: 2,
        kind: ProfileKind::Manual,
    },
];

/// Looks up a video profile by key. Unknown keys resolve to the default
/// profile (`h264-mp4`) rather than failing.
pub fn resolve_video_profile(key: &str) -> &'static FormatProfile {
    VIDEO_PROFILES
        .iter()
        .find(|profile| profile.key == key)
        .unwrap_or(&VIDEO_PROFILES[0])
}

/// The dropdown-facing identifier space.
pub fn available_format_ids() -> Vec<String> {
    let mut ids = vec!["image/gif".to_string(), "image/webp".to_string()];
    ids.extend(VIDEO_PROFILES.iter().map(|p| format!("video/{}", p.key)));
    ids
}

/// Parsed form of a format identifier, routing to one of the two encode paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    AnimatedImage(ImageContainer),
    Video(&'static FormatProfile),
}

impl OutputFormat {
    /// Splits `mode-class/key`. Unknown keys inside a known class fall back
    /// to the class default; a malformed identifier or unknown class fails
    /// before any I/O happens.
    pub fn parse(id: &str) -> ReelforgeResult<Self> {
        let (mode, key) = id.split_once('/').ok_or_else(|| {
            ReelforgeError::validation(format!(
                "malformed format identifier {id:?}, expected <class>/<key>"
            ))
        })?;
        match mode {
            "image" => Ok(Self::AnimatedImage(match key {
                "webp" => ImageContainer::Webp,
                _ => ImageContainer::Gif,
            })),
            "video" => Ok(Self::Video(resolve_video_profile(key))),
            other => Err(ReelforgeError::validation(format!(
                "unknown format class {other:?} in {id:?}"
            ))),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::AnimatedImage(container) => container.extension(),
            Self::Video(profile) => profile.extension,
        }
    }
}

/// Explicit encoder parameters for the advanced, manual, and professional
/// profiles. Whenever these are in play the request quality scalar is
/// ignored and color metadata is always written.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AdvancedParams {
    pub preset: Option<String>,
    pub tune: Option<String>,
    pub crf: Option<u8>,
    pub pix_fmt: Option<String>,
    /// `pc` (full range) or `tv` (limited).
    pub color_range: Option<String>,
    /// Also used for primaries and transfer characteristics.
    pub colorspace: Option<String>,
    /// Free-form `-x264-params` style string, passed through verbatim.
    pub codec_params: Option<String>,
    /// Caps the video bitrate when above zero.
    pub bitrate_kbps: Option<u32>,
    /// Manual profiles only.
    pub codec: Option<String>,
}

/// Maps quality 1-100 linearly onto CRF 51-0.
pub fn quality_to_crf(quality: u8) -> u8 {
    let q = f64::from(quality.clamp(1, 100));
    ((100.0 - q) * 51.0 / 99.0).round() as u8
}

/// Maps quality 1-100 onto the inverted MJPEG q scale (1 best, 31 worst).
pub fn quality_to_q(quality: u8) -> u8 {
    let q = f64::from(quality.clamp(1, 100));
    let value = (1.0 + (100.0 - q) / 100.0 * 30.0).round() as u8;
    value.clamp(1, 31)
}

fn is_high444_pix_fmt(pix_fmt: &str) -> bool {
    pix_fmt.starts_with("yuv444")
}

/// Resolves a profile into the concrete encoder argument list for one
/// request. For standard profiles the quality scalar fills the template
/// placeholder; otherwise the caller's [`AdvancedParams`] drive everything.
pub fn resolve_encoder_args(
    profile: &FormatProfile,
    quality: u8,
    advanced: Option<&AdvancedParams>,
) -> ReelforgeResult<Vec<String>> {
    match &profile.kind {
        ProfileKind::Standard { template } => Ok(template
            .iter()
            .map(|arg| match arg {
                TemplateArg::Lit(s) => (*s).to_string(),
                TemplateArg::Crf => quality_to_crf(quality).to_string(),
                TemplateArg::QScale => quality_to_q(quality).to_string(),
            })
            .collect()),
        ProfileKind::Advanced { codec } => {
            let params = advanced.cloned().unwrap_or_default();
            Ok(advanced_args(codec, &params))
        }
        ProfileKind::Manual => {
            let params = advanced.cloned().unwrap_or_default();
            let codec = params.codec.clone().ok_or_else(|| {
                ReelforgeError::validation("manual profile requires an explicit codec name")
            })?;
            Ok(advanced_args(&codec, &params))
        }
        ProfileKind::FixedHighFidelity {
            codec,
            preset,
            pix_fmt,
            default_crf,
        } => {
            let mut params = advanced.cloned().unwrap_or_default();
            params.preset = Some((*preset).to_string());
            params.pix_fmt = Some((*pix_fmt).to_string());
            params.crf = Some(params.crf.unwrap_or(*default_crf).min(51));
            Ok(advanced_args(codec, &params))
        }
    }
}

/// Builds the argument list for an explicit-parameter encode. Argument order
/// matters to some encoders: codec and profile first, then rate control,
/// then color metadata, then the free-form parameter string.
fn advanced_args(codec: &str, params: &AdvancedParams) -> Vec<String> {
    let pix_fmt = params.pix_fmt.as_deref().unwrap_or("yuv420p");
    let preset = params.preset.as_deref().unwrap_or("medium");
    let crf = params.crf.unwrap_or(23).min(51);
    let color_range = params.color_range.as_deref().unwrap_or("pc");
    let colorspace = params.colorspace.as_deref().unwrap_or("bt709");

    let mut args: Vec<String> = vec!["-c:v".into(), codec.into()];
    if is_high444_pix_fmt(pix_fmt) {
        args.push("-profile:v".into());
        args.push("high444".into());
    }
    args.extend([
        "-pix_fmt".into(),
        pix_fmt.into(),
        "-crf".into(),
        crf.to_string(),
        "-preset".into(),
        preset.into(),
    ]);
    if let Some(tune) = params
        .tune
        .as_deref()
        .filter(|t| !t.is_empty() && *t != "none")
    {
        args.push("-tune".into());
        args.push(tune.into());
    }
    if let Some(kbps) = params.bitrate_kbps.filter(|k| *k > 0) {
        args.push("-b:v".into());
        args.push(format!("{kbps}k"));
    }
    args.extend([
        "-color_range".into(),
        color_range.into(),
        "-colorspace".into(),
        colorspace.into(),
        "-color_primaries".into(),
        colorspace.into(),
        "-color_trc".into(),
        colorspace.into(),
    ]);
    if let Some(extra) = params
        .codec_params
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        args.push("-x264-params".into());
        args.push(extra.into());
    }
    args
}
