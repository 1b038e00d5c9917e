//! Frame batches and the normalization of host input into RGB24 frames.
//!
//! Hosts hand over either ready pixel frames or a latent batch plus a decode
//! capability. Everything downstream of [`normalize`] works on 8-bit RGB.

use crate::error::{ReelforgeError, ReelforgeResult};

/// Upper bound on `frames x pixels` per decode call, bounding decoder peak
/// memory. Sixteen full-HD frames.
const DECODE_PIXEL_BUDGET: u64 = 1920 * 1080 * 16;

/// An ordered sequence of RGB24 frames of identical dimensions.
///
/// Padding and other geometry changes never mutate a batch; they produce new
/// buffers downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBatch {
    width: u32,
    height: u32,
    frames: Vec<Vec<u8>>,
}

impl FrameBatch {
    /// A batch with no frames and no dimensions. Pipeline entry points treat
    /// this as a no-op rather than an error.
    pub fn empty() -> Self {
        Self {
            width: 0,
            height: 0,
            frames: Vec::new(),
        }
    }

    /// Wraps pre-quantized RGB24 frames, checking every buffer length.
    pub fn from_rgb8(width: u32, height: u32, frames: Vec<Vec<u8>>) -> ReelforgeResult<Self> {
        let frame_len = Self::frame_len(width, height)?;
        for (i, frame) in frames.iter().enumerate() {
            if frame.len() != frame_len {
                return Err(ReelforgeError::unsupported_input(format!(
                    "frame {i} holds {} bytes, expected {frame_len} for {width}x{height} RGB",
                    frame.len()
                )));
            }
        }
        Ok(Self {
            width,
            height,
            frames,
        })
    }

    /// Quantizes `[0, 1]` float pixels to 8-bit RGB. Out-of-range values
    /// clamp; `data` must divide evenly into whole frames.
    pub fn from_rgb_f32(width: u32, height: u32, data: &[f32]) -> ReelforgeResult<Self> {
        let frame_len = Self::frame_len(width, height)?;
        if data.len() % frame_len != 0 {
            return Err(ReelforgeError::unsupported_input(format!(
                "{} floats do not divide into {width}x{height} RGB frames",
                data.len()
            )));
        }
        let frames = data
            .chunks_exact(frame_len)
            .map(|chunk| chunk.iter().map(|v| quantize(*v)).collect())
            .collect();
        Ok(Self {
            width,
            height,
            frames,
        })
    }

    fn frame_len(width: u32, height: u32) -> ReelforgeResult<usize> {
        if width == 0 || height == 0 {
            return Err(ReelforgeError::unsupported_input(
                "frame dimensions must be nonzero",
            ));
        }
        usize::try_from(u64::from(width) * u64::from(height) * 3)
            .map_err(|_| ReelforgeError::unsupported_input("frame dimensions overflow"))
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[Vec<u8>] {
        &self.frames
    }

    pub fn first_frame(&self) -> Option<&[u8]> {
        self.frames.first().map(Vec::as_slice)
    }

    /// Appends another batch of the same dimensions.
    pub fn append(&mut self, other: FrameBatch) -> ReelforgeResult<()> {
        if other.is_empty() {
            return Ok(());
        }
        if self.width != other.width || self.height != other.height {
            return Err(ReelforgeError::unsupported_input(format!(
                "cannot concatenate {}x{} frames onto {}x{} batch",
                other.width, other.height, self.width, self.height
            )));
        }
        self.frames.extend(other.frames);
        Ok(())
    }

    /// Appends the interior frames in reverse so playback bounces, giving
    /// `2N - 2` frames for `N >= 2`. First and last frames appear once; a
    /// single-frame batch is returned unchanged.
    pub fn pingpong(mut self) -> Self {
        if self.frames.len() > 2 {
            let interior: Vec<Vec<u8>> = self.frames[1..self.frames.len() - 1]
                .iter()
                .rev()
                .cloned()
                .collect();
            self.frames.extend(interior);
        }
        self
    }
}

fn quantize(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// A batch of latent-space frames awaiting decode, laid out
/// `frames x channels x height x width`.
#[derive(Debug, Clone, PartialEq)]
pub struct LatentBatch {
    pub frames: usize,
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub data: Vec<f32>,
}

impl LatentBatch {
    pub fn new(
        frames: usize,
        channels: usize,
        height: usize,
        width: usize,
        data: Vec<f32>,
    ) -> ReelforgeResult<Self> {
        let expected = frames
            .checked_mul(channels)
            .and_then(|v| v.checked_mul(height))
            .and_then(|v| v.checked_mul(width))
            .ok_or_else(|| ReelforgeError::unsupported_input("latent dimensions overflow"))?;
        if data.len() != expected {
            return Err(ReelforgeError::unsupported_input(format!(
                "latent data holds {} floats, expected {expected}",
                data.len()
            )));
        }
        Ok(Self {
            frames,
            channels,
            height,
            width,
            data,
        })
    }

    fn slice(&self, start: usize, count: usize) -> LatentBatch {
        let stride = self.channels * self.height * self.width;
        LatentBatch {
            frames: count,
            channels: self.channels,
            height: self.height,
            width: self.width,
            data: self.data[start * stride..(start + count) * stride].to_vec(),
        }
    }
}

/// Decode capability supplied by the host. Errors propagate as fatal.
pub trait LatentDecoder {
    /// Pixel frames are this many times larger than the latent grid per axis.
    fn upscale_factor(&self) -> u32 {
        8
    }

    fn decode(&self, batch: &LatentBatch) -> ReelforgeResult<FrameBatch>;
}

/// What the host handed over. Constructing the right variant is the host's
/// contract; see [`looks_like_latent`] for hosts that only carry shape
/// metadata.
#[derive(Debug, Clone)]
pub enum FrameSource {
    Pixels(FrameBatch),
    Latent(LatentBatch),
}

/// Channel-count heuristic for tensors of unknown kind. Latent grids carry 4
/// or 16 channels where pixel tensors carry 3. Prefer constructing
/// [`FrameSource`] explicitly.
pub fn looks_like_latent(channels: usize) -> bool {
    matches!(channels, 4 | 16)
}

/// Resolves a frame source into pixel frames, decoding latents in bounded
/// sub-batches. Latent input without a decoder fails as unsupported.
pub fn normalize(
    source: FrameSource,
    decoder: Option<&dyn LatentDecoder>,
) -> ReelforgeResult<FrameBatch> {
    match source {
        FrameSource::Pixels(batch) => Ok(batch),
        FrameSource::Latent(latent) => {
            let decoder = decoder.ok_or_else(|| {
                ReelforgeError::unsupported_input(
                    "latent input requires a decode capability and none was supplied",
                )
            })?;
            decode_in_batches(&latent, decoder)
        }
    }
}

/// How many latent frames fit one decode call at the given output size.
fn frames_per_decode_batch(out_width: u64, out_height: u64) -> usize {
    let pixels = (out_width * out_height).max(1);
    usize::try_from((DECODE_PIXEL_BUDGET / pixels).max(1)).unwrap_or(1)
}

fn decode_in_batches(
    latent: &LatentBatch,
    decoder: &dyn LatentDecoder,
) -> ReelforgeResult<FrameBatch> {
    if latent.frames == 0 {
        return Ok(FrameBatch::empty());
    }
    let scale = u64::from(decoder.upscale_factor().max(1));
    let per_batch =
        frames_per_decode_batch(latent.width as u64 * scale, latent.height as u64 * scale);

    let mut out: Option<FrameBatch> = None;
    let mut start = 0;
    while start < latent.frames {
        let count = per_batch.min(latent.frames - start);
        let decoded = decoder.decode(&latent.slice(start, count))?;
        match &mut out {
            None => out = Some(decoded),
            Some(batch) => batch.append(decoded)?,
        }
        start += count;
    }
    Ok(out.unwrap_or_else(FrameBatch::empty))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn batch_of(values: &[u8]) -> FrameBatch {
        let frames = values.iter().map(|v| vec![*v, *v, *v]).collect();
        FrameBatch::from_rgb8(1, 1, frames).unwrap()
    }

    fn first_bytes(batch: &FrameBatch) -> Vec<u8> {
        batch.frames().iter().map(|f| f[0]).collect()
    }

    #[test]
    fn pingpong_mirrors_interior_frames() {
        let out = batch_of(&[1, 2, 3, 4, 5]).pingpong();
        assert_eq!(first_bytes(&out), vec![1, 2, 3, 4, 5, 4, 3, 2]);
        assert_eq!(out.len(), 8);
    }

    #[test]
    fn pingpong_degenerate_lengths() {
        assert_eq!(first_bytes(&batch_of(&[7]).pingpong()), vec![7]);
        assert_eq!(first_bytes(&batch_of(&[7, 9]).pingpong()), vec![7, 9]);
        assert!(FrameBatch::empty().pingpong().is_empty());
    }

    #[test]
    fn quantization_clamps_and_rounds() {
        let data = [-0.5, 0.0, 0.25, 1.0, 2.0, 0.996];
        let batch = FrameBatch::from_rgb_f32(1, 2, &data).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.frames()[0], vec![0, 0, 64, 255, 255, 254]);
    }

    #[test]
    fn ragged_input_is_rejected() {
        let err = FrameBatch::from_rgb8(2, 1, vec![vec![0; 6], vec![0; 5]]);
        assert!(matches!(err, Err(ReelforgeError::UnsupportedInput(_))));

        let err = FrameBatch::from_rgb_f32(2, 2, &[0.0; 13]);
        assert!(matches!(err, Err(ReelforgeError::UnsupportedInput(_))));
    }

    #[test]
    fn append_requires_matching_dimensions() {
        let mut a = batch_of(&[1]);
        let b = FrameBatch::from_rgb8(2, 1, vec![vec![0; 6]]).unwrap();
        assert!(matches!(
            a.append(b),
            Err(ReelforgeError::UnsupportedInput(_))
        ));
        assert_eq!(a.len(), 1);
    }

    #[test]
    fn batch_sizing_respects_pixel_budget() {
        // Sixteen full-HD frames fit exactly.
        assert_eq!(frames_per_decode_batch(1920, 1080), 16);
        assert_eq!(frames_per_decode_batch(3840, 2160), 4);
        // Never zero, even past the budget.
        assert_eq!(frames_per_decode_batch(10_000, 10_000), 1);
        assert!(frames_per_decode_batch(16, 16) > 100_000);
    }

    /// Decoder that tags each output frame with the latent value it saw, so
    /// ordering across sub-batches is observable. Claims a huge upscale
    /// factor to force one-frame decode calls.
    struct TaggingDecoder {
        calls: RefCell<Vec<usize>>,
    }

    impl LatentDecoder for TaggingDecoder {
        fn upscale_factor(&self) -> u32 {
            8192
        }

        fn decode(&self, batch: &LatentBatch) -> ReelforgeResult<FrameBatch> {
            self.calls.borrow_mut().push(batch.frames);
            let frames = (0..batch.frames)
                .map(|i| {
                    let tag = batch.data[i * batch.channels * batch.height * batch.width] as u8;
                    vec![tag, 0, 0]
                })
                .collect();
            FrameBatch::from_rgb8(1, 1, frames)
        }
    }

    #[test]
    fn latent_decode_batches_and_preserves_order() {
        let decoder = TaggingDecoder {
            calls: RefCell::new(Vec::new()),
        };
        // 8192x upscale of a 1x1 grid busts the budget, so one frame per call.
        let data: Vec<f32> = (0..5).map(|i| i as f32).collect();
        let latent = LatentBatch::new(5, 1, 1, 1, data).unwrap();

        let batch = normalize(FrameSource::Latent(latent), Some(&decoder)).unwrap();
        assert_eq!(first_bytes(&batch), vec![0, 1, 2, 3, 4]);
        assert_eq!(*decoder.calls.borrow(), vec![1, 1, 1, 1, 1]);
    }

    #[test]
    fn latent_without_decoder_is_unsupported() {
        let latent = LatentBatch::new(1, 4, 2, 2, vec![0.0; 16]).unwrap();
        assert!(matches!(
            normalize(FrameSource::Latent(latent), None),
            Err(ReelforgeError::UnsupportedInput(_))
        ));
    }

    #[test]
    fn empty_latent_decodes_to_empty_batch() {
        let decoder = TaggingDecoder {
            calls: RefCell::new(Vec::new()),
        };
        let latent = LatentBatch::new(0, 4, 2, 2, Vec::new()).unwrap();
        let batch = normalize(FrameSource::Latent(latent), Some(&decoder)).unwrap();
        assert!(batch.is_empty());
        assert!(decoder.calls.borrow().is_empty());
    }

    #[test]
    fn pixels_pass_through_untouched() {
        let batch = batch_of(&[9, 8]);
        let out = normalize(FrameSource::Pixels(batch.clone()), None).unwrap();
        assert_eq!(out, batch);
    }

    #[test]
    fn latent_shape_heuristic() {
        assert!(looks_like_latent(4));
        assert!(looks_like_latent(16));
        assert!(!looks_like_latent(3));
        assert!(!looks_like_latent(1));
    }
}
