//! In-process animated image writers. GIF and WebP never touch the external
//! encoder; frames are quantized and written directly.

use std::fs::File;
use std::path::Path;

use crate::error::{ReelforgeError, ReelforgeResult};
use crate::formats::ImageContainer;
use crate::frames::FrameBatch;
use crate::pipeline::ProgressSink;

/// Per-request knobs for the animated-image path.
#[derive(Debug, Clone, Copy)]
pub struct AnimatedImageSettings {
    pub container: ImageContainer,
    pub frame_rate: f32,
    /// 0 means loop forever.
    pub loop_count: u32,
    /// 1-100, WebP only; GIF quantization runs at a fixed speed.
    pub quality: u8,
}

/// Display time of one frame in milliseconds, never below 1.
fn frame_duration_ms(frame_rate: f32) -> u32 {
    ((1000.0 / f64::from(frame_rate)).round() as u32).max(1)
}

/// Writes the batch as an animated image at `path`, advancing `progress`
/// once per frame. An empty batch is a validation error; callers decide the
/// no-op case earlier.
pub fn write_animated_image(
    path: &Path,
    batch: &FrameBatch,
    settings: &AnimatedImageSettings,
    progress: &dyn ProgressSink,
) -> ReelforgeResult<()> {
    if batch.is_empty() {
        return Err(ReelforgeError::validation(
            "animated image output requires at least one frame",
        ));
    }
    match settings.container {
        ImageContainer::Gif => write_gif(path, batch, settings, progress),
        ImageContainer::Webp => write_webp(path, batch, settings, progress),
    }
}

fn write_gif(
    path: &Path,
    batch: &FrameBatch,
    settings: &AnimatedImageSettings,
    progress: &dyn ProgressSink,
) -> ReelforgeResult<()> {
    let width = u16::try_from(batch.width()).map_err(|_| {
        ReelforgeError::validation(format!("gif width {} exceeds 65535", batch.width()))
    })?;
    let height = u16::try_from(batch.height()).map_err(|_| {
        ReelforgeError::validation(format!("gif height {} exceeds 65535", batch.height()))
    })?;
    // GIF timing is in centiseconds.
    let delay = ((frame_duration_ms(settings.frame_rate) as f64) / 10.0).round().max(1.0) as u16;
    let repeat = match settings.loop_count {
        0 => gif::Repeat::Infinite,
        n => gif::Repeat::Finite(n.min(u32::from(u16::MAX)) as u16),
    };

    let file = File::create(path)?;
    let mut encoder = gif::Encoder::new(file, width, height, &[])
        .map_err(|e| ReelforgeError::image_encode(format!("gif header: {e}")))?;
    encoder
        .set_repeat(repeat)
        .map_err(|e| ReelforgeError::image_encode(format!("gif repeat: {e}")))?;

    for data in batch.frames() {
        // Speed 10 favors encode time over palette quality.
        let mut frame = gif::Frame::from_rgb_speed(width, height, data, 10);
        frame.delay = delay;
        frame.dispose = gif::DisposalMethod::Background;
        encoder
            .write_frame(&frame)
            .map_err(|e| ReelforgeError::image_encode(format!("gif frame: {e}")))?;
        progress.frame_done();
    }
    Ok(())
}

fn write_webp(
    path: &Path,
    batch: &FrameBatch,
    settings: &AnimatedImageSettings,
    progress: &dyn ProgressSink,
) -> ReelforgeResult<()> {
    let mut config = webp::WebPConfig::new()
        .map_err(|_| ReelforgeError::image_encode("libwebp rejected its default configuration"))?;
    config.quality = f32::from(settings.quality);
    config.method = 4;

    let frame_ms = frame_duration_ms(settings.frame_rate) as i32;
    let mut encoder = webp::AnimEncoder::new(batch.width(), batch.height(), &config);
    encoder.set_loop_count(settings.loop_count.min(i32::MAX as u32) as i32);
    for (i, data) in batch.frames().iter().enumerate() {
        let timestamp = i as i32 * frame_ms;
        encoder.add_frame(webp::AnimFrame::from_rgb(
            data,
            batch.width(),
            batch.height(),
            timestamp,
        ));
        progress.frame_done();
    }
    let bytes = encoder
        .try_encode()
        .map_err(|e| ReelforgeError::image_encode(format!("animated webp encode: {e:?}")))?;
    std::fs::write(path, &*bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::NoProgress;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn gradient_batch(frames: usize) -> FrameBatch {
        let raw: Vec<Vec<u8>> = (0..frames)
            .map(|i| {
                let v = (i * 40) as u8;
                vec![v; 2 * 2 * 3]
            })
            .collect();
        FrameBatch::from_rgb8(2, 2, raw).unwrap()
    }

    struct CountingSink(AtomicUsize);

    impl ProgressSink for CountingSink {
        fn frame_done(&self) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn frame_duration_rounds_to_milliseconds() {
        assert_eq!(frame_duration_ms(24.0), 42);
        assert_eq!(frame_duration_ms(50.0), 20);
        assert_eq!(frame_duration_ms(8.0), 125);
        // Degenerate rates never yield a zero duration.
        assert_eq!(frame_duration_ms(4000.0), 1);
    }

    #[test]
    fn gif_roundtrips_frame_count() {
        use image::AnimationDecoder;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("anim.gif");
        let settings = AnimatedImageSettings {
            container: ImageContainer::Gif,
            frame_rate: 24.0,
            loop_count: 0,
            quality: 85,
        };
        write_animated_image(&path, &gradient_batch(3), &settings, &NoProgress).unwrap();

        let file = std::fs::File::open(&path).unwrap();
        let decoder = image::codecs::gif::GifDecoder::new(std::io::BufReader::new(file)).unwrap();
        let frames = decoder.into_frames().collect_frames().unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].buffer().width(), 2);
        assert_eq!(frames[0].buffer().height(), 2);
    }

    #[test]
    fn webp_writes_riff_container() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("anim.webp");
        let settings = AnimatedImageSettings {
            container: ImageContainer::Webp,
            frame_rate: 12.0,
            loop_count: 2,
            quality: 70,
        };
        write_animated_image(&path, &gradient_batch(2), &settings, &NoProgress).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WEBP");
    }

    #[test]
    fn progress_advances_once_per_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("anim.gif");
        let settings = AnimatedImageSettings {
            container: ImageContainer::Gif,
            frame_rate: 10.0,
            loop_count: 1,
            quality: 50,
        };
        let sink = CountingSink(AtomicUsize::new(0));
        write_animated_image(&path, &gradient_batch(4), &settings, &sink).unwrap();
        assert_eq!(sink.0.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn empty_batch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("anim.gif");
        let settings = AnimatedImageSettings {
            container: ImageContainer::Gif,
            frame_rate: 24.0,
            loop_count: 0,
            quality: 85,
        };
        assert!(matches!(
            write_animated_image(&path, &FrameBatch::empty(), &settings, &NoProgress),
            Err(ReelforgeError::Validation(_))
        ));
    }
}
