//! Frame acquisition: pulls still frames off a video source, encodes them,
//! and picks the one worth sending to the model.

use std::path::{Path, PathBuf};
use std::time::Duration;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::RgbImage;
use tracing::{debug, info};

use crate::error::{ClientError, ClientResult};
use crate::types::{ImagePayload, MediaType};

pub const MAX_CAPTURE_WIDTH: u32 = 960;
pub const SINGLE_SHOT_QUALITY: u8 = 85;
/// Lower than single-shot to keep a whole burst cheap.
pub const BURST_QUALITY: u8 = 70;
pub const DEFAULT_BURST_COUNT: usize = 6;
pub const DEFAULT_BURST_GAP: Duration = Duration::from_millis(100);

/// Anything that can hand out the frame currently on screen.
pub trait VideoSource {
    /// Size of the current frame. Either side is 0 while the source is not
    /// ready.
    fn dimensions(&self) -> (u32, u32);

    /// The current frame. Live sources move on by themselves; recorded
    /// sources advance one frame per call.
    fn grab(&mut self) -> Option<RgbImage>;
}

/// Captures the current frame as a JPEG, downscaled to at most
/// `MAX_CAPTURE_WIDTH` pixels wide. Fails with `NoFrame` when the source
/// isn't ready.
pub fn capture<S: VideoSource + ?Sized>(source: &mut S, quality: u8) -> ClientResult<ImagePayload> {
    let (width, height) = source.dimensions();
    if width == 0 || height == 0 {
        return Err(ClientError::NoFrame);
    }

    let frame = source.grab().ok_or(ClientError::NoFrame)?;
    let frame = downscale(frame);

    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100)).encode_image(&frame)?;

    let payload = ImagePayload::from_bytes(MediaType::Jpeg, &buf);
    debug!(
        width = frame.width(),
        height = frame.height(),
        len = payload.encoded_len(),
        "Captured frame"
    );
    Ok(payload)
}

fn downscale(frame: RgbImage) -> RgbImage {
    let (width, height) = frame.dimensions();
    if width <= MAX_CAPTURE_WIDTH {
        return frame;
    }
    let scaled_height = ((height as u64 * MAX_CAPTURE_WIDTH as u64) / width as u64).max(1) as u32;
    imageops::resize(&frame, MAX_CAPTURE_WIDTH, scaled_height, FilterType::Triangle)
}

/// Captures `count` frames, `gap` apart, and keeps those that pass the size
/// check. Fails with `NoValidFrames` when none do.
pub async fn capture_burst<S: VideoSource + ?Sized>(
    source: &mut S,
    count: usize,
    gap: Duration,
) -> ClientResult<Vec<ImagePayload>> {
    let mut frames = Vec::with_capacity(count);
    for i in 0..count {
        if i > 0 {
            tokio::time::sleep(gap).await;
        }
        match capture(source, BURST_QUALITY) {
            Ok(frame) => frames.push(frame),
            Err(ClientError::NoFrame) => debug!(index = i, "Source not ready, skipping frame"),
            Err(e) => return Err(e),
        }
    }

    let captured = frames.len();
    frames.retain(ImagePayload::is_valid);
    info!(requested = count, captured, valid = frames.len(), "Burst captured");

    if frames.is_empty() {
        return Err(ClientError::NoValidFrames);
    }
    Ok(frames)
}

/// Picks the valid frame with the largest encoded payload. Sharper, more
/// detailed frames compress worse, so size stands in for quality.
pub fn pick_best_frame(frames: &[ImagePayload]) -> Option<&ImagePayload> {
    frames
        .iter()
        .filter(|f| f.is_valid())
        .max_by_key(|f| f.encoded_len())
}

/// A recorded "camera": the images in a directory, replayed in name order
/// and looped.
pub struct FrameDirectory {
    frames: Vec<PathBuf>,
    cursor: usize,
}

impl FrameDirectory {
    pub fn open(dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let mut frames: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_image_file(path))
            .collect();
        frames.sort();
        Ok(Self { frames, cursor: 0 })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    fn current(&self) -> Option<&PathBuf> {
        self.frames.get(self.cursor)
    }
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"))
        .unwrap_or(false)
}

impl VideoSource for FrameDirectory {
    fn dimensions(&self) -> (u32, u32) {
        self.current()
            .and_then(|path| image::image_dimensions(path).ok())
            .unwrap_or((0, 0))
    }

    fn grab(&mut self) -> Option<RgbImage> {
        let path = self.current()?.clone();
        self.cursor = (self.cursor + 1) % self.frames.len();
        match image::open(&path) {
            Ok(img) => Some(img.to_rgb8()),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Unreadable frame");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MIN_FRAME_LEN;
    use std::cell::Cell;

    /// Deterministic noise, so frames compress badly like real footage.
    fn noise(width: u32, height: u32, seed: u32) -> RgbImage {
        let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
        RgbImage::from_fn(width, height, |_, _| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            let [r, g, b, _] = state.to_le_bytes();
            image::Rgb([r, g, b])
        })
    }

    /// Scripted frames. `None` is a moment where the camera isn't ready; a
    /// live source moves past it on its own.
    struct Synthetic {
        frames: Vec<Option<RgbImage>>,
        next: Cell<usize>,
    }

    impl Synthetic {
        fn new(frames: Vec<Option<RgbImage>>) -> Self {
            Self {
                frames,
                next: Cell::new(0),
            }
        }
    }

    impl VideoSource for Synthetic {
        fn dimensions(&self) -> (u32, u32) {
            match self.frames.get(self.next.get()) {
                Some(Some(img)) => img.dimensions(),
                Some(None) => {
                    self.next.set(self.next.get() + 1);
                    (0, 0)
                }
                None => (0, 0),
            }
        }

        fn grab(&mut self) -> Option<RgbImage> {
            let index = self.next.get();
            self.next.set(index + 1);
            self.frames.get(index).cloned().flatten()
        }
    }

    fn decoded_size(payload: &ImagePayload) -> (u32, u32) {
        let bytes = payload.decode().unwrap();
        let img = image::load_from_memory(&bytes).unwrap();
        (img.width(), img.height())
    }

    fn payload(len: usize) -> ImagePayload {
        ImagePayload::new(MediaType::Jpeg, "A".repeat(len))
    }

    #[test]
    fn capture_downscales_wide_frames_keeping_aspect() {
        let mut source = Synthetic::new(vec![Some(noise(1280, 720, 1))]);
        let frame = capture(&mut source, SINGLE_SHOT_QUALITY).unwrap();
        assert_eq!(frame.media_type, MediaType::Jpeg);
        assert_eq!(decoded_size(&frame), (960, 540));
        assert!(frame.is_valid());
    }

    #[test]
    fn capture_never_upscales() {
        let mut source = Synthetic::new(vec![Some(noise(640, 480, 2))]);
        let frame = capture(&mut source, SINGLE_SHOT_QUALITY).unwrap();
        assert_eq!(decoded_size(&frame), (640, 480));
    }

    #[test]
    fn capture_fails_when_source_not_ready() {
        let mut source = Synthetic::new(vec![None]);
        assert!(matches!(
            capture(&mut source, SINGLE_SHOT_QUALITY),
            Err(ClientError::NoFrame)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn burst_is_sequential_and_drops_tiny_frames() {
        let blank = RgbImage::new(2, 2);
        let mut source = Synthetic::new(vec![
            Some(noise(320, 240, 3)),
            Some(blank.clone()),
            None,
            Some(noise(320, 240, 4)),
        ]);

        let start = tokio::time::Instant::now();
        let frames = capture_burst(&mut source, 4, DEFAULT_BURST_GAP).await.unwrap();

        assert_eq!(start.elapsed(), DEFAULT_BURST_GAP * 3);
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.encoded_len() > MIN_FRAME_LEN));
    }

    #[tokio::test(start_paused = true)]
    async fn burst_with_nothing_usable_reports_no_valid_frames() {
        let mut source = Synthetic::new(vec![None, Some(RgbImage::new(2, 2)), None]);
        let err = capture_burst(&mut source, 3, DEFAULT_BURST_GAP)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::NoValidFrames));
    }

    #[test]
    fn best_frame_is_largest_valid_payload() {
        let frames: Vec<_> = [3000, 5000, 1000, 7000, 1100, 1300]
            .into_iter()
            .map(payload)
            .collect();
        assert_eq!(frames.iter().filter(|f| f.is_valid()).count(), 4);
        assert_eq!(pick_best_frame(&frames).unwrap().encoded_len(), 7000);
    }

    #[test]
    fn best_frame_is_none_when_all_are_too_small() {
        let frames: Vec<_> = [10, 1199, 1200].into_iter().map(payload).collect();
        assert!(pick_best_frame(&frames).is_none());
        assert!(pick_best_frame(&[]).is_none());
    }

    #[test]
    fn frame_directory_replays_images_in_order() {
        let dir = std::env::temp_dir().join(format!("stepcheck-frames-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        noise(40, 30, 5).save(dir.join("b.png")).unwrap();
        noise(20, 10, 6).save(dir.join("a.png")).unwrap();
        std::fs::write(dir.join("notes.txt"), "not a frame").unwrap();

        let mut source = FrameDirectory::open(&dir).unwrap();
        assert_eq!(source.len(), 2);
        assert_eq!(source.dimensions(), (20, 10));
        assert_eq!(source.grab().unwrap().dimensions(), (20, 10));
        assert_eq!(source.dimensions(), (40, 30));
        source.grab().unwrap();
        assert_eq!(source.dimensions(), (20, 10));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn empty_frame_directory_is_never_ready() {
        let dir = std::env::temp_dir().join(format!("stepcheck-empty-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let mut source = FrameDirectory::open(&dir).unwrap();
        assert!(source.is_empty());
        assert!(matches!(capture(&mut source, 80), Err(ClientError::NoFrame)));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
