//! Frame sources the host can composite: an animated test pattern standing in
//! for a game's draw target, or an image file decoded off the render thread.

use std::path::{Path, PathBuf};
use std::thread;

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Receiver, TryRecvError};
use image::imageops::FilterType;
use image::{Rgba, RgbaImage};
use renderer::{AssetState, FrameSource};
use tracing::{info, warn};

const BAR_COLOURS: [[u8; 3]; 8] = [
    [235, 235, 235],
    [235, 235, 16],
    [16, 235, 235],
    [16, 235, 16],
    [235, 16, 235],
    [235, 16, 16],
    [16, 16, 235],
    [16, 16, 16],
];

/// Colour bars with a bouncing block, redrawn for each timestamp.
pub struct TestPattern {
    image: RgbaImage,
}

impl TestPattern {
    pub fn new(size: (u32, u32)) -> Self {
        let mut pattern = Self {
            image: RgbaImage::new(size.0, size.1),
        };
        pattern.draw(0.0);
        pattern
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    pub fn draw(&mut self, timestamp_ms: f64) {
        let (width, height) = self.image.dimensions();
        if width == 0 || height == 0 {
            return;
        }
        let bar_width = (width / BAR_COLOURS.len() as u32).max(1);
        let block = (width.min(height) / 8).max(1);
        let t = timestamp_ms / 1000.0;
        let travel_x = (width - block.min(width)) as f64;
        let travel_y = (height - block.min(height)) as f64;
        let block_x = (triangle_wave(t * 0.37) * travel_x) as u32;
        let block_y = (triangle_wave(t * 0.23) * travel_y) as u32;

        for (x, y, pixel) in self.image.enumerate_pixels_mut() {
            let in_block =
                (block_x..block_x + block).contains(&x) && (block_y..block_y + block).contains(&y);
            *pixel = if in_block {
                Rgba([255, 140, 0, 255])
            } else {
                let bar = ((x / bar_width) as usize).min(BAR_COLOURS.len() - 1);
                let [r, g, b] = BAR_COLOURS[bar];
                Rgba([r, g, b, 255])
            };
        }
    }
}

fn triangle_wave(phase: f64) -> f64 {
    let fraction = phase.fract();
    if fraction < 0.5 {
        fraction * 2.0
    } else {
        2.0 - fraction * 2.0
    }
}

impl FrameSource for TestPattern {
    fn size(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }
}

/// Decodes and scales `path` to exactly `size`.
pub fn load_image(path: &Path, size: (u32, u32)) -> Result<RgbaImage> {
    let decoded = image::open(path)
        .with_context(|| format!("failed to load image {}", path.display()))?
        .to_rgba8();
    if decoded.dimensions() == size {
        return Ok(decoded);
    }
    Ok(image::imageops::resize(
        &decoded,
        size.0,
        size.1,
        FilterType::Triangle,
    ))
}

/// Image file loaded on a worker thread. Reports `Pending` until the decode
/// finishes and `Failed` if it could not be read.
pub struct ImageSource {
    path: PathBuf,
    image: RgbaImage,
    state: AssetState,
    receiver: Option<Receiver<Result<RgbaImage>>>,
}

impl ImageSource {
    pub fn spawn(path: PathBuf, size: (u32, u32)) -> Self {
        let (sender, receiver) = bounded(1);
        let worker_path = path.clone();
        let spawned = thread::Builder::new()
            .name("frame-source-loader".into())
            .spawn(move || {
                let _ = sender.send(load_image(&worker_path, size));
            });

        let (state, receiver) = match spawned {
            Ok(_) => (AssetState::Pending, Some(receiver)),
            Err(err) => {
                warn!(error = %err, "failed to start image loader");
                (AssetState::Failed, None)
            }
        };
        Self {
            path,
            image: RgbaImage::new(size.0, size.1),
            state,
            receiver,
        }
    }

    /// Picks up a finished decode. Call once per frame.
    pub fn poll(&mut self) -> AssetState {
        let Some(receiver) = &self.receiver else {
            return self.state;
        };
        match receiver.try_recv() {
            Ok(Ok(image)) => {
                info!(path = %self.path.display(), "frame source loaded");
                self.image = image;
                self.state = AssetState::Ready;
                self.receiver = None;
            }
            Ok(Err(err)) => {
                warn!(error = %format!("{err:#}"), "frame source failed to load");
                self.state = AssetState::Failed;
                self.receiver = None;
            }
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => {
                self.state = AssetState::Failed;
                self.receiver = None;
            }
        }
        self.state
    }
}

impl FrameSource for ImageSource {
    fn size(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    fn state(&self) -> AssetState {
        self.state
    }
}

/// Whatever the host is currently drawing.
pub enum HostSource {
    Pattern(TestPattern),
    Image(ImageSource),
}

impl HostSource {
    pub fn from_args(path: Option<PathBuf>, size: (u32, u32)) -> Self {
        match path {
            Some(path) => HostSource::Image(ImageSource::spawn(path, size)),
            None => HostSource::Pattern(TestPattern::new(size)),
        }
    }

    /// Advances the source to `timestamp_ms`.
    pub fn update(&mut self, timestamp_ms: f64) {
        match self {
            HostSource::Pattern(pattern) => pattern.draw(timestamp_ms),
            HostSource::Image(image) => {
                image.poll();
            }
        }
    }

    pub fn as_frame(&self) -> &dyn FrameSource {
        match self {
            HostSource::Pattern(pattern) => pattern,
            HostSource::Image(image) => image,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;

    #[test]
    fn pattern_moves_over_time() {
        let mut pattern = TestPattern::new((64, 64));
        let before = pattern.pixels().to_vec();
        pattern.draw(1300.0);
        assert_ne!(before, pattern.pixels());
        assert_eq!(pattern.pixels().len(), 64 * 64 * 4);
        assert_eq!(pattern.state(), AssetState::Ready);
    }

    #[test]
    fn triangle_wave_stays_in_unit_range() {
        for step in 0..40 {
            let value = triangle_wave(step as f64 * 0.07);
            assert!((0.0..=1.0).contains(&value));
        }
    }

    fn wait_for(source: &mut ImageSource) -> AssetState {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let state = source.poll();
            if state != AssetState::Pending || Instant::now() > deadline {
                return state;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn image_source_loads_and_scales() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        RgbaImage::from_pixel(10, 20, Rgba([9, 8, 7, 255]))
            .save(&path)
            .unwrap();

        let mut source = ImageSource::spawn(path, (32, 32));
        assert_eq!(source.size(), (32, 32));
        assert_eq!(wait_for(&mut source), AssetState::Ready);
        assert_eq!(source.size(), (32, 32));
        let first = &source.pixels()[..4];
        for (got, want) in first.iter().zip([9u8, 8, 7, 255]) {
            assert!(got.abs_diff(want) <= 1, "{first:?}");
        }
    }

    #[test]
    fn missing_image_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = ImageSource::spawn(dir.path().join("absent.png"), (8, 8));
        assert_eq!(wait_for(&mut source), AssetState::Failed);
    }
}
