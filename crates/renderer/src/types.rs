/// Side length of the square input and output buffers used by default.
pub const DEFAULT_RESOLUTION: u32 = 1024;

/// Bytes per RGBA8 texel.
pub const BYTES_PER_PIXEL: u32 = 4;

/// Readiness of an asset backing a [`FrameSource`].
///
/// Tracked explicitly by whoever loads the asset and queried by value, so the
/// compositor never has to guess from half-initialised pixel data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetState {
    Pending,
    Ready,
    Failed,
}

/// Any 2D surface whose current pixels the compositor samples each frame.
///
/// Pixels are tightly packed RGBA8 rows, top row first.
pub trait FrameSource {
    /// Pixel dimensions of the surface.
    fn size(&self) -> (u32, u32);

    /// Current pixel content; `size().0 * size().1 * 4` bytes.
    fn pixels(&self) -> &[u8];

    /// Whether `pixels` holds meaningful content yet.
    fn state(&self) -> AssetState {
        AssetState::Ready
    }
}

impl FrameSource for image::RgbaImage {
    fn size(&self) -> (u32, u32) {
        self.dimensions()
    }

    fn pixels(&self) -> &[u8] {
        self.as_raw()
    }
}

/// On-screen placement of a surface, in window pixels.
///
/// The presentation surface mirrors the source surface's layout; its backing
/// resolution stays fixed no matter how large it is drawn.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceLayout {
    pub width: f32,
    pub height: f32,
    pub left: f32,
    pub top: f32,
    pub visible: bool,
}

impl SurfaceLayout {
    pub fn new(width: f32, height: f32, left: f32, top: f32) -> Self {
        Self {
            width,
            height,
            left,
            top,
            visible: true,
        }
    }

    /// Fits a `virtual_size` surface inside `window`, keeping its aspect ratio
    /// and centring it (letterbox or pillarbox as needed).
    pub fn letterbox(window: (u32, u32), virtual_size: (u32, u32)) -> Self {
        let window_w = window.0 as f32;
        let window_h = window.1 as f32;
        if window_w <= 0.0 || window_h <= 0.0 {
            return Self {
                visible: false,
                ..Self::new(0.0, 0.0, 0.0, 0.0)
            };
        }

        let target_aspect = virtual_size.0.max(1) as f32 / virtual_size.1.max(1) as f32;
        let window_aspect = window_w / window_h;
        let (width, height) = if window_aspect < target_aspect {
            (window_w, window_w / target_aspect)
        } else {
            (window_h * target_aspect, window_h)
        };

        Self::new(
            width,
            height,
            (window_w - width) / 2.0,
            (window_h - height) / 2.0,
        )
    }

    /// Whether the rectangle covers at least one pixel.
    pub fn is_drawable(&self) -> bool {
        self.visible && self.width >= 1.0 && self.height >= 1.0
    }
}

impl Default for SurfaceLayout {
    fn default() -> Self {
        Self::new(
            DEFAULT_RESOLUTION as f32,
            DEFAULT_RESOLUTION as f32,
            0.0,
            0.0,
        )
    }
}

/// Fixed resolutions the compositor is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositorOptions {
    /// Size every [`FrameSource`] must have.
    pub input_size: (u32, u32),
    /// Backing resolution of the presentation surface.
    pub output_size: (u32, u32),
}

impl Default for CompositorOptions {
    fn default() -> Self {
        Self {
            input_size: (DEFAULT_RESOLUTION, DEFAULT_RESOLUTION),
            output_size: (DEFAULT_RESOLUTION, DEFAULT_RESOLUTION),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letterbox_fills_height_on_wide_windows() {
        let layout = SurfaceLayout::letterbox((1920, 1080), (1024, 1024));
        assert_eq!(layout.width, 1080.0);
        assert_eq!(layout.height, 1080.0);
        assert_eq!(layout.left, 420.0);
        assert_eq!(layout.top, 0.0);
        assert!(layout.visible);
    }

    #[test]
    fn letterbox_fills_width_on_tall_windows() {
        let layout = SurfaceLayout::letterbox((600, 1000), (1024, 1024));
        assert_eq!(layout.width, 600.0);
        assert_eq!(layout.height, 600.0);
        assert_eq!(layout.left, 0.0);
        assert_eq!(layout.top, 200.0);
    }

    #[test]
    fn minimised_window_hides_layout() {
        let layout = SurfaceLayout::letterbox((0, 0), (1024, 1024));
        assert!(!layout.visible);
        assert!(!layout.is_drawable());
    }

    #[test]
    fn rgba_image_is_a_ready_frame_source() {
        let image = image::RgbaImage::new(4, 2);
        assert_eq!(FrameSource::size(&image), (4, 2));
        assert_eq!(FrameSource::pixels(&image).len(), 4 * 2 * 4);
        assert_eq!(image.state(), AssetState::Ready);
    }
}
