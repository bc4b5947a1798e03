//! Software rendition of the CRT fragment program.
//!
//! Used for still exports on machines without a usable adapter and as the
//! reference the GPU output is compared against in tests. Each helper matches
//! one stage of the shader; `shade` strings them together in the same order.

use image::RgbaImage;

use crate::gpu::uniforms::EffectUniforms;
use crate::types::{AssetState, FrameSource, BYTES_PER_PIXEL};

/// Result of bending a texture coordinate around the virtual tube.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurvedCoord {
    /// Remapped coordinate in `[0, 1]` when `inside` holds.
    pub uv: [f32; 2],
    /// The same point in `[-1, 1]` space, used by the vignette.
    pub centered: [f32; 2],
    pub inside: bool,
}

pub fn curvature_remap(uv: [f32; 2], curvature: f32) -> CurvedCoord {
    let mut c = [uv[0] * 2.0 - 1.0, uv[1] * 2.0 - 1.0];
    let offset = [c[1] * c[1] * curvature, c[0] * c[0] * curvature];
    c[0] += c[0] * offset[0];
    c[1] += c[1] * offset[1];
    let uv = [c[0] * 0.5 + 0.5, c[1] * 0.5 + 0.5];
    let inside = (0.0..=1.0).contains(&uv[0]) && (0.0..=1.0).contains(&uv[1]);
    CurvedCoord {
        uv,
        centered: c,
        inside,
    }
}

/// Multiplier applied by the rolling scanline pattern at row `v`.
pub fn scanline_factor(v: f32, params: &EffectUniforms) -> f32 {
    let wave = (v * params.scanline_count + params.time * params.rolling_speed).sin();
    let scanline = wave * 0.5 + 0.5;
    1.0 - scanline * params.scanline_intensity
}

pub fn vignette_factor(centered: [f32; 2], strength: f32) -> f32 {
    let length = (centered[0] * centered[0] + centered[1] * centered[1]).sqrt();
    1.0 - length * strength
}

pub fn flicker_factor(params: &EffectUniforms) -> f32 {
    1.0 - (params.time * params.flicker_speed).sin() * params.flicker_intensity
}

/// `fract(sin(dot(co, (12.9898, 78.233))) * 43758.5453)`
pub fn pseudo_random(co: [f32; 2]) -> f32 {
    let dot = co[0] * 12.9898 + co[1] * 78.233;
    let value = dot.sin() * 43758.5453;
    value - value.floor()
}

/// Bilinear, clamp-to-edge sampler over a [`FrameSource`].
///
/// A source that is not ready samples as transparent black, matching a
/// texture that has never received an upload.
pub struct SourceSampler<'a> {
    pixels: &'a [u8],
    width: u32,
    height: u32,
}

impl<'a> SourceSampler<'a> {
    pub fn new(source: &'a dyn FrameSource) -> Self {
        let (width, height) = source.size();
        let pixels = source.pixels();
        let expected = width as usize * height as usize * BYTES_PER_PIXEL as usize;
        if source.state() != AssetState::Ready || width == 0 || height == 0 || pixels.len() < expected
        {
            return Self {
                pixels: &[],
                width: 0,
                height: 0,
            };
        }
        Self {
            pixels,
            width,
            height,
        }
    }

    fn texel(&self, x: i64, y: i64) -> [f32; 4] {
        let x = x.clamp(0, self.width as i64 - 1) as usize;
        let y = y.clamp(0, self.height as i64 - 1) as usize;
        let index = (y * self.width as usize + x) * BYTES_PER_PIXEL as usize;
        let px = &self.pixels[index..index + BYTES_PER_PIXEL as usize];
        [
            px[0] as f32 / 255.0,
            px[1] as f32 / 255.0,
            px[2] as f32 / 255.0,
            px[3] as f32 / 255.0,
        ]
    }

    pub fn sample(&self, uv: [f32; 2]) -> [f32; 4] {
        if self.width == 0 {
            return [0.0; 4];
        }
        let x = uv[0] * self.width as f32 - 0.5;
        let y = uv[1] * self.height as f32 - 0.5;
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;
        let (x0, y0) = (x0 as i64, y0 as i64);

        let a = self.texel(x0, y0);
        let b = self.texel(x0 + 1, y0);
        let c = self.texel(x0, y0 + 1);
        let d = self.texel(x0 + 1, y0 + 1);

        let mut out = [0.0; 4];
        for i in 0..4 {
            let top = a[i] + (b[i] - a[i]) * fx;
            let bottom = c[i] + (d[i] - c[i]) * fx;
            out[i] = top + (bottom - top) * fy;
        }
        out
    }
}

/// Colour of one output fragment at texture coordinate `uv`.
pub fn shade(sampler: &SourceSampler<'_>, uv: [f32; 2], params: &EffectUniforms) -> [f32; 4] {
    let curved = curvature_remap(uv, params.curvature);
    if !curved.inside {
        return [0.0, 0.0, 0.0, 1.0];
    }
    let uv = curved.uv;

    let shift = params.rgb_shift;
    let mut color = [
        sampler.sample([uv[0] - shift, uv[1]])[0],
        sampler.sample(uv)[1],
        sampler.sample([uv[0] + shift, uv[1]])[2],
    ];

    let factor = params.brightness
        * scanline_factor(uv[1], params)
        * vignette_factor(curved.centered, params.vignette_strength)
        * flicker_factor(params);
    let noise_seed = params.time * 0.001;
    let noise = (pseudo_random([uv[0] + noise_seed, uv[1] + noise_seed]) - 0.5) * params.noise_amount;
    for channel in &mut color {
        *channel = *channel * factor + noise;
    }

    [color[0], color[1], color[2], 1.0]
}

/// Runs the effect over every pixel centre of an `output_size` buffer.
pub fn render_software(
    source: &dyn FrameSource,
    output_size: (u32, u32),
    params: &EffectUniforms,
) -> RgbaImage {
    let sampler = SourceSampler::new(source);
    let (width, height) = output_size;
    RgbaImage::from_fn(width, height, |x, y| {
        let uv = [
            (x as f32 + 0.5) / width as f32,
            (y as f32 + 0.5) / height as f32,
        ];
        let color = shade(&sampler, uv, params);
        image::Rgba(color.map(quantize))
    })
}

fn quantize(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

#[cfg(test)]
mod tests {
    use std::f32::consts::TAU;

    use effectconfig::EffectConfig;

    use super::*;

    fn neutral() -> EffectUniforms {
        EffectUniforms {
            brightness: 1.0,
            scanline_count: 1024.0,
            ..EffectUniforms::default()
        }
    }

    fn checker(size: u32) -> RgbaImage {
        RgbaImage::from_fn(size, size, |x, y| {
            if (x / 4 + y / 4) % 2 == 0 {
                image::Rgba([200, 40, 90, 255])
            } else {
                image::Rgba([10, 180, 250, 255])
            }
        })
    }

    #[test]
    fn zero_curvature_is_identity() {
        for uv in [[0.0, 0.0], [0.25, 0.8], [1.0, 1.0], [0.5, 0.5]] {
            let curved = curvature_remap(uv, 0.0);
            assert!(curved.inside);
            assert!((curved.uv[0] - uv[0]).abs() < 1e-6);
            assert!((curved.uv[1] - uv[1]).abs() < 1e-6);
        }
    }

    #[test]
    fn curvature_blacks_out_corners_but_keeps_centre() {
        let params = EffectUniforms {
            curvature: 0.1,
            ..neutral()
        };
        let image = checker(8);
        let sampler = SourceSampler::new(&image);

        for corner in [[0.001, 0.001], [0.999, 0.001], [0.001, 0.999], [0.999, 0.999]] {
            assert!(!curvature_remap(corner, 0.1).inside, "{corner:?}");
            assert_eq!(shade(&sampler, corner, &params), [0.0, 0.0, 0.0, 1.0], "{corner:?}");
        }

        let centre = curvature_remap([0.5, 0.5], 0.1);
        assert!(centre.inside);
        assert_eq!(centre.uv, [0.5, 0.5]);
        assert_ne!(shade(&sampler, [0.5, 0.5], &params), [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn scanlines_repeat_over_their_rolling_period() {
        let mut params = EffectUniforms {
            scanline_intensity: 0.28,
            rolling_speed: 10.3,
            time: 1.7,
            ..neutral()
        };
        let before = scanline_factor(0.37, &params);
        params.time += TAU / params.rolling_speed;
        let after = scanline_factor(0.37, &params);
        assert!((before - after).abs() < 1e-3, "{before} vs {after}");
    }

    #[test]
    fn vignette_darkens_with_distance() {
        assert_eq!(vignette_factor([0.0, 0.0], 0.22), 1.0);
        assert!(vignette_factor([0.9, 0.9], 0.22) < vignette_factor([0.3, 0.3], 0.22));
    }

    #[test]
    fn pseudo_random_stays_in_unit_range() {
        for i in 0..100 {
            let value = pseudo_random([i as f32 * 0.37, i as f32 * 0.11]);
            assert!((0.0..1.0).contains(&value));
        }
    }

    #[test]
    fn neutral_parameters_pass_source_through() {
        let image = checker(64);
        let out = render_software(&image, (64, 64), &neutral());
        assert_eq!(out.as_raw(), image.as_raw());
    }

    #[test]
    fn zero_rgb_shift_keeps_channels_aligned() {
        let image = checker(16);
        let sampler = SourceSampler::new(&image);
        let uv = [0.4, 0.6];
        let expected = sampler.sample(uv);
        let shaded = shade(&sampler, uv, &neutral());
        for channel in 0..3 {
            assert!((shaded[channel] - expected[channel]).abs() < 1e-6);
        }
    }

    #[test]
    fn default_effect_darkens_and_varies_white_input() {
        let white = RgbaImage::from_pixel(64, 64, image::Rgba([255, 255, 255, 255]));
        let params = EffectUniforms::from_config(&EffectConfig::default(), 0.0);
        let out = render_software(&white, (64, 64), &params);

        let first = out.get_pixel(0, 0);
        assert!(out.pixels().any(|px| px != first), "output is uniform");

        let total: u64 = out
            .pixels()
            .map(|px| px[0] as u64 + px[1] as u64 + px[2] as u64)
            .sum();
        let average = total as f64 / (64.0 * 64.0 * 3.0);
        assert!(average < 255.0, "average luminance {average}");
        assert!(out.pixels().all(|px| px[3] == 255));
    }

    #[test]
    fn pending_source_samples_black() {
        struct Loading(RgbaImage);
        impl FrameSource for Loading {
            fn size(&self) -> (u32, u32) {
                self.0.dimensions()
            }
            fn pixels(&self) -> &[u8] {
                self.0.as_raw()
            }
            fn state(&self) -> AssetState {
                AssetState::Pending
            }
        }

        let source = Loading(RgbaImage::from_pixel(4, 4, image::Rgba([255; 4])));
        let sampler = SourceSampler::new(&source);
        assert_eq!(sampler.sample([0.5, 0.5]), [0.0; 4]);
    }
}
