use std::mem::offset_of;

use bytemuck::{Pod, Zeroable};
use effectconfig::EffectConfig;

/// CPU mirror of the `EffectParams` std140 block.
///
/// Every member is a scalar `f32`, so std140 packs them at 4-byte strides; the
/// trailing pad rounds the block to 16 bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct EffectUniforms {
    pub time: f32,
    pub scanline_intensity: f32,
    pub scanline_count: f32,
    pub rolling_speed: f32,
    pub vignette_strength: f32,
    pub brightness: f32,
    pub curvature: f32,
    pub rgb_shift: f32,
    pub flicker_speed: f32,
    pub flicker_intensity: f32,
    pub noise_amount: f32,
    pub padding0: f32,
}

/// Shader-side member names paired with the byte offset the Rust struct puts them at.
pub(crate) const UNIFORM_FIELDS: [(&str, usize); 11] = [
    ("u_time", offset_of!(EffectUniforms, time)),
    (
        "u_scanlineIntensity",
        offset_of!(EffectUniforms, scanline_intensity),
    ),
    ("u_scanlineCount", offset_of!(EffectUniforms, scanline_count)),
    ("u_rollingSpeed", offset_of!(EffectUniforms, rolling_speed)),
    (
        "u_vignetteStrength",
        offset_of!(EffectUniforms, vignette_strength),
    ),
    ("u_brightness", offset_of!(EffectUniforms, brightness)),
    ("u_curvature", offset_of!(EffectUniforms, curvature)),
    ("u_rgbShift", offset_of!(EffectUniforms, rgb_shift)),
    ("u_flickerSpeed", offset_of!(EffectUniforms, flicker_speed)),
    (
        "u_flickerIntensity",
        offset_of!(EffectUniforms, flicker_intensity),
    ),
    ("u_noiseAmount", offset_of!(EffectUniforms, noise_amount)),
];

impl EffectUniforms {
    /// Builds the per-frame values from one config snapshot.
    ///
    /// `timestamp_ms` is the host's monotonically increasing frame time.
    pub fn from_config(config: &EffectConfig, timestamp_ms: f64) -> Self {
        Self {
            time: (timestamp_ms / 1000.0) as f32,
            scanline_intensity: config.scanline.intensity,
            scanline_count: config.scanline.count,
            rolling_speed: config.scanline.rolling_speed,
            vignette_strength: config.screen_effects.vignette_strength,
            brightness: config.screen_effects.brightness,
            curvature: config.screen_effects.curvature,
            rgb_shift: config.color_effects.rgb_shift,
            flicker_speed: config.distortion.flicker_speed,
            flicker_intensity: config.distortion.flicker_intensity,
            noise_amount: config.distortion.noise_amount,
            padding0: 0.0,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_is_three_vec4s() {
        assert_eq!(std::mem::size_of::<EffectUniforms>(), 48);
        assert_eq!(UNIFORM_FIELDS[0], ("u_time", 0));
        assert_eq!(UNIFORM_FIELDS[10], ("u_noiseAmount", 40));
    }

    #[test]
    fn time_is_seconds() {
        let uniforms = EffectUniforms::from_config(&EffectConfig::default(), 2500.0);
        assert_eq!(uniforms.time, 2.5);
    }

    #[test]
    fn copies_every_config_field() {
        let mut config = EffectConfig::default();
        config.scanline.count = 300.0;
        config.screen_effects.curvature = 0.0;
        config.color_effects.rgb_shift = 0.01;
        config.distortion.noise_amount = 0.2;

        let uniforms = EffectUniforms::from_config(&config, 0.0);
        assert_eq!(uniforms.scanline_count, 300.0);
        assert_eq!(uniforms.curvature, 0.0);
        assert_eq!(uniforms.rgb_shift, 0.01);
        assert_eq!(uniforms.noise_amount, 0.2);
        assert_eq!(uniforms.brightness, config.screen_effects.brightness);
        assert_eq!(uniforms.padding0, 0.0);
    }
}
