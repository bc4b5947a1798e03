//! Tunable parameters for the CRT compositor and the plumbing that keeps them
//! fresh while frames are being drawn.
//!
//! The JSON document mirrors the effect categories of the fragment program:
//!
//! ```json
//! {
//!   "scanline":      { "intensity": 0.28, "count": 1024.0, "rollingSpeed": 10.3 },
//!   "screenEffects": { "vignetteStrength": 0.22, "brightness": 1.1, "curvature": 0.1 },
//!   "colorEffects":  { "rgbShift": 0.0015 },
//!   "blur":          { "horizontal": 0.4 },
//!   "distortion":    { "flickerSpeed": 8.0, "flickerIntensity": 0.03, "noiseAmount": 0.05 }
//! }
//! ```
//!
//! A parsed document replaces the active config wholesale. Top-level sections
//! missing from the payload come back as built-in defaults; they are not merged
//! with whatever config was active before the reload.

mod reload;
mod source;

use serde::{Deserialize, Serialize};

pub use reload::{ConfigSlot, ReloadOutcome};
pub use source::ConfigSource;

/// Relative path the compositor looks at when no source is configured.
pub const DEFAULT_CONFIG_PATH: &str = "./config/crt-effect.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration from {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to fetch configuration: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("invalid configuration source '{0}'")]
    InvalidSource(String),
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectConfig {
    #[serde(default)]
    pub scanline: ScanlineParams,
    #[serde(default)]
    pub screen_effects: ScreenParams,
    #[serde(default)]
    pub color_effects: ColorParams,
    /// Reserved; the current fragment program does not read it.
    #[serde(default)]
    pub blur: BlurParams,
    #[serde(default)]
    pub distortion: DistortionParams,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScanlineParams {
    pub intensity: f32,
    pub count: f32,
    pub rolling_speed: f32,
}

impl Default for ScanlineParams {
    fn default() -> Self {
        Self {
            intensity: 0.28,
            count: 1024.0,
            rolling_speed: 10.3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScreenParams {
    pub vignette_strength: f32,
    pub brightness: f32,
    pub curvature: f32,
}

impl Default for ScreenParams {
    fn default() -> Self {
        Self {
            vignette_strength: 0.22,
            brightness: 1.1,
            curvature: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ColorParams {
    pub rgb_shift: f32,
}

impl Default for ColorParams {
    fn default() -> Self {
        Self { rgb_shift: 0.0015 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BlurParams {
    pub horizontal: f32,
}

impl Default for BlurParams {
    fn default() -> Self {
        Self { horizontal: 0.4 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DistortionParams {
    pub flicker_speed: f32,
    pub flicker_intensity: f32,
    pub noise_amount: f32,
}

impl Default for DistortionParams {
    fn default() -> Self {
        Self {
            flicker_speed: 8.0,
            flicker_intensity: 0.03,
            noise_amount: 0.05,
        }
    }
}

impl EffectConfig {
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        let raw: EffectConfig = serde_json::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Named view over every numeric field, in document order.
    pub fn fields(&self) -> [(&'static str, f32); 11] {
        [
            ("scanline.intensity", self.scanline.intensity),
            ("scanline.count", self.scanline.count),
            ("scanline.rollingSpeed", self.scanline.rolling_speed),
            ("screenEffects.vignetteStrength", self.screen_effects.vignette_strength),
            ("screenEffects.brightness", self.screen_effects.brightness),
            ("screenEffects.curvature", self.screen_effects.curvature),
            ("colorEffects.rgbShift", self.color_effects.rgb_shift),
            ("blur.horizontal", self.blur.horizontal),
            ("distortion.flickerSpeed", self.distortion.flicker_speed),
            ("distortion.flickerIntensity", self.distortion.flicker_intensity),
            ("distortion.noiseAmount", self.distortion.noise_amount),
        ]
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in self.fields() {
            if !value.is_finite() {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be a finite number, got {value}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
{
  "scanline": { "intensity": 0.5, "count": 512.0, "rollingSpeed": 2.0 },
  "screenEffects": { "vignetteStrength": 0.1, "brightness": 1.0, "curvature": 0.0 },
  "colorEffects": { "rgbShift": 0.003 },
  "blur": { "horizontal": 0.2 },
  "distortion": { "flickerSpeed": 4.0, "flickerIntensity": 0.01, "noiseAmount": 0.0 }
}
"#;

    #[test]
    fn parses_sample_config() {
        let config = EffectConfig::from_json_str(SAMPLE).expect("parse config");
        assert_eq!(config.scanline.count, 512.0);
        assert_eq!(config.scanline.rolling_speed, 2.0);
        assert_eq!(config.screen_effects.curvature, 0.0);
        assert_eq!(config.color_effects.rgb_shift, 0.003);
        assert_eq!(config.distortion.noise_amount, 0.0);
    }

    #[test]
    fn absent_sections_fall_back_to_defaults() {
        let config =
            EffectConfig::from_json_str(r#"{ "scanline": { "intensity": 0.9 } }"#).unwrap();
        assert_eq!(config.scanline.intensity, 0.9);
        assert_eq!(config.scanline.count, ScanlineParams::default().count);
        assert_eq!(config.screen_effects, ScreenParams::default());
        assert_eq!(config.distortion, DistortionParams::default());
    }

    #[test]
    fn empty_object_is_the_default_config() {
        let config = EffectConfig::from_json_str("{}").unwrap();
        assert_eq!(config, EffectConfig::default());
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let config = EffectConfig::from_json_str(r#"{ "glow": { "radius": 3 } }"#).unwrap();
        assert_eq!(config, EffectConfig::default());
    }

    #[test]
    fn rejects_malformed_json() {
        let err = EffectConfig::from_json_str("{ scanline: ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn rejects_non_numeric_fields() {
        let err = EffectConfig::from_json_str(r#"{ "colorEffects": { "rgbShift": "wide" } }"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn rejects_non_finite_values() {
        let mut config = EffectConfig::default();
        config.screen_effects.brightness = f32::INFINITY;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(ref msg) if msg.contains("brightness")));
    }

    #[test]
    fn serialises_with_camel_case_keys() {
        let json = EffectConfig::default().to_json_pretty().unwrap();
        assert!(json.contains("\"screenEffects\""));
        assert!(json.contains("\"rollingSpeed\""));
        let back = EffectConfig::from_json_str(&json).unwrap();
        assert_eq!(back, EffectConfig::default());
    }
}
