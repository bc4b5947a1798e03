use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::Url;
use tracing::debug;

use crate::{ConfigError, EffectConfig};

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Where an effect config document lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    Url(Url),
}

impl ConfigSource {
    /// Interprets `http://` and `https://` inputs as URLs and everything else as a path.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ConfigError::InvalidSource(raw.to_string()));
        }
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            let url =
                Url::parse(trimmed).map_err(|_| ConfigError::InvalidSource(raw.to_string()))?;
            return Ok(Self::Url(url));
        }
        Ok(Self::File(PathBuf::from(trimmed)))
    }

    /// Fetches and parses the document. Blocking; run it off the render thread.
    pub fn fetch(&self) -> Result<EffectConfig, ConfigError> {
        let body = match self {
            ConfigSource::File(path) => {
                fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.display().to_string(),
                    source,
                })?
            }
            ConfigSource::Url(url) => {
                debug!(%url, "fetching effect config");
                let http = Client::builder().timeout(FETCH_TIMEOUT).build()?;
                http.get(url.clone()).send()?.error_for_status()?.text()?
            }
        };
        EffectConfig::from_json_str(&body)
    }
}

impl Default for ConfigSource {
    fn default() -> Self {
        Self::File(PathBuf::from(crate::DEFAULT_CONFIG_PATH))
    }
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::File(path) => write!(f, "{}", path.display()),
            ConfigSource::Url(url) => write!(f, "{url}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_urls_and_paths() {
        let url = ConfigSource::parse("https://example.com/crt.json").unwrap();
        assert!(matches!(url, ConfigSource::Url(ref u) if u.host_str() == Some("example.com")));

        let path = ConfigSource::parse("./config/crt-effect.json").unwrap();
        assert_eq!(
            path,
            ConfigSource::File(PathBuf::from("./config/crt-effect.json"))
        );
    }

    #[test]
    fn rejects_empty_source() {
        assert!(matches!(
            ConfigSource::parse("   "),
            Err(ConfigError::InvalidSource(_))
        ));
    }

    #[test]
    fn fetches_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crt.json");
        fs::write(&path, r#"{ "colorEffects": { "rgbShift": 0.01 } }"#).unwrap();

        let config = ConfigSource::File(path).fetch().unwrap();
        assert_eq!(config.color_effects.rgb_shift, 0.01);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ConfigSource::File(dir.path().join("absent.json"))
            .fetch()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
