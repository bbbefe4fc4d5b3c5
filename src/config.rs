//! Read-only application options.
//!
//! Options are resolved once at startup (JSON file, then command-line
//! overrides), validated, and never mutated afterwards. Operations only read
//! them at construction time.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::fetch::constants::{CONNECT_TIMEOUT_SECS, MAXIMUM_RESPONSE_SIZE, READ_TIMEOUT_SECS};
use crate::queue::DEFAULT_CONCURRENCY;

/// Errors raised while loading or validating [`AppOptions`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("cannot read config file {}: {source}", path.display())]
    Read {
        /// The config file path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid JSON for [`AppOptions`].
    #[error("invalid config file {}: {source}", path.display())]
    Parse {
        /// The config file path.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// A value is outside its accepted range.
    #[error("invalid config value for `{field}`: {value}. Expected range: {expected}")]
    OutOfRange {
        /// Name of the offending field.
        field: &'static str,
        /// The rejected value.
        value: u64,
        /// Human-readable accepted range.
        expected: &'static str,
    },

    /// The download directory is empty.
    #[error("invalid config value for `download_dir`: must not be empty")]
    EmptyDownloadDir,
}

/// Application options consumed by download operations.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppOptions {
    /// Directory downloads are written to.
    pub download_dir: PathBuf,
    /// Preferred video quality label (for example `hd720`), if any.
    pub video_quality: Option<String>,
    /// Operations executing at once.
    pub concurrency: usize,
    /// HTTP connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// HTTP read timeout in seconds.
    pub read_timeout_secs: u64,
    /// Largest response body accepted, in bytes.
    pub max_response_size: u64,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("."),
            video_quality: None,
            concurrency: DEFAULT_CONCURRENCY,
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            read_timeout_secs: READ_TIMEOUT_SECS,
            max_response_size: MAXIMUM_RESPONSE_SIZE,
        }
    }
}

impl AppOptions {
    /// Loads options from a JSON file. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, parsed or validated.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let options = Self::from_json(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        options.validate()?;
        debug!(path = %path.display(), "loaded config file");
        Ok(options)
    }

    /// Parses options from JSON without validating them.
    ///
    /// # Errors
    ///
    /// Returns the JSON error for malformed input or unknown fields.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Validates values against runtime constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] naming the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.download_dir.as_os_str().is_empty() {
            return Err(ConfigError::EmptyDownloadDir);
        }
        if !(1..=100).contains(&self.concurrency) {
            return Err(ConfigError::OutOfRange {
                field: "concurrency",
                value: self.concurrency as u64,
                expected: "1..=100",
            });
        }
        validate_timeout_secs("connect_timeout_secs", self.connect_timeout_secs)?;
        validate_timeout_secs("read_timeout_secs", self.read_timeout_secs)?;
        if self.max_response_size == 0 {
            return Err(ConfigError::OutOfRange {
                field: "max_response_size",
                value: 0,
                expected: "1..",
            });
        }
        Ok(())
    }
}

fn validate_timeout_secs(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if !(1..=3600).contains(&value) {
        return Err(ConfigError::OutOfRange {
            field,
            value,
            expected: "1..=3600",
        });
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let options = AppOptions::default();
        assert!(options.validate().is_ok());
        assert_eq!(options.concurrency, DEFAULT_CONCURRENCY);
        assert!(options.video_quality.is_none());
    }

    #[test]
    fn test_from_json_fills_missing_fields_with_defaults() {
        let options =
            AppOptions::from_json(r#"{"download_dir": "/srv/videos", "video_quality": "hd720"}"#)
                .unwrap();
        assert_eq!(options.download_dir, PathBuf::from("/srv/videos"));
        assert_eq!(options.video_quality.as_deref(), Some("hd720"));
        assert_eq!(options.read_timeout_secs, READ_TIMEOUT_SECS);
    }

    #[test]
    fn test_from_json_rejects_unknown_fields() {
        assert!(AppOptions::from_json(r#"{"download_directory": "/x"}"#).is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_values() {
        let options = AppOptions {
            concurrency: 0,
            ..AppOptions::default()
        };
        let msg = options.validate().unwrap_err().to_string();
        assert!(msg.contains("concurrency"), "Expected field in: {msg}");

        let options = AppOptions {
            read_timeout_secs: 7200,
            ..AppOptions::default()
        };
        assert!(matches!(
            options.validate(),
            Err(ConfigError::OutOfRange {
                field: "read_timeout_secs",
                ..
            })
        ));

        let options = AppOptions {
            download_dir: PathBuf::new(),
            ..AppOptions::default()
        };
        assert!(matches!(options.validate(), Err(ConfigError::EmptyDownloadDir)));
    }

    #[test]
    fn test_load_reports_parse_errors_with_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{not json").unwrap();
        let msg = AppOptions::load(&path).unwrap_err().to_string();
        assert!(msg.contains("config.json"), "Expected path in: {msg}");
    }

    #[test]
    fn test_load_validates_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"concurrency": 500}"#).unwrap();
        assert!(matches!(
            AppOptions::load(&path),
            Err(ConfigError::OutOfRange { value: 500, .. })
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let error = AppOptions::load(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(error, ConfigError::Read { .. }));
    }
}
