//! Reader configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries the
//! tunables of the MJPEG demuxer and the frame index. Every section defaults
//! sensibly so a completely empty `{}` file is valid.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;
use crate::Error;

/// Longest separator the MJPEG marker search accepts.
pub const MAX_SEPARATOR_LEN: usize = 100;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root reader configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mjpeg: MjpegConfig,
    pub index: IndexConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::IllegalArgument(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.mjpeg.separator.is_empty() {
            warnings.push("mjpeg.separator is empty; the JPEG SOI marker will be used".into());
        }
        if self.mjpeg.separator.len() > MAX_SEPARATOR_LEN {
            warnings.push(format!(
                "mjpeg.separator is {} bytes; only the first {MAX_SEPARATOR_LEN} are used",
                self.mjpeg.separator.len()
            ));
        }
        if self.mjpeg.buffer_size < 2 * self.mjpeg.effective_separator().len() {
            warnings.push(format!(
                "mjpeg.buffer_size {} is smaller than twice the separator length",
                self.mjpeg.buffer_size
            ));
        }
        if self.mjpeg.refill_failure_limit == 0 {
            warnings.push("mjpeg.refill_failure_limit is 0; marker search gives up immediately".into());
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// MJPEG demuxer tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MjpegConfig {
    /// Consecutive corrupt frames tolerated before a fatal format error.
    pub retry_budget: u32,
    /// Consecutive fruitless buffer refills before the marker search gives up.
    pub refill_failure_limit: u32,
    /// Size of the stream read buffer in bytes.
    pub buffer_size: usize,
    /// Byte sequence that starts every frame.
    pub separator: Vec<u8>,
}

impl Default for MjpegConfig {
    fn default() -> Self {
        Self {
            retry_budget: 3,
            refill_failure_limit: 100,
            buffer_size: 4096,
            separator: vec![0xFF, 0xD8],
        }
    }
}

impl MjpegConfig {
    /// The separator actually searched for: never empty, at most
    /// [`MAX_SEPARATOR_LEN`] bytes.
    pub fn effective_separator(&self) -> &[u8] {
        if self.separator.is_empty() {
            &[0xFF, 0xD8]
        } else {
            &self.separator[..self.separator.len().min(MAX_SEPARATOR_LEN)]
        }
    }
}

/// Frame index persistence settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Read and write `<video>.idx` next to the video.
    pub enabled: bool,
    /// Ignore any existing index and rebuild it.
    pub reindex: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reindex: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_is_default() {
        let config = Config::from_json("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.mjpeg.retry_budget, 3);
        assert_eq!(config.mjpeg.refill_failure_limit, 100);
        assert_eq!(config.mjpeg.separator, vec![0xFF, 0xD8]);
        assert!(config.index.enabled);
    }

    #[test]
    fn partial_override() {
        let config = Config::from_json(r#"{"mjpeg": {"retry_budget": 5}}"#).unwrap();
        assert_eq!(config.mjpeg.retry_budget, 5);
        assert_eq!(config.mjpeg.buffer_size, 4096);
    }

    #[test]
    fn invalid_json_is_error() {
        let err = Config::from_json("{not json").unwrap_err();
        assert!(matches!(err, Error::IllegalArgument(_)));
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(Some(&dir.path().join("nope.json")));
        assert_eq!(config, Config::default());
        assert_eq!(Config::load_or_default(None), Config::default());
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("framegrab.json");
        std::fs::write(&path, r#"{"index": {"reindex": true}}"#).unwrap();
        let config = Config::load_or_default(Some(&path));
        assert!(config.index.reindex);
        assert!(config.index.enabled);
    }

    #[test]
    fn validate_flags_bad_separator() {
        let mut config = Config::default();
        assert!(config.validate().is_empty());

        config.mjpeg.separator.clear();
        assert_eq!(config.mjpeg.effective_separator(), &[0xFF, 0xD8]);
        assert!(config.validate()[0].contains("separator is empty"));

        config.mjpeg.separator = vec![0xAB; MAX_SEPARATOR_LEN + 5];
        assert_eq!(config.mjpeg.effective_separator().len(), MAX_SEPARATOR_LEN);
        assert!(config.validate().iter().any(|w| w.contains("only the first")));
    }
}
