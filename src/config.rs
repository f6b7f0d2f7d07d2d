//! Workflow configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Settings shared by the key inspector and the workflows.
///
/// Every field has a default, so an empty TOML document is a valid
/// configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Keys expiring within this many days report `ExpiringSoon`
    pub expiring_soon_days: i64,
    /// Keys expiring within this many days report `ExpiringThisWeek`
    pub expiring_week_days: i64,
    /// Reject armor without a CRC-24 line. A present checksum is always
    /// checked.
    pub require_checksum: bool,
    /// Largest accepted text field, in bytes
    pub max_input_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            expiring_soon_days: 30,
            expiring_week_days: 7,
            require_checksum: false,
            max_input_bytes: 1024 * 1024,
        }
    }
}

impl Config {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Reject an input longer than `max_input_bytes`.
    pub fn check_size(&self, input: &str) -> Result<()> {
        if input.len() > self.max_input_bytes {
            return Err(Error::InputTooLarge {
                size: input.len(),
                limit: self.max_input_bytes,
            });
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.expiring_week_days < 0 || self.expiring_soon_days < self.expiring_week_days {
            return Err(Error::Config(
                "expiring_soon_days must be >= expiring_week_days >= 0".to_string(),
            ));
        }
        if self.max_input_bytes == 0 {
            return Err(Error::Config("max_input_bytes must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        assert_eq!(Config::from_toml_str("").unwrap(), Config::default());
    }

    #[test]
    fn partial_document_overrides_fields() {
        let config = Config::from_toml_str("require_checksum = true\nexpiring_soon_days = 60").unwrap();
        assert!(config.require_checksum);
        assert_eq!(config.expiring_soon_days, 60);
        assert_eq!(config.expiring_week_days, 7);
    }

    #[test]
    fn inconsistent_thresholds_rejected() {
        let err = Config::from_toml_str("expiring_soon_days = 3").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn malformed_toml_rejected() {
        assert!(matches!(
            Config::from_toml_str("require_checksum = maybe"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn load_reads_file_and_tolerates_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pgpworkbench.toml");
        assert_eq!(Config::load(&path).unwrap(), Config::default());

        std::fs::write(&path, "max_input_bytes = 16\n").unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.max_input_bytes, 16);
        assert!(config.check_size("0123456789abcdef").is_ok());
        assert!(matches!(
            config.check_size("0123456789abcdefX"),
            Err(Error::InputTooLarge { size: 17, limit: 16 })
        ));
    }
}
