//! Engine configuration

use crate::code::MAX_CODE_CEILING;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// grantseq configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrantConfig {
    /// Correlation codes wrap back to 1 after this value
    pub code_ceiling: u32,
    /// Prompt when the host advises a rationale
    pub honor_rationale_advice: bool,
    /// Record declined rationale prompts as `false` in the results
    pub record_declined: bool,
}

impl GrantConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With code ceiling
    #[inline]
    #[must_use]
    pub fn with_code_ceiling(mut self, ceiling: u32) -> Self {
        self.code_ceiling = ceiling;
        self
    }

    /// With rationale advice honored or ignored
    #[inline]
    #[must_use]
    pub fn with_rationale_advice(mut self, honor: bool) -> Self {
        self.honor_rationale_advice = honor;
        self
    }

    /// With declined prompts recorded as denials
    #[inline]
    #[must_use]
    pub fn with_record_declined(mut self, record: bool) -> Self {
        self.record_declined = record;
        self
    }

    /// Parse from TOML text
    ///
    /// # Errors
    /// `ConfigError::Parse` on malformed TOML, or any validation error
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// `ConfigError::Io` if unreadable, otherwise as [`Self::from_toml_str`]
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Check value ranges
    ///
    /// # Errors
    /// `ConfigError::CodeCeilingOutOfRange` for a ceiling of 0 or above the reserved range
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.code_ceiling == 0 || self.code_ceiling > MAX_CODE_CEILING {
            return Err(ConfigError::CodeCeilingOutOfRange {
                ceiling: self.code_ceiling,
                max: MAX_CODE_CEILING,
            });
        }
        Ok(())
    }
}

impl Default for GrantConfig {
    fn default() -> Self {
        Self {
            code_ceiling: MAX_CODE_CEILING,
            honor_rationale_advice: true,
            record_declined: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let config = GrantConfig::default();
        assert_eq!(config.code_ceiling, MAX_CODE_CEILING);
        assert!(config.honor_rationale_advice);
        assert!(!config.record_declined);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = GrantConfig::from_toml_str("record_declined = true").unwrap();
        assert!(config.record_declined);
        assert_eq!(config.code_ceiling, MAX_CODE_CEILING);
    }

    #[test]
    fn rejects_out_of_range_ceiling() {
        assert!(matches!(
            GrantConfig::from_toml_str("code_ceiling = 0"),
            Err(ConfigError::CodeCeilingOutOfRange { ceiling: 0, .. })
        ));
        assert!(GrantConfig::new().with_code_ceiling(MAX_CODE_CEILING + 1).validate().is_err());
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(matches!(GrantConfig::from_toml_str("code_ceiling = ["), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "code_ceiling = 100\nhonor_rationale_advice = false").unwrap();

        let config = GrantConfig::from_file(file.path()).unwrap();
        assert_eq!(config, GrantConfig::new().with_code_ceiling(100).with_rationale_advice(false));
    }

    #[test]
    fn missing_file_is_io_error() {
        assert!(matches!(
            GrantConfig::from_file("/nonexistent/grantseq.toml"),
            Err(ConfigError::Io { .. })
        ));
    }
}
