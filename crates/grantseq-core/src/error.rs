//! Error types for grantseq
//!
//! Only setup problems surface as errors:
//! - Host cannot deliver grant results back to a session
//! - Malformed capability trees
//! - Invalid engine configuration
//!
//! Host-reported denial is never an error. It is reflected in the result map
//! and in the final outcome.

use std::path::PathBuf;

/// Main engine error type, returned synchronously by `request`
#[derive(Debug, thiserror::Error)]
pub enum GrantError {
    /// Host is not usable as a grant host
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Host refused the result-delivery registration
    #[error("host registration failed: {0}")]
    HostRegistration(#[from] HostError),

    /// Capability tree is malformed
    #[error("invalid capability node: {0}")]
    InvalidNode(String),

    /// Engine configuration rejected
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    /// Called outside a tokio runtime
    #[error("no tokio runtime available to drive the session")]
    NoRuntime,
}

impl GrantError {
    /// Check if the error stems from how the engine or host is set up
    #[inline]
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_)
                | Self::HostRegistration(HostError::ResultChannelUnsupported)
                | Self::InvalidConfig(_)
                | Self::NoRuntime
        )
    }
}

/// Errors reported by a host adapter
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    /// Host cannot route asynchronous results to a session
    #[error("host does not support result-delivery registration")]
    ResultChannelUnsupported,

    /// The receiving session is gone
    #[error("result channel closed")]
    ChannelClosed,

    /// Label or description lookup failed
    #[error("no metadata for capability {capability}")]
    LookupFailed {
        /// Capability identifier that was looked up
        capability: String,
    },

    /// Operation not offered by this host
    #[error("unsupported host operation: {0}")]
    Unsupported(&'static str),
}

/// Configuration loading and validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML could not be parsed
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// File could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that was read
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Code ceiling outside the range the host leaves free
    #[error("code ceiling {ceiling} out of range (1..={max})")]
    CodeCeilingOutOfRange {
        /// Requested ceiling
        ceiling: u32,
        /// Largest permitted ceiling
        max: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grant_error_display() {
        let err = GrantError::InvalidNode("empty group".to_string());
        assert!(err.to_string().contains("invalid capability node"));
    }

    #[test]
    fn grant_error_is_configuration() {
        assert!(GrantError::NoRuntime.is_configuration());
        assert!(GrantError::HostRegistration(HostError::ResultChannelUnsupported).is_configuration());
        assert!(!GrantError::HostRegistration(HostError::ChannelClosed).is_configuration());
        assert!(!GrantError::InvalidNode("x".to_string()).is_configuration());
    }

    #[test]
    fn config_error_ceiling_display() {
        let err = ConfigError::CodeCeilingOutOfRange { ceiling: 0, max: 7 };
        assert_eq!(err.to_string(), "code ceiling 0 out of range (1..=7)");
    }
}
