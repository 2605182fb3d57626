//! Error types for arbor-core

use thiserror::Error;

/// Result type alias using arbor-core's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for arbor
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Invalid configuration format
    #[error("Invalid configuration format: {message}")]
    InvalidConfig { message: String },

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlParse(#[from] serde_yaml_ng::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Version string that cannot be ordered
    #[error("Invalid version format: {version}")]
    InvalidVersion { version: String },

    /// An extension could not be discovered or read
    #[error("Extension discovery failed for {origin}: {message}")]
    Discovery { origin: String, message: String },

    /// An extension descriptor is malformed
    #[error("Invalid extension descriptor {origin}: {message}")]
    Descriptor { origin: String, message: String },

    /// A single operation could not be applied
    #[error("Operation {operation} failed: {reason}")]
    Apply { operation: String, reason: String },

    /// The store handle is missing or no longer live
    #[error("Store unavailable: {message}")]
    StoreUnavailable { message: String },
}

impl Error {
    /// Create a config not found error
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    /// Create an invalid config error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create an invalid version error
    pub fn invalid_version(version: impl Into<String>) -> Self {
        Self::InvalidVersion {
            version: version.into(),
        }
    }

    /// Create a discovery error
    pub fn discovery(origin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Discovery {
            origin: origin.into(),
            message: message.into(),
        }
    }

    /// Create a descriptor error
    pub fn descriptor(origin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Descriptor {
            origin: origin.into(),
            message: message.into(),
        }
    }

    /// Create an apply error
    pub fn apply(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Apply {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a store unavailable error
    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            message: message.into(),
        }
    }

    /// Whether this error must abort the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. })
    }
}
