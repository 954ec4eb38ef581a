//! Error types shared across the simulator crates.

use thiserror::Error;

/// Core error type for mqtt-sim.
#[derive(Debug, Error)]
pub enum Error {
    /// The requested device type has no registered kind.
    #[error("Unsupported device type: {0}")]
    UnsupportedType(String),

    /// A command or capability set was rejected by a kind.
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// No device with the given identifier exists.
    #[error("Device not found: {0}")]
    NotFound(String),

    /// Slug uniqueness could not be resolved.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// An import finished but some entries failed.
    #[error("Import finished with {errors} failed entries")]
    PartialImportFailure { errors: usize },

    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage/database errors.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization errors.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Whether the error was caused by the caller's input rather than the system.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedType(_)
                | Self::ValidationFailed(_)
                | Self::NotFound(_)
                | Self::Conflict(_)
        )
    }
}

/// Result type alias for convenience.
pub type Result<T> = std::result::Result<T, Error>;

#[macro_export]
macro_rules! validation_err {
    ($msg:expr) => {
        $crate::error::Error::ValidationFailed($msg.into())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::Error::ValidationFailed(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! not_found_err {
    ($msg:expr) => {
        $crate::error::Error::NotFound($msg.into())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::Error::NotFound(format!($fmt, $($arg)*))
    };
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_classification() {
        assert!(Error::UnsupportedType("lamp".into()).is_client_error());
        assert!(validation_err!("brightness {}..{}", 0, 255).is_client_error());
        assert!(not_found_err!("abc").is_client_error());
        assert!(!Error::Storage("disk".into()).is_client_error());
        assert!(!Error::PartialImportFailure { errors: 2 }.is_client_error());
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            Error::UnsupportedType("lamp".into()).to_string(),
            "Unsupported device type: lamp"
        );
        assert_eq!(
            validation_err!("position 0..100").to_string(),
            "Validation failed: position 0..100"
        );
    }
}
