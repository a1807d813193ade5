//! Error types for Kino Playback

use crate::types::{Command, PlaybackState};
use thiserror::Error;

/// Result type alias for playback operations
pub type Result<T> = std::result::Result<T, Error>;

/// Playback error types
#[derive(Error, Debug)]
pub enum Error {
    // Command errors
    #[error("Cannot {command} while in the '{state}' state")]
    InvalidCommand {
        command: Command,
        state: PlaybackState,
    },

    #[error("{command} is not supported for {capability}")]
    Unsupported {
        command: Command,
        capability: &'static str,
    },

    #[error("Session has been torn down")]
    TornDown,

    #[error("Session is not initialised")]
    NotInitialised,

    // Source errors
    #[error("Media sources urls are empty")]
    NoSources,

    #[error("Invalid media url: {0}")]
    InvalidMediaUrl(String),

    // Manifest errors
    #[error("Failed to fetch manifest: {0}")]
    ManifestFetch(String),

    #[error("Failed to parse manifest: {0}")]
    ManifestParse(String),

    #[error("Manifest timing error: {0}")]
    ManifestTiming(String),

    #[error("Manifest request timed out: {0}")]
    ManifestTimeout(String),

    // Device errors
    #[error("Device setup failed: {0}")]
    DeviceSetup(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Network errors
    #[cfg(feature = "http")]
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    // Internal errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create an invalid command error
    pub fn invalid(command: Command, state: PlaybackState) -> Self {
        Error::InvalidCommand { command, state }
    }

    /// Returns true if this error is recoverable by failing over to another source
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::ManifestFetch(_) | Error::ManifestParse(_) | Error::ManifestTimeout(_)
        ) || self.is_network()
    }

    #[cfg(feature = "http")]
    fn is_network(&self) -> bool {
        matches!(self, Error::Network(_))
    }

    #[cfg(not(feature = "http"))]
    fn is_network(&self) -> bool {
        false
    }

    /// Returns the error code for logs and analytics
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::InvalidCommand { .. } => "INVALID_COMMAND",
            Error::Unsupported { .. } => "UNSUPPORTED",
            Error::TornDown => "TORN_DOWN",
            Error::NotInitialised => "NOT_INITIALISED",
            Error::NoSources => "NO_SOURCES",
            Error::InvalidMediaUrl(_) => "INVALID_MEDIA_URL",
            Error::ManifestFetch(_) => "MANIFEST_FETCH",
            Error::ManifestParse(_) => "MANIFEST_PARSE",
            Error::ManifestTiming(_) => "MANIFEST_TIMING",
            Error::ManifestTimeout(_) => "MANIFEST_TIMEOUT",
            Error::DeviceSetup(_) => "DEVICE_SETUP",
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            #[cfg(feature = "http")]
            Error::Network(_) => "NETWORK",
            Error::Json(_) => "JSON",
            Error::Io(_) => "IO",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_command_message() {
        let err = Error::invalid(Command::Pause, PlaybackState::Empty);
        assert_eq!(err.to_string(), "Cannot pause while in the 'EMPTY' state");
        assert_eq!(err.error_code(), "INVALID_COMMAND");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_manifest_errors_are_recoverable() {
        assert!(Error::ManifestFetch("404".into()).is_recoverable());
        assert!(Error::ManifestParse("bad xml".into()).is_recoverable());
        assert!(!Error::NoSources.is_recoverable());
    }
}
