//! Error types for the launch sequence.

use std::io;

/// Failures that abort a launch.
///
/// Only display failures have a fallback; everything here propagates to the
/// caller unchanged.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("No free port found between {start} and {end}")]
    ResourceExhausted { start: u16, end: u16 },

    #[error("Failed to read cluster context value '{field}': {message}")]
    ContextRetrievalFailed { field: &'static str, message: String },

    #[error("Failed to start visualization server on port {port}: {source}")]
    ProcessStartFailed {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("Invalid server URL '{url}': {source}")]
    InvalidServerUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// No display capability was available in the calling context.
///
/// Recoverable: the launcher prints the link as plain text instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("No display capability available: {0}")]
pub struct DisplayUnavailable(pub String);
