//! Error types shared by every voxflow crate

use std::time::Duration;
use thiserror::Error;

/// Errors raised by frames, processors and service adapters
///
/// Processors never let these escape the dispatch loop: the runtime turns
/// them into [`crate::ErrorFrame`]s pushed upstream.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Invalid pipeline wiring or settings. Fatal, raised at construction.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An external dependency of an adapter is unreachable
    #[error("Connection error: {0}")]
    Connection(String),

    /// Malformed data received from an external source
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Frame payload failed validation at construction
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Bounded wait on an external response expired
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Neighbor or task channel is gone
    #[error("Channel closed")]
    ChannelClosed,

    /// Failure reported by a named processor
    #[error("{processor}: {message}")]
    Processor { processor: String, message: String },
}

impl Error {
    /// Build a processor error
    pub fn processor(processor: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Processor {
            processor: processor.into(),
            message: message.into(),
        }
    }

    /// Whether a reconnect or retry can reasonably succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
