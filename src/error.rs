//! Error types for renderer, worker and streaming operations.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, LookerError>;

/// Errors that can occur while decoding samples, streaming frames or driving a looker.
#[derive(Error, Debug)]
pub enum LookerError {
    /// A worker message named a method the worker does not implement
    #[error("unknown method: {0}")]
    UnknownMethod(String),

    /// A worker message could not be interpreted
    #[error("malformed worker message: {message}")]
    MalformedMessage {
        /// Description of what was wrong with the message
        message: String,
    },

    /// `reset_to_fragment` was called without a configured fragment
    #[error("No fragment set")]
    NoFragment,

    /// A seek targeted a frame outside of the video
    #[error("Invalid seek: frame {frame} is outside 1..={frame_count}")]
    InvalidSeek {
        /// Requested frame number
        frame: u32,
        /// Number of frames in the video
        frame_count: u32,
    },

    /// Fetching a frame chunk failed
    #[error("Frame request failed: {0}")]
    Transport(String),

    /// Sample or media data has a shape the renderer does not support
    #[error("Unsupported data: {0}")]
    UnsupportedData(String),

    /// A worker thread could not be started or has gone away
    #[error("Worker unavailable: {0}")]
    WorkerUnavailable(String),

    /// Invalid settings or command-line arguments
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// JSON parsing or serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image encoding error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl LookerError {
    /// Create a malformed message error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedMessage {
            message: message.into(),
        }
    }

    /// Create a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Create an unsupported data error.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::UnsupportedData(message.into())
    }

    /// Whether the error is a protocol error (fatal to the message that caused it).
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::UnknownMethod(_) | Self::MalformedMessage { .. })
    }
}
