//! Error types for framepump
//!
//! This module defines the error taxonomy used throughout the engine.
//! We use thiserror for the error type definitions; the CLI binary wraps
//! everything in anyhow at its outermost layer.

use crate::player::{PlaybackState, Request};
use thiserror::Error;

/// Main error type for the playback engine
#[derive(Error, Debug)]
pub enum PlayerError {
    /// Source missing or unreadable at prepare time
    #[error("Source error: {0}")]
    Source(String),

    /// No track matching the required content-type prefix
    #[error("Format error: {0}")]
    Format(String),

    /// Decoder session creation, buffer submission, or output retrieval failure
    #[error("Codec error: {0}")]
    Codec(String),

    /// A request that is invalid for the current playback state.
    ///
    /// This is a programming-contract violation by the caller and is fatal
    /// to the control loop.
    #[error("Illegal request {request:?} in state {state:?}")]
    IllegalRequest {
        state: PlaybackState,
        request: Request,
    },

    /// File I/O errors
    #[error("File error: {0}")]
    FileIO(#[from] std::io::Error),

    /// Generic error for unexpected situations
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ffmpeg_next::Error> for PlayerError {
    fn from(err: ffmpeg_next::Error) -> Self {
        PlayerError::Codec(format!("FFmpeg error: {}", err))
    }
}

impl PlayerError {
    /// Create a codec error from string
    pub fn codec_error<S: Into<String>>(msg: S) -> Self {
        PlayerError::Codec(msg.into())
    }

    /// True for faults that abort the control loop instead of recycling it
    pub fn is_fatal_to_loop(&self) -> bool {
        matches!(self, PlayerError::IllegalRequest { .. })
    }
}

/// Convenience type alias for Results in framepump
pub type Result<T> = std::result::Result<T, PlayerError>;

/// Extension trait for converting other errors to PlayerError
pub trait IntoPlayerError<T> {
    /// Convert this error into a Source error with the given context
    fn source_err(self, context: &str) -> Result<T>;
    fn codec_err(self, context: &str) -> Result<T>;
}

impl<T, E: std::fmt::Display> IntoPlayerError<T> for std::result::Result<T, E> {
    fn source_err(self, context: &str) -> Result<T> {
        self.map_err(|e| PlayerError::Source(format!("{}: {}", context, e)))
    }

    fn codec_err(self, context: &str) -> Result<T> {
        self.map_err(|e| PlayerError::Codec(format!("{}: {}", context, e)))
    }
}
