//! Image acquisition error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while locating or decoding images.
///
/// These never leave the manager's public API; they are logged and turned
/// into a placeholder or a `LoadFailed` event.
#[derive(Debug, Clone, Error)]
pub enum ImageError {
    /// No file at the path.
    #[error("image not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The file exists but is not a readable image.
    #[error("failed to decode {}: {message}", .path.display())]
    Decode {
        /// File that failed to decode.
        path: PathBuf,
        /// Decoder error text.
        message: String,
    },

    /// Decoded to zero width or height.
    #[error("decoded image is empty: {}", .0.display())]
    EmptyImage(PathBuf),

    /// Reading the file failed.
    #[error("io error: {0}")]
    Io(String),
}

/// Result type for image operations.
pub type ImageResult<T> = std::result::Result<T, ImageError>;
