//! Port definition for reading image files.

use std::path::Path;

use image::DynamicImage;

use crate::domain::errors::ImageResult;

/// Capability to turn a stored file into pixel data.
/// Implementations must be thread-safe; they are called from worker threads.
pub trait ImageDecoder: Send + Sync {
    /// Decodes the file at `path`.
    ///
    /// # Errors
    /// Returns error if the file is missing, unreadable, corrupt or empty.
    fn decode(&self, path: &Path) -> ImageResult<DynamicImage>;

    /// Returns true if a file exists at `path`.
    fn exists(&self, path: &Path) -> bool;
}
