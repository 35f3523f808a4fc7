//! Filesystem-backed image decoder.

use std::path::Path;

use image::{DynamicImage, ImageReader};
use tracing::trace;

use crate::domain::errors::{ImageError, ImageResult};
use crate::domain::ports::ImageDecoder;

/// Decodes images straight from disk with the `image` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileImageDecoder;

impl FileImageDecoder {
    /// Creates a decoder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ImageDecoder for FileImageDecoder {
    fn decode(&self, path: &Path) -> ImageResult<DynamicImage> {
        if !path.is_file() {
            return Err(ImageError::NotFound(path.to_path_buf()));
        }

        let decode_error = |message: String| ImageError::Decode {
            path: path.to_path_buf(),
            message,
        };

        let image = ImageReader::open(path)
            .map_err(|e| ImageError::Io(format!("{}: {e}", path.display())))?
            .with_guessed_format()
            .map_err(|e| ImageError::Io(format!("{}: {e}", path.display())))?
            .decode()
            .map_err(|e| decode_error(e.to_string()))?;

        if image.width() == 0 || image.height() == 0 {
            return Err(ImageError::EmptyImage(path.to_path_buf()));
        }

        trace!(path = %path.display(), width = image.width(), height = image.height(), "Decoded image");
        Ok(image)
    }

    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }
}
