//! Discovery of the images available under a root.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, trace, warn};
use walkdir::WalkDir;

use crate::domain::entities::{AvailableSet, ImageId, ImageRoot};
use crate::domain::ports::ImageDecoder;

/// File extensions recognised as images (compared case-insensitively).
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "gif", "webp"];

/// Conventional names probed when a scan finds nothing.
pub const FALLBACK_IMAGES: &[&str] = &[
    "01.png",
    "02.png",
    "03.png",
    "04.png",
    "05.png",
    "avatar1.png",
    "avatar2.png",
    "avatar3.png",
    "user.png",
    "default.png",
    "profile.png",
];

/// Returns true if `path` carries a recognised image extension.
#[must_use]
pub fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
}

/// Scans roots for images. Never fails: an empty set is a valid outcome.
pub struct ImageStore {
    decoder: Arc<dyn ImageDecoder>,
}

impl ImageStore {
    /// Creates a store validating candidates with `decoder`.
    #[must_use]
    pub fn new(decoder: Arc<dyn ImageDecoder>) -> Self {
        Self { decoder }
    }

    /// Enumerates the images under `root`, sorted.
    pub fn scan(&self, root: &ImageRoot) -> AvailableSet {
        let mut found = match root {
            ImageRoot::Directory(path) => self.scan_directory(path),
            ImageRoot::Bundled(path) => self.scan_bundle(path),
        };

        if found.is_empty() {
            warn!(root = %root, "No image files found, probing fallback names");
            found = self.probe_fallbacks(root);
        }

        let available = AvailableSet::new(found);
        info!(root = %root, count = available.len(), "Image scan complete");
        available
    }

    /// Top-level files only; a candidate is admitted once it decodes.
    fn scan_directory(&self, dir: &Path) -> Vec<ImageId> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "Cannot read image directory");
                return Vec::new();
            }
        };

        let mut found = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() || !has_image_extension(&path) {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            match self.decoder.decode(&path) {
                Ok(_) => {
                    trace!(file = name, "Found image file");
                    found.push(ImageId::new(name));
                }
                Err(e) => debug!(file = name, error = %e, "Skipping undecodable image"),
            }
        }
        found
    }

    /// Whole tree; existence is enough. Ids are root-relative paths.
    fn scan_bundle(&self, root: &Path) -> Vec<ImageId> {
        WalkDir::new(root)
            .follow_links(true)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file() && has_image_extension(entry.path()))
            .filter(|entry| self.decoder.exists(entry.path()))
            .filter_map(|entry| {
                let relative = entry.path().strip_prefix(root).ok()?;
                let parts: Vec<&str> = relative
                    .components()
                    .map(|c| c.as_os_str().to_str())
                    .collect::<Option<_>>()?;
                let id = ImageId::new(parts.join("/"));
                trace!(id = %id, "Found bundled image");
                Some(id)
            })
            .collect()
    }

    fn probe_fallbacks(&self, root: &ImageRoot) -> Vec<ImageId> {
        FALLBACK_IMAGES
            .iter()
            .map(|name| ImageId::new(*name))
            .filter(|id| self.decoder.exists(&root.resolve(id)))
            .inspect(|id| debug!(id = %id, "Found fallback image"))
            .collect()
    }
}

impl std::fmt::Debug for ImageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageStore").finish_non_exhaustive()
    }
}
