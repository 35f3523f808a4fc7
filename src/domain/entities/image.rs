//! Domain types for image handling.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::DynamicImage;
use rand::seq::SliceRandom;

/// Textual prefix marking a bundled resource root.
pub const BUNDLED_PREFIX: &str = ":/";

/// Identifier of a requestable image: its file name relative to the scanned root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageId(String);

impl ImageId {
    /// Creates a new `ImageId` from any string-like input.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ImageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ImageId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ImageId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Sorted, de-duplicated set of every image a scan discovered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AvailableSet {
    ids: Vec<ImageId>,
}

impl AvailableSet {
    /// Builds a set from ids in any order.
    #[must_use]
    pub fn new(ids: impl IntoIterator<Item = ImageId>) -> Self {
        let mut ids: Vec<ImageId> = ids.into_iter().collect();
        ids.sort();
        ids.dedup();
        Self { ids }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: &ImageId) -> bool {
        self.position(id).is_some()
    }

    /// Index of `id` in sorted order.
    #[must_use]
    pub fn position(&self, id: &ImageId) -> Option<usize> {
        self.ids.binary_search(id).ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ImageId> {
        self.ids.iter()
    }

    /// Up to `range` ids on each side of `id`, excluding `id` itself.
    ///
    /// Returns an empty list when `id` is not part of the set.
    #[must_use]
    pub fn neighbours(&self, id: &ImageId, range: usize) -> Vec<ImageId> {
        let Some(index) = self.position(id) else {
            return Vec::new();
        };
        let start = index.saturating_sub(range);
        let end = index.saturating_add(range).min(self.ids.len() - 1);

        (start..=end)
            .filter(|&i| i != index)
            .map(|i| self.ids[i].clone())
            .collect()
    }

    /// Uniformly random member, or `None` when empty.
    #[must_use]
    pub fn choose_random(&self) -> Option<ImageId> {
        self.ids.choose(&mut rand::thread_rng()).cloned()
    }
}

impl IntoIterator for AvailableSet {
    type Item = ImageId;
    type IntoIter = std::vec::IntoIter<ImageId>;

    fn into_iter(self) -> Self::IntoIter {
        self.ids.into_iter()
    }
}

/// Location images are scanned from and loaded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRoot {
    /// Plain directory. Scanned non-recursively; every candidate is decoded
    /// before it is admitted.
    Directory(PathBuf),
    /// Resource tree shipped with the application. Scanned recursively;
    /// existence is enough to admit a file.
    Bundled(PathBuf),
}

impl ImageRoot {
    /// Parses a textual root. A leading `:/` denotes a bundled tree.
    #[must_use]
    pub fn parse(root: &str) -> Self {
        match root.strip_prefix(BUNDLED_PREFIX) {
            Some(rest) if rest.is_empty() => Self::Bundled(PathBuf::from(".")),
            Some(rest) => Self::Bundled(PathBuf::from(rest)),
            None => Self::Directory(PathBuf::from(root)),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Directory(path) | Self::Bundled(path) => path,
        }
    }

    #[must_use]
    pub const fn is_bundled(&self) -> bool {
        matches!(self, Self::Bundled(_))
    }

    /// Full path of `id` under this root.
    #[must_use]
    pub fn resolve(&self, id: &ImageId) -> PathBuf {
        self.path().join(id.as_str())
    }
}

impl Default for ImageRoot {
    fn default() -> Self {
        Self::Directory(PathBuf::from("."))
    }
}

impl std::fmt::Display for ImageRoot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Directory(path) => write!(f, "{}", path.display()),
            Self::Bundled(path) => write!(f, "{BUNDLED_PREFIX}{}", path.display()),
        }
    }
}

/// Where an id currently sits in the loading pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageStatus {
    /// Decoded pixels are in the cache.
    Cached,
    /// A load task is outstanding.
    Loading,
    /// Neither cached nor loading.
    Absent,
}

impl ImageStatus {
    /// Returns true if the image is ready for rendering.
    #[must_use]
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Cached)
    }

    /// Returns true if the image is currently being loaded.
    #[must_use]
    pub const fn is_loading(self) -> bool {
        matches!(self, Self::Loading)
    }
}

/// Notification delivered to collaborators interested in image availability.
#[derive(Debug, Clone)]
pub enum ImageEvent {
    /// An asynchronous load finished and the pixels are now cached.
    Loaded {
        /// The image ID.
        id: ImageId,
        /// The decoded image.
        image: Arc<DynamicImage>,
    },
    /// An asynchronous load could not produce pixels.
    LoadFailed {
        /// The image ID.
        id: ImageId,
    },
    /// A scan finished.
    Initialized {
        /// Number of discovered images.
        count: usize,
    },
}

/// Approximate memory footprint of a decoded image, in KB.
#[must_use]
pub fn image_cost(image: &DynamicImage) -> u64 {
    let bytes_per_pixel = u64::from(image.color().bytes_per_pixel());
    u64::from(image.width()) * u64::from(image.height()) * bytes_per_pixel / 1024
}
