//! Image manager - bounded avatar/image cache with background loading.
//!
//! Resolves image ids to decoded pixels through an in-memory cache, loads
//! misses off the calling thread and prefetches neighbouring images.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Domain layer containing entities, errors, and port definitions.
pub mod domain;
/// Infrastructure layer containing the image pipeline and configuration.
pub mod infrastructure;

/// Current version of the library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name.
pub const NAME: &str = "image-manager";
