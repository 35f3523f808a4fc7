//! Image handling infrastructure.
//!
//! This module provides:
//! - Directory and bundled-resource scanning
//! - A cost-bounded LRU pixel cache
//! - Background load tasks with de-duplication
//! - Access history driven neighbour prefetch
//! - The image manager tying them together

pub mod access_tracker;
pub mod decoder;
pub mod loader;
pub mod manager;
pub mod memory_cache;
pub mod store;

pub use access_tracker::{AccessTracker, prefetch_candidates};
pub use decoder::FileImageDecoder;
pub use loader::{LoadCompletion, LoadHost, LoadOutcome, LoadReason, LoadTask};
pub use manager::{ImageManager, ManagerConfig, ManagerStats, PLACEHOLDER_SIZE};
pub use memory_cache::{CacheStats, PixelCache};
pub use store::{ImageStore, has_image_extension};
