//! Infrastructure layer with adapters for storage, decoding and configuration.

/// Application configuration.
pub mod config;
/// Image handling (scanning, caching, loading, prefetch).
pub mod image;

pub use config::{AppConfig, CliArgs, ConfigError, LogLevel, StorageManager};
pub use self::image::{
    CacheStats, FileImageDecoder, ImageManager, ImageStore, ManagerConfig, ManagerStats,
    PixelCache,
};
