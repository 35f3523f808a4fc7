//! Command-line arguments.

use super::app_config::LogLevel;
use clap::Parser;
use std::path::PathBuf;

/// Flags that override the configuration file.
#[derive(Debug, Parser)]
#[command(
    name = "image-manager",
    version,
    about = "Scan an image root and serve images through a bounded cache",
    long_about = None
)]
pub struct CliArgs {
    /// Configuration file path.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[arg(long, value_name = "PATH")]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Image root to scan (prefix with `:/` for a bundled resource tree).
    #[arg(short, long, value_name = "ROOT")]
    pub root: Option<String>,

    /// Cache ceiling in MB.
    #[arg(long)]
    pub cache_limit_mb: Option<u64>,

    /// Disable neighbour prefetch.
    #[arg(long)]
    pub no_preload: bool,

    /// Maximum loads started by one preload batch.
    #[arg(long)]
    pub max_preload: Option<usize>,

    /// Image ids to request. A random one is requested when empty.
    #[arg(short, long = "get", value_name = "ID")]
    pub ids: Vec<String>,

    /// Preload every available image before requesting.
    #[arg(long)]
    pub preload_all: bool,

    /// How long to wait for background loads, in milliseconds.
    #[arg(long, default_value_t = 500)]
    pub wait_ms: u64,
}
