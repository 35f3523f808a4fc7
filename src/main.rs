use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use color_eyre::eyre::Result;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use image_manager::domain::{ImageEvent, ImageId, ImageRoot};
use image_manager::infrastructure::{
    AppConfig, CliArgs, FileImageDecoder, ImageManager, StorageManager,
};

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    if let Some(log_path) = &config.log_path {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;

        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .init();

        info!(path = %log_path.display(), "Logging initialized");
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    Ok(())
}

fn load_config(args: &CliArgs) -> Result<AppConfig> {
    let storage = StorageManager::new()?;
    let mut config = storage.load_config(args.config.as_deref())?;
    config.merge_with_args(args);
    Ok(config)
}

fn describe(event: &ImageEvent) -> String {
    match event {
        ImageEvent::Loaded { id, image } => {
            format!("loaded {id} ({}x{})", image.width(), image.height())
        }
        ImageEvent::LoadFailed { id } => format!("failed {id}"),
        ImageEvent::Initialized { count } => format!("initialized with {count} images"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = CliArgs::parse();
    let config = load_config(&args)?;
    init_logging(&config)?;

    info!(version = image_manager::VERSION, "Starting {}", image_manager::NAME);

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let manager = ImageManager::new(
        config.images.clone(),
        Arc::new(FileImageDecoder::new()),
        &event_tx,
        Handle::current(),
    );

    let root = ImageRoot::parse(config.effective_root());
    let count = manager.initialize(root.clone());
    println!("{count} images available under {root}");

    if args.preload_all {
        let all = manager.all_ids();
        let scheduled = manager.preload_many(all.iter());
        println!("preloading {scheduled} images");
    }

    let ids: Vec<ImageId> = if args.ids.is_empty() {
        manager.get_random().into_iter().collect()
    } else {
        args.ids.iter().map(|id| ImageId::new(id.as_str())).collect()
    };

    let placeholder = manager.placeholder();
    for id in &ids {
        let image = manager.get(id);
        let status = manager.status(id);
        let state = if status.is_ready() {
            "cached"
        } else if status.is_loading() {
            "loading"
        } else if Arc::ptr_eq(&image, &placeholder) {
            "missing"
        } else {
            "uncached"
        };
        println!("{id}: {}x{} {state}", image.width(), image.height());
    }

    let wait = Duration::from_millis(args.wait_ms);
    while let Ok(Some(event)) = tokio::time::timeout(wait, event_rx.recv()).await {
        debug!(?event, "Image event");
        println!("{}", describe(&event));
    }

    println!("{}", manager.cache_stats());
    println!("{}", manager.stats());

    manager.shutdown();
    Ok(())
}
