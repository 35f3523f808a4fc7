//! Single-shot background decode of one image.

use std::sync::{Arc, Weak};

use image::DynamicImage;
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

use crate::domain::entities::{ImageId, ImageRoot};
use crate::domain::errors::ImageError;
use crate::domain::ports::ImageDecoder;

/// What a load task needs from the component that scheduled it.
pub trait LoadHost: Send + Sync {
    /// Returns true if `id` is already in the pixel cache.
    fn is_loaded(&self, id: &ImageId) -> bool;

    /// Decoder used to read the file.
    fn decoder(&self) -> &dyn ImageDecoder;
}

/// Why a load was scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadReason {
    /// A caller asked for the image and got the placeholder.
    Demand,
    /// Speculative load of an image that may be needed soon.
    Prefetch,
}

/// Result of executing a load task.
#[derive(Debug, Clone)]
pub enum LoadOutcome {
    /// Decoded successfully.
    Loaded(Arc<DynamicImage>),
    /// Another path cached the image before the task ran.
    AlreadyCached,
    /// The file was missing, corrupt or empty.
    Failed(ImageError),
}

/// Message sent back to the owning context when a task finishes.
#[derive(Debug, Clone)]
pub struct LoadCompletion {
    /// The image ID.
    pub id: ImageId,
    /// Why the load was scheduled.
    pub reason: LoadReason,
    /// What happened.
    pub outcome: LoadOutcome,
}

/// Decodes `root + id` on a worker and reports back over a channel.
///
/// Consumed by [`LoadTask::execute`]; a task runs at most once.
pub struct LoadTask {
    id: ImageId,
    root: ImageRoot,
    reason: LoadReason,
    host: Weak<dyn LoadHost>,
    completion_tx: mpsc::UnboundedSender<LoadCompletion>,
}

impl LoadTask {
    /// Creates a task that reports to `completion_tx`.
    #[must_use]
    pub fn new(
        id: ImageId,
        root: ImageRoot,
        reason: LoadReason,
        host: Weak<dyn LoadHost>,
        completion_tx: mpsc::UnboundedSender<LoadCompletion>,
    ) -> Self {
        Self {
            id,
            root,
            reason,
            host,
            completion_tx,
        }
    }

    /// Runs the task. Blocking; call it from a worker thread.
    pub fn execute(self) {
        let Some(host) = self.host.upgrade() else {
            error!(id = %self.id, "Load task outlived its image manager");
            return;
        };

        let outcome = if host.is_loaded(&self.id) {
            trace!(id = %self.id, "Image cached before load task ran");
            LoadOutcome::AlreadyCached
        } else {
            let path = self.root.resolve(&self.id);
            match host.decoder().decode(&path) {
                Ok(image) => {
                    debug!(id = %self.id, path = %path.display(), "Loaded image in background");
                    LoadOutcome::Loaded(Arc::new(image))
                }
                Err(e) => {
                    warn!(id = %self.id, error = %e, "Failed to load image");
                    LoadOutcome::Failed(e)
                }
            }
        };
        drop(host);

        let completion = LoadCompletion {
            id: self.id,
            reason: self.reason,
            outcome,
        };
        if let Err(e) = self.completion_tx.send(completion) {
            debug!(id = %e.0.id, "Completion dropped, image manager shut down");
        }
    }
}

impl std::fmt::Debug for LoadTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadTask")
            .field("id", &self.id)
            .field("root", &self.root)
            .field("reason", &self.reason)
            .finish_non_exhaustive()
    }
}
