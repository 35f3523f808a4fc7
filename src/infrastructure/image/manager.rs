//! Image manager: cache fast path, background loads, prefetch and maintenance.
//!
//! All mutation triggered by background work (cache fill after a load, the
//! prefetch follow-up, the periodic pressure check) runs on one owning task
//! that drains a completion channel. Workers only decode and send.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use image::{DynamicImage, Rgba, RgbaImage};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::domain::entities::{
    AvailableSet, ImageEvent, ImageId, ImageRoot, ImageStatus, image_cost,
};
use crate::domain::ports::ImageDecoder;

use super::access_tracker::{
    AccessTracker, DEFAULT_HISTORY_LIMIT, DEFAULT_PREFETCH_RANGE, prefetch_candidates,
};
use super::loader::{LoadCompletion, LoadHost, LoadOutcome, LoadReason, LoadTask};
use super::memory_cache::{CacheStats, DEFAULT_CACHE_CAPACITY, PixelCache};
use super::store::ImageStore;

/// Edge length of the placeholder image in pixels.
pub const PLACEHOLDER_SIZE: u32 = 48;

/// Gray level of the placeholder image.
pub const PLACEHOLDER_GRAY: u8 = 128;

const KB_PER_MB: u64 = 1024;
const MIN_CLEANUP_INTERVAL: Duration = Duration::from_millis(1);

/// Configuration for the image manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Pixel cache ceiling in MB.
    pub cache_limit_mb: u64,
    /// Maximum number of cached images.
    pub cache_capacity: usize,
    /// Enables neighbour prefetch and caps `preload_many`.
    pub preload_enabled: bool,
    /// Maximum loads a single `preload_many` call may schedule.
    pub max_preload_count: usize,
    /// Period of the cache pressure check.
    pub cleanup_interval_ms: u64,
    /// Delay between an access and the prefetch it triggers.
    pub prefetch_delay_ms: u64,
    /// Neighbours considered on each side of an accessed image.
    pub prefetch_range: usize,
    /// Length of the access history.
    pub history_limit: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            cache_limit_mb: 50,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            preload_enabled: true,
            max_preload_count: 20,
            cleanup_interval_ms: 300_000,
            prefetch_delay_ms: 100,
            prefetch_range: DEFAULT_PREFETCH_RANGE,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl ManagerConfig {
    /// Cleanup period, never shorter than one millisecond.
    #[must_use]
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms).max(MIN_CLEANUP_INTERVAL)
    }

    /// Delay between an access and its prefetch.
    #[must_use]
    pub const fn prefetch_delay(&self) -> Duration {
        Duration::from_millis(self.prefetch_delay_ms)
    }
}

/// Counters describing background load activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManagerStats {
    /// Load tasks handed to the worker pool.
    pub loads_scheduled: u64,
    /// Load tasks that produced pixels.
    pub loads_completed: u64,
    /// Load tasks that failed to produce pixels.
    pub loads_failed: u64,
    /// Ids currently being loaded.
    pub in_flight: usize,
}

impl std::fmt::Display for ManagerStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Loads: {} scheduled, {} completed, {} failed, {} in flight",
            self.loads_scheduled, self.loads_completed, self.loads_failed, self.in_flight
        )
    }
}

/// Shared state behind an [`ImageManager`].
///
/// Lock order when more than one is needed: cache, history, in-flight.
struct ManagerState {
    cache: PixelCache,
    tracker: AccessTracker,
    in_flight: Mutex<HashSet<ImageId>>,
    available: RwLock<AvailableSet>,
    root: RwLock<ImageRoot>,
    decoder: Arc<dyn ImageDecoder>,
    store: ImageStore,
    placeholder: Arc<DynamicImage>,
    preload_enabled: AtomicBool,
    max_preload_count: AtomicUsize,
    prefetch_range: usize,
    prefetch_delay: Duration,
    event_tx: mpsc::UnboundedSender<ImageEvent>,
    completion_tx: mpsc::UnboundedSender<LoadCompletion>,
    prefetch_tx: mpsc::UnboundedSender<ImageId>,
    runtime: Handle,
    loads_scheduled: AtomicU64,
    loads_completed: AtomicU64,
    loads_failed: AtomicU64,
}

impl LoadHost for ManagerState {
    fn is_loaded(&self, id: &ImageId) -> bool {
        self.cache.contains(id)
    }

    fn decoder(&self) -> &dyn ImageDecoder {
        self.decoder.as_ref()
    }
}

impl ManagerState {
    fn get(self: &Arc<Self>, id: &ImageId) -> Arc<DynamicImage> {
        if let Some(image) = self.cache.get(id) {
            self.record_access(id, true);
            return image;
        }

        if self.in_flight.lock().contains(id) {
            trace!(id = %id, "Image already loading, returning placeholder");
            return self.placeholder.clone();
        }

        let path = self.root.read().resolve(id);
        match self.decoder.decode(&path) {
            Ok(image) => {
                let image = Arc::new(image);
                self.cache.put(id.clone(), image.clone(), image_cost(&image));
                self.record_access(id, true);
                image
            }
            Err(e) => {
                debug!(id = %id, error = %e, "Synchronous load failed, loading asynchronously");
                self.load_async(id, LoadReason::Demand);
                self.record_access(id, true);
                self.placeholder.clone()
            }
        }
    }

    /// Hands a load task to the worker pool unless `id` is cached or already
    /// loading. Returns true if a task was scheduled.
    fn load_async(self: &Arc<Self>, id: &ImageId, reason: LoadReason) -> bool {
        if self.cache.contains(id) {
            return false;
        }
        if !self.in_flight.lock().insert(id.clone()) {
            trace!(id = %id, "Load already in flight");
            return false;
        }

        let host: Weak<dyn LoadHost> = Arc::downgrade(self) as Weak<dyn LoadHost>;
        let task = LoadTask::new(
            id.clone(),
            self.root.read().clone(),
            reason,
            host,
            self.completion_tx.clone(),
        );
        self.loads_scheduled.fetch_add(1, Ordering::Relaxed);
        trace!(id = %id, ?reason, "Scheduling image load");
        self.runtime.spawn_blocking(move || task.execute());
        true
    }

    fn record_access(&self, id: &ImageId, allow_prefetch: bool) {
        let len = self.tracker.record(id);
        if allow_prefetch && len > 1 && self.preload_enabled.load(Ordering::Relaxed) {
            self.schedule_prefetch(id.clone());
        }
    }

    /// Defers a prefetch around `id` to the owning task.
    fn schedule_prefetch(&self, id: ImageId) {
        let prefetch_tx = self.prefetch_tx.clone();
        let delay = self.prefetch_delay;
        self.runtime.spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(delay) => {
                    let _ = prefetch_tx.send(id);
                }
                () = prefetch_tx.closed() => {}
            }
        });
    }

    fn smart_preload(self: &Arc<Self>, id: &ImageId) -> usize {
        let candidates = {
            let available = self.available.read();
            prefetch_candidates(&available, id, self.prefetch_range, |candidate| {
                self.cache.contains(candidate)
            })
        };

        let scheduled = candidates
            .iter()
            .filter(|candidate| self.load_async(candidate, LoadReason::Prefetch))
            .count();
        if scheduled > 0 {
            debug!(id = %id, scheduled, "Prefetching neighbouring images");
        }
        scheduled
    }

    /// Applies a finished load. A completion for an id that another path
    /// already cached simply replaces the entry.
    fn on_load_finished(&self, completion: LoadCompletion) {
        let LoadCompletion {
            id,
            reason,
            outcome,
        } = completion;

        match outcome {
            LoadOutcome::Loaded(image) => {
                self.cache.put(id.clone(), image.clone(), image_cost(&image));
                self.loads_completed.fetch_add(1, Ordering::Relaxed);
                self.record_access(&id, reason == LoadReason::Demand);
                self.in_flight.lock().remove(&id);
                debug!(id = %id, ?reason, "Image load completed");
                self.emit(ImageEvent::Loaded { id, image });
            }
            LoadOutcome::AlreadyCached => {
                self.in_flight.lock().remove(&id);
            }
            LoadOutcome::Failed(e) => {
                self.loads_failed.fetch_add(1, Ordering::Relaxed);
                self.in_flight.lock().remove(&id);
                warn!(id = %id, error = %e, "Image load failed");
                self.emit(ImageEvent::LoadFailed { id });
            }
        }
    }

    fn run_cleanup(&self) -> usize {
        let evicted = self.cache.remove_if_exceeds_pressure();
        if evicted > 0 {
            info!(evicted, usage_kb = self.cache.total_cost(), "Cache cleanup evicted images");
        }
        evicted
    }

    fn emit(&self, event: ImageEvent) {
        if self.event_tx.send(event).is_err() {
            trace!("No listener for image events");
        }
    }
}

/// Owning task: applies completions, runs deferred prefetches and the
/// periodic cleanup. Exits once the manager is dropped.
async fn run_event_loop(
    state: Weak<ManagerState>,
    mut completion_rx: mpsc::UnboundedReceiver<LoadCompletion>,
    mut prefetch_rx: mpsc::UnboundedReceiver<ImageId>,
    mut interval_rx: watch::Receiver<Duration>,
) {
    let new_interval = |period: Duration| {
        tokio::time::interval_at(tokio::time::Instant::now() + period, period)
    };
    let mut cleanup = new_interval(*interval_rx.borrow());

    loop {
        tokio::select! {
            Some(completion) = completion_rx.recv() => {
                let Some(state) = state.upgrade() else { break };
                state.on_load_finished(completion);
            }
            Some(id) = prefetch_rx.recv() => {
                let Some(state) = state.upgrade() else { break };
                state.smart_preload(&id);
            }
            _ = cleanup.tick() => {
                let Some(state) = state.upgrade() else { break };
                state.run_cleanup();
            }
            changed = interval_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let period = *interval_rx.borrow_and_update();
                debug!(period_ms = period.as_millis(), "Cleanup interval changed");
                cleanup = new_interval(period);
            }
        }
    }
    debug!("Image manager event loop stopped");
}

/// Resolves image ids to pixels with a bounded cache, background loading
/// and neighbour prefetch.
///
/// None of the public operations fail: anything that cannot be served right
/// away is answered with the placeholder, and interested parties learn about
/// the outcome through [`ImageEvent`]s.
pub struct ImageManager {
    state: Arc<ManagerState>,
    interval_tx: watch::Sender<Duration>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ImageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageManager")
            .field("root", &*self.state.root.read())
            .field("count", &self.count())
            .field("cache", &self.state.cache)
            .finish_non_exhaustive()
    }
}

impl ImageManager {
    /// Creates a manager and starts its owning task on `runtime`.
    ///
    /// Load tasks run on the runtime's blocking pool; events are sent to
    /// `event_tx`.
    #[must_use]
    pub fn new(
        config: ManagerConfig,
        decoder: Arc<dyn ImageDecoder>,
        event_tx: &mpsc::UnboundedSender<ImageEvent>,
        runtime: Handle,
    ) -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (prefetch_tx, prefetch_rx) = mpsc::unbounded_channel();
        let (interval_tx, interval_rx) = watch::channel(config.cleanup_interval());

        let state = Arc::new(ManagerState {
            cache: PixelCache::new(
                config.cache_capacity,
                config.cache_limit_mb.saturating_mul(KB_PER_MB),
            ),
            tracker: AccessTracker::new(config.history_limit),
            in_flight: Mutex::new(HashSet::new()),
            available: RwLock::new(AvailableSet::default()),
            root: RwLock::new(ImageRoot::default()),
            store: ImageStore::new(decoder.clone()),
            decoder,
            placeholder: Arc::new(placeholder_image()),
            preload_enabled: AtomicBool::new(config.preload_enabled),
            max_preload_count: AtomicUsize::new(config.max_preload_count),
            prefetch_range: config.prefetch_range,
            prefetch_delay: config.prefetch_delay(),
            event_tx: event_tx.clone(),
            completion_tx,
            prefetch_tx,
            runtime: runtime.clone(),
            loads_scheduled: AtomicU64::new(0),
            loads_completed: AtomicU64::new(0),
            loads_failed: AtomicU64::new(0),
        });

        let event_loop = runtime.spawn(run_event_loop(
            Arc::downgrade(&state),
            completion_rx,
            prefetch_rx,
            interval_rx,
        ));

        debug!(?config, "Image manager created");

        Self {
            state,
            interval_tx,
            event_loop: Mutex::new(Some(event_loop)),
        }
    }

    /// Scans `root`, replaces the available set and emits
    /// [`ImageEvent::Initialized`]. Returns the number of images found.
    ///
    /// Later loads resolve ids against `root`. Concurrent calls race; the
    /// last one wins.
    pub fn initialize(&self, root: ImageRoot) -> usize {
        *self.state.root.write() = root.clone();
        let available = self.state.store.scan(&root);
        let count = available.len();
        *self.state.available.write() = available;

        info!(root = %root, count, "Image manager initialized");
        self.state.emit(ImageEvent::Initialized { count });
        count
    }

    /// Returns the pixels for `id`, or the placeholder while they are not
    /// available.
    ///
    /// On a cache miss this tries one synchronous decode before falling back
    /// to a background load, so the calling thread may block briefly.
    pub fn get(&self, id: &ImageId) -> Arc<DynamicImage> {
        self.state.get(id)
    }

    /// Schedules a background load of `id` unless it is cached or loading.
    pub fn preload(&self, id: &ImageId) -> bool {
        self.state.load_async(id, LoadReason::Prefetch)
    }

    /// Schedules background loads for `ids`, skipping cached and loading
    /// ones. With preload enabled at most `max_preload_count` loads are
    /// started per call. Returns the number scheduled.
    pub fn preload_many<'a>(&self, ids: impl IntoIterator<Item = &'a ImageId>) -> usize {
        let capped = self.state.preload_enabled.load(Ordering::Relaxed);
        let max = self.state.max_preload_count.load(Ordering::Relaxed);

        let mut scheduled = 0;
        for id in ids {
            if capped && scheduled >= max {
                break;
            }
            if self.state.load_async(id, LoadReason::Prefetch) {
                scheduled += 1;
            }
        }
        debug!(scheduled, "Started preloading images");
        scheduled
    }

    /// Uniformly random available id.
    #[must_use]
    pub fn get_random(&self) -> Option<ImageId> {
        self.state.available.read().choose_random()
    }

    /// Returns true if the last scan found `id`.
    #[must_use]
    pub fn has(&self, id: &ImageId) -> bool {
        self.state.available.read().contains(id)
    }

    /// Returns true if `id` is in the pixel cache.
    #[must_use]
    pub fn is_loaded(&self, id: &ImageId) -> bool {
        self.state.cache.contains(id)
    }

    /// Returns true if a background load of `id` is outstanding.
    #[must_use]
    pub fn is_loading(&self, id: &ImageId) -> bool {
        self.state.in_flight.lock().contains(id)
    }

    /// Where `id` currently stands.
    #[must_use]
    pub fn status(&self, id: &ImageId) -> ImageStatus {
        if self.is_loaded(id) {
            ImageStatus::Cached
        } else if self.is_loading(id) {
            ImageStatus::Loading
        } else {
            ImageStatus::Absent
        }
    }

    /// Number of available images.
    #[must_use]
    pub fn count(&self) -> usize {
        self.state.available.read().len()
    }

    /// Copy of the available set.
    #[must_use]
    pub fn all_ids(&self) -> AvailableSet {
        self.state.available.read().clone()
    }

    /// Root the last `initialize` call scanned.
    #[must_use]
    pub fn root(&self) -> ImageRoot {
        self.state.root.read().clone()
    }

    /// Number of outstanding background loads.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.state.in_flight.lock().len()
    }

    /// Recently accessed ids, most recent first.
    #[must_use]
    pub fn access_history(&self) -> Vec<ImageId> {
        self.state.tracker.snapshot()
    }

    /// Fixed image returned while real pixels are unavailable.
    #[must_use]
    pub fn placeholder(&self) -> Arc<DynamicImage> {
        self.state.placeholder.clone()
    }

    /// Changes the cache ceiling, evicting immediately if needed.
    pub fn set_cache_limit(&self, mb: u64) {
        self.state.cache.set_max_cost(mb.saturating_mul(KB_PER_MB));
        info!(limit_mb = mb, "Cache limit changed");
    }

    /// Toggles neighbour prefetch and sets the `preload_many` cap.
    pub fn set_preload_strategy(&self, enabled: bool, max_count: usize) {
        self.state.preload_enabled.store(enabled, Ordering::Relaxed);
        self.state.max_preload_count.store(max_count, Ordering::Relaxed);
        debug!(enabled, max_count, "Preload strategy changed");
    }

    /// Changes the period of the cache pressure check.
    pub fn set_cleanup_interval(&self, interval: Duration) {
        if self
            .interval_tx
            .send(interval.max(MIN_CLEANUP_INTERVAL))
            .is_err()
        {
            debug!("Event loop stopped, cleanup interval not applied");
        }
    }

    /// Drops every cached image.
    pub fn clear_cache(&self) {
        self.state.cache.clear();
        info!("Image cache cleared");
    }

    /// Current cache usage in KB.
    #[must_use]
    pub fn cache_usage(&self) -> u64 {
        self.state.cache.total_cost()
    }

    /// Runs the cache pressure check now. Returns the number of evictions.
    pub fn run_cleanup(&self) -> usize {
        self.state.run_cleanup()
    }

    /// Pixel cache counters and usage.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.state.cache.stats()
    }

    /// Background load counters.
    #[must_use]
    pub fn stats(&self) -> ManagerStats {
        ManagerStats {
            loads_scheduled: self.state.loads_scheduled.load(Ordering::Relaxed),
            loads_completed: self.state.loads_completed.load(Ordering::Relaxed),
            loads_failed: self.state.loads_failed.load(Ordering::Relaxed),
            in_flight: self.pending_count(),
        }
    }

    /// Stops the owning task: no more completions are applied, pending
    /// prefetches are dropped and the cleanup timer stops. Cached images
    /// stay readable.
    pub fn shutdown(&self) {
        if let Some(handle) = self.event_loop.lock().take() {
            handle.abort();
            debug!("Image manager shut down");
        }
    }
}

impl Drop for ImageManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn placeholder_image() -> DynamicImage {
    let gray = Rgba([PLACEHOLDER_GRAY, PLACEHOLDER_GRAY, PLACEHOLDER_GRAY, u8::MAX]);
    DynamicImage::ImageRgba8(RgbaImage::from_pixel(
        PLACEHOLDER_SIZE,
        PLACEHOLDER_SIZE,
        gray,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::mock::MockImageDecoder;
    use crate::infrastructure::image::FileImageDecoder;
    use std::path::Path;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn manager_with(
        config: ManagerConfig,
        decoder: Arc<dyn ImageDecoder>,
    ) -> (ImageManager, mpsc::UnboundedReceiver<ImageEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = ImageManager::new(config, decoder, &tx, Handle::current());
        (manager, rx)
    }

    fn mock_root() -> ImageRoot {
        ImageRoot::Directory("/avatars".into())
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<ImageEvent>) -> ImageEvent {
        tokio::time::timeout(TIMEOUT, rx.recv())
            .await
            .expect("timed out waiting for image event")
            .expect("event channel closed")
    }

    fn write_images(dir: &Path, names: &[String]) -> Result<(), Box<dyn std::error::Error>> {
        for name in names {
            DynamicImage::new_rgb8(32, 32).save(dir.join(name))?;
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_initialize_scans_sorted() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::TempDir::new()?;
        write_images(dir.path(), &["c.jpg".into(), "a.png".into(), "b.png".into()])?;
        let (manager, mut rx) = manager_with(
            ManagerConfig::default(),
            Arc::new(FileImageDecoder::new()),
        );

        let count = manager.initialize(ImageRoot::Directory(dir.path().to_path_buf()));

        assert_eq!(count, 3);
        assert_eq!(manager.count(), 3);
        let ids: Vec<String> = manager.all_ids().iter().map(ToString::to_string).collect();
        assert_eq!(ids, vec!["a.png", "b.png", "c.jpg"]);
        assert!(manager.has(&ImageId::new("b.png")));
        assert!(!manager.has(&ImageId::new("d.png")));
        assert!(manager.get_random().is_some_and(|id| manager.has(&id)));
        assert!(matches!(
            next_event(&mut rx).await,
            ImageEvent::Initialized { count: 3 }
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_initialize_empty_root_reports_zero() {
        let (manager, mut rx) =
            manager_with(ManagerConfig::default(), Arc::new(MockImageDecoder::new()));

        assert_eq!(manager.initialize(mock_root()), 0);
        assert!(manager.get_random().is_none());
        assert!(matches!(
            next_event(&mut rx).await,
            ImageEvent::Initialized { count: 0 }
        ));
    }

    #[tokio::test]
    async fn test_get_decodes_synchronously_and_caches() {
        let decoder = Arc::new(MockImageDecoder::new().with_image("/avatars/a.png", 64, 64));
        let (manager, _rx) = manager_with(ManagerConfig::default(), decoder.clone());
        manager.initialize(mock_root());
        let id = ImageId::new("a.png");

        let first = manager.get(&id);
        let second = manager.get(&id);

        assert_eq!(first.width(), 64);
        assert!(Arc::ptr_eq(&first, &second));
        assert!(manager.is_loaded(&id));
        assert_eq!(manager.status(&id), ImageStatus::Cached);
        assert_eq!(manager.cache_usage(), 16);
        assert_eq!(decoder.decode_calls_for(Path::new("/avatars/a.png")), 1);
        assert_eq!(manager.stats().loads_scheduled, 0);
        assert_eq!(manager.access_history(), vec![id]);
    }

    #[tokio::test]
    async fn test_missing_image_returns_placeholder_and_schedules_once() {
        let (manager, mut rx) =
            manager_with(ManagerConfig::default(), Arc::new(MockImageDecoder::new()));
        manager.initialize(mock_root());
        let _ = next_event(&mut rx).await;
        let id = ImageId::new("missing.png");

        let image = manager.get(&id);

        assert!(Arc::ptr_eq(&image, &manager.placeholder()));
        assert_eq!((image.width(), image.height()), (PLACEHOLDER_SIZE, PLACEHOLDER_SIZE));
        assert_eq!(
            image.to_rgba8().get_pixel(0, 0),
            &Rgba([PLACEHOLDER_GRAY, PLACEHOLDER_GRAY, PLACEHOLDER_GRAY, u8::MAX])
        );
        assert_eq!(manager.stats().loads_scheduled, 1);
        assert_eq!(manager.status(&id), ImageStatus::Loading);

        match next_event(&mut rx).await {
            ImageEvent::LoadFailed { id: failed } => assert_eq!(failed, id),
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(manager.pending_count(), 0);
        assert_eq!(manager.stats().loads_failed, 1);
        assert!(!manager.is_loaded(&id));
    }

    #[tokio::test]
    async fn test_concurrent_gets_schedule_single_load() {
        let (manager, _rx) =
            manager_with(ManagerConfig::default(), Arc::new(MockImageDecoder::new()));
        manager.initialize(mock_root());
        let id = ImageId::new("missing.png");

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..10 {
                        let _ = manager.get(&id);
                    }
                });
            }
        });

        assert_eq!(manager.stats().loads_scheduled, 1);
        assert!(manager.is_loading(&id));
    }

    #[tokio::test]
    async fn test_background_load_fills_cache() {
        let decoder = Arc::new(
            MockImageDecoder::new()
                .with_image("/avatars/late.png", 20, 20)
                .failing_first(1),
        );
        let (manager, mut rx) = manager_with(ManagerConfig::default(), decoder);
        manager.initialize(mock_root());
        let _ = next_event(&mut rx).await;
        let id = ImageId::new("late.png");

        let first = manager.get(&id);
        assert!(Arc::ptr_eq(&first, &manager.placeholder()));

        match next_event(&mut rx).await {
            ImageEvent::Loaded { id: loaded, image } => {
                assert_eq!(loaded, id);
                assert_eq!(image.width(), 20);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(manager.is_loaded(&id));
        assert_eq!(manager.pending_count(), 0);
        assert_eq!(manager.get(&id).width(), 20);
        assert_eq!(manager.stats().loads_completed, 1);
    }

    #[tokio::test]
    async fn test_access_triggers_neighbour_prefetch() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::TempDir::new()?;
        let names: Vec<String> = (0..10).map(|i| format!("{i:02}.png")).collect();
        write_images(dir.path(), &names)?;
        let config = ManagerConfig {
            prefetch_delay_ms: 10,
            ..ManagerConfig::default()
        };
        let (manager, mut rx) = manager_with(config, Arc::new(FileImageDecoder::new()));
        manager.initialize(ImageRoot::Directory(dir.path().to_path_buf()));
        let _ = next_event(&mut rx).await;

        let _ = manager.get(&ImageId::new("00.png"));
        let _ = manager.get(&ImageId::new("05.png"));

        let mut loaded = Vec::new();
        while loaded.len() < 6 {
            if let ImageEvent::Loaded { id, .. } = next_event(&mut rx).await {
                loaded.push(id.to_string());
            }
        }
        loaded.sort();

        assert_eq!(
            loaded,
            vec!["02.png", "03.png", "04.png", "06.png", "07.png", "08.png"]
        );
        assert_eq!(manager.stats().loads_scheduled, 6);
        assert!(!manager.is_loaded(&ImageId::new("09.png")));
        Ok(())
    }

    #[tokio::test]
    async fn test_prefetch_disabled() {
        let decoder = Arc::new(
            MockImageDecoder::new()
                .with_image("/avatars/a.png", 8, 8)
                .with_image("/avatars/b.png", 8, 8)
                .with_image("/avatars/c.png", 8, 8),
        );
        let config = ManagerConfig {
            preload_enabled: false,
            prefetch_delay_ms: 1,
            ..ManagerConfig::default()
        };
        let (manager, _rx) = manager_with(config, decoder);
        manager.initialize(mock_root());

        let _ = manager.get(&ImageId::new("a.png"));
        let _ = manager.get(&ImageId::new("b.png"));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(manager.stats().loads_scheduled, 0);
        assert!(!manager.is_loaded(&ImageId::new("c.png")));
    }

    #[tokio::test]
    async fn test_preload_many_respects_cap() {
        let (manager, _rx) =
            manager_with(ManagerConfig::default(), Arc::new(MockImageDecoder::new()));
        manager.set_preload_strategy(true, 3);
        let ids: Vec<ImageId> = (0..10).map(|i| ImageId::new(format!("{i}.png"))).collect();

        assert_eq!(manager.preload_many(&ids), 3);
        assert_eq!(manager.preload_many(&ids[..3]), 0);
        assert_eq!(manager.stats().loads_scheduled, 3);
    }

    #[tokio::test]
    async fn test_preload_many_uncapped_when_disabled() {
        let (manager, _rx) =
            manager_with(ManagerConfig::default(), Arc::new(MockImageDecoder::new()));
        manager.set_preload_strategy(false, 3);
        let ids: Vec<ImageId> = (0..10).map(|i| ImageId::new(format!("{i}.png"))).collect();

        assert_eq!(manager.preload_many(&ids), 10);
    }

    #[tokio::test]
    async fn test_preload_skips_cached() {
        let decoder = Arc::new(MockImageDecoder::new().with_image("/avatars/a.png", 8, 8));
        let (manager, _rx) = manager_with(ManagerConfig::default(), decoder);
        manager.initialize(mock_root());
        let id = ImageId::new("a.png");
        let _ = manager.get(&id);

        assert!(!manager.preload(&id));
        assert_eq!(manager.stats().loads_scheduled, 0);
    }

    #[tokio::test]
    async fn test_clear_cache_resets_usage() {
        let decoder = Arc::new(MockImageDecoder::new().with_image("/avatars/a.png", 64, 64));
        let (manager, _rx) = manager_with(ManagerConfig::default(), decoder);
        manager.initialize(mock_root());
        let _ = manager.get(&ImageId::new("a.png"));
        assert!(manager.cache_usage() > 0);

        manager.clear_cache();

        assert_eq!(manager.cache_usage(), 0);
        assert!(!manager.is_loaded(&ImageId::new("a.png")));
    }

    #[tokio::test]
    async fn test_cleanup_relieves_pressure() {
        let decoder = MockImageDecoder::new();
        for name in ["a", "b", "c", "d"] {
            decoder.add_image(format!("/avatars/{name}.png"), 256, 256);
        }
        let config = ManagerConfig {
            cache_limit_mb: 1,
            preload_enabled: false,
            ..ManagerConfig::default()
        };
        let (manager, _rx) = manager_with(config, Arc::new(decoder));
        manager.initialize(mock_root());
        for name in ["a", "b", "c", "d"] {
            let _ = manager.get(&ImageId::new(format!("{name}.png")));
        }
        assert_eq!(manager.cache_usage(), 1024);

        assert_eq!(manager.run_cleanup(), 1);
        assert_eq!(manager.cache_usage(), 768);
        assert!(!manager.is_loaded(&ImageId::new("a.png")));
    }

    #[tokio::test]
    async fn test_set_cache_limit_evicts() {
        let decoder = MockImageDecoder::new()
            .with_image("/avatars/a.png", 256, 256)
            .with_image("/avatars/b.png", 256, 256);
        let (manager, _rx) = manager_with(ManagerConfig::default(), Arc::new(decoder));
        manager.initialize(mock_root());
        let _ = manager.get(&ImageId::new("a.png"));
        let _ = manager.get(&ImageId::new("b.png"));
        assert_eq!(manager.cache_usage(), 512);

        manager.set_cache_limit(0);

        assert_eq!(manager.cache_usage(), 0);
    }

    #[tokio::test]
    async fn test_huge_cache_limit_saturates() {
        let decoder = Arc::new(MockImageDecoder::new().with_image("/avatars/a.png", 64, 64));
        let config = ManagerConfig {
            cache_limit_mb: u64::MAX,
            ..ManagerConfig::default()
        };
        let (manager, _rx) = manager_with(config, decoder);
        manager.initialize(mock_root());
        let _ = manager.get(&ImageId::new("a.png"));

        assert_eq!(manager.cache_stats().max_cost, u64::MAX);
        assert_eq!(manager.run_cleanup(), 0);

        manager.set_cache_limit(u64::MAX / 1000);
        assert_eq!(manager.cache_stats().max_cost, u64::MAX);
        assert_eq!(manager.run_cleanup(), 0);
        assert!(manager.is_loaded(&ImageId::new("a.png")));
    }

    #[tokio::test]
    async fn test_unbounded_prefetch_range_loads_whole_set() {
        let decoder = MockImageDecoder::new();
        for name in ["01", "02", "03", "04"] {
            decoder.add_image(format!("/avatars/{name}.png"), 8, 8);
        }
        let config = ManagerConfig {
            prefetch_range: usize::MAX,
            ..ManagerConfig::default()
        };
        let (manager, _rx) = manager_with(config, Arc::new(decoder));
        assert_eq!(manager.initialize(mock_root()), 4);

        assert_eq!(manager.state.smart_preload(&ImageId::new("02.png")), 3);
    }

    #[tokio::test]
    async fn test_periodic_cleanup_runs() {
        let decoder = MockImageDecoder::new();
        for name in ["a", "b", "c", "d"] {
            decoder.add_image(format!("/avatars/{name}.png"), 256, 256);
        }
        let config = ManagerConfig {
            cache_limit_mb: 1,
            preload_enabled: false,
            ..ManagerConfig::default()
        };
        let (manager, _rx) = manager_with(config, Arc::new(decoder));
        manager.initialize(mock_root());
        for name in ["a", "b", "c", "d"] {
            let _ = manager.get(&ImageId::new(format!("{name}.png")));
        }

        manager.set_cleanup_interval(Duration::from_millis(10));
        tokio::time::timeout(TIMEOUT, async {
            while manager.cache_usage() > 768 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("cleanup timer never fired");
    }

    #[tokio::test]
    async fn test_duplicate_completion_is_idempotent() {
        let (manager, mut rx) =
            manager_with(ManagerConfig::default(), Arc::new(MockImageDecoder::new()));
        let id = ImageId::new("a.png");
        let image = Arc::new(DynamicImage::new_rgba8(64, 64));

        for _ in 0..2 {
            manager.state.on_load_finished(LoadCompletion {
                id: id.clone(),
                reason: LoadReason::Prefetch,
                outcome: LoadOutcome::Loaded(image.clone()),
            });
        }

        assert_eq!(manager.cache_stats().size, 1);
        assert_eq!(manager.cache_usage(), 16);
        assert!(matches!(next_event(&mut rx).await, ImageEvent::Loaded { .. }));
        assert!(matches!(next_event(&mut rx).await, ImageEvent::Loaded { .. }));
    }

    #[tokio::test]
    async fn test_shutdown_keeps_cache_readable() {
        let decoder = Arc::new(MockImageDecoder::new().with_image("/avatars/a.png", 8, 8));
        let (manager, _rx) = manager_with(ManagerConfig::default(), decoder);
        manager.initialize(mock_root());
        let id = ImageId::new("a.png");
        let _ = manager.get(&id);

        manager.shutdown();
        manager.shutdown();

        assert_eq!(manager.get(&id).width(), 8);
    }
}
