//! The data manager: single entry point for loading the current booking.
//!
//! A `get` consults the request coordinator, then the cache tiers in the
//! order the strategy dictates, then the data source (with retries and a
//! per-attempt timeout). Fresh data is validated, checked against its own
//! expiry, written through to the tiers and published to subscribers.
//! `refresh` skips the tier read.
//!
//! The coordinated work settles the published state itself, so a caller
//! that stops waiting never leaves the manager stuck in `Loading`.
//!
//! `DataManager` is a cheap handle; clones share one manager. Dropping the
//! last handle tears the manager down just like `destroy`.

mod background;
mod state;

pub use state::{DataState, HealthReport, ResourceReport};

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::{
    read_plan, write_plan, CacheKey, CacheMetrics, CacheStatistics, CacheStore, CacheStrategy,
    MemoryInfo, MemoryInfoProvider, PersistentLayer, SystemMemory, Tier, WritePlan,
};
use crate::clock::{system_clock, Clock};
use crate::config::ManagerConfig;
use crate::coordinator::RequestCoordinator;
use crate::error::DataError;
use crate::models::{Booking, SizeOf};
use crate::retry::retry;
use crate::source::{DataSource, Fetched};

const CACHE_NAMESPACE: &str = "booking";
const CURRENT_KEY: &str = "current";

/// Coordinator keys. `get` and `refresh` dedup separately.
const GET_REQUEST: &str = "booking:get";
const REFRESH_REQUEST: &str = "booking:refresh";

const SUBSCRIBER_CAPACITY: usize = 16;

/// Health check threshold for both host and cache memory.
const MEMORY_PRESSURE_RATIO: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchMode {
    /// Tiers first, source on miss.
    Cached,
    /// Source only.
    Fresh,
}

impl FetchMode {
    fn request_key(self) -> &'static str {
        match self {
            FetchMode::Cached => GET_REQUEST,
            FetchMode::Fresh => REFRESH_REQUEST,
        }
    }
}

struct Status {
    state: DataState,
    current: Option<Arc<Booking>>,
    last_updated: Option<DateTime<Utc>>,
}

/// Everything the fetch path needs. Cloned into each coordinated request so
/// the in-flight future never holds the manager itself.
#[derive(Clone)]
struct Worker {
    config: Arc<ManagerConfig>,
    source: Arc<dyn DataSource>,
    clock: Arc<dyn Clock>,
    memory_info: Arc<dyn MemoryInfoProvider>,
    store: Arc<CacheStore<Arc<Booking>>>,
    disk: Option<Arc<PersistentLayer<Booking>>>,
    status: Arc<RwLock<Status>>,
    publisher: broadcast::Sender<Arc<Booking>>,
    cache_key: CacheKey,
}

struct Inner {
    worker: Worker,
    coordinator: RequestCoordinator<Arc<Booking>>,
    destroyed: AtomicBool,
    background: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct DataManager {
    inner: Arc<Inner>,
}

pub struct DataManagerBuilder {
    source: Arc<dyn DataSource>,
    config: ManagerConfig,
    clock: Arc<dyn Clock>,
    memory_info: Arc<dyn MemoryInfoProvider>,
    disk_path: Option<PathBuf>,
}

impl DataManagerBuilder {
    pub fn config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn memory_info(mut self, provider: Arc<dyn MemoryInfoProvider>) -> Self {
        self.memory_info = provider;
        self
    }

    /// File backing the disk tier. Required unless the strategy never touches disk.
    pub fn disk_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.disk_path = Some(path.into());
        self
    }

    /// Starts background refresh right away if the config enables it, which
    /// needs a running tokio runtime.
    pub fn build(self) -> Result<DataManager, DataError> {
        let uses_disk = matches!(
            self.config.strategy,
            CacheStrategy::DiskOnly | CacheStrategy::Hybrid | CacheStrategy::Smart
        );
        let disk = match (self.disk_path, uses_disk) {
            (Some(path), true) => Some(Arc::new(PersistentLayer::new(
                path,
                self.config.disk_validity_secs,
                Arc::clone(&self.clock),
            )?)),
            (None, true) => {
                return Err(DataError::Configuration(format!(
                    "strategy {:?} needs a disk cache path",
                    self.config.strategy
                )))
            }
            (_, false) => None,
        };

        let (publisher, _) = broadcast::channel(SUBSCRIBER_CAPACITY);
        let background_refresh = self.config.background_refresh;
        let worker = Worker {
            store: Arc::new(CacheStore::new(self.config.cache.clone(), Arc::clone(&self.clock))),
            cache_key: CacheKey::new(CACHE_NAMESPACE, CURRENT_KEY)?,
            config: Arc::new(self.config),
            source: self.source,
            clock: self.clock,
            memory_info: self.memory_info,
            disk,
            status: Arc::new(RwLock::new(Status {
                state: DataState::Loading,
                current: None,
                last_updated: None,
            })),
            publisher,
        };
        info!(
            source = %worker.source.describe(),
            strategy = ?worker.config.strategy,
            "Data manager created"
        );

        let manager = DataManager {
            inner: Arc::new(Inner {
                worker,
                coordinator: RequestCoordinator::new(),
                destroyed: AtomicBool::new(false),
                background: Mutex::new(None),
            }),
        };
        if background_refresh {
            manager.start_background_refresh();
        }
        Ok(manager)
    }
}

impl DataManager {
    pub fn builder(source: Arc<dyn DataSource>) -> DataManagerBuilder {
        DataManagerBuilder {
            source,
            config: ManagerConfig::default(),
            clock: system_clock(),
            memory_info: Arc::new(SystemMemory),
            disk_path: None,
        }
    }

    /// The current booking, from cache when a tier holds a valid copy.
    pub async fn get(&self) -> Result<Arc<Booking>, DataError> {
        self.load(FetchMode::Cached).await
    }

    /// The current booking straight from the source, with the larger retry budget.
    pub async fn refresh(&self) -> Result<Arc<Booking>, DataError> {
        self.load(FetchMode::Fresh).await
    }

    async fn load(&self, mode: FetchMode) -> Result<Arc<Booking>, DataError> {
        let worker = &self.inner.worker;
        if self.is_destroyed() {
            worker.set_state(DataState::Error(DataError::ManagerDestroyed.to_string()));
            return Err(DataError::ManagerDestroyed);
        }

        worker.set_state(DataState::Loading);
        let job = worker.clone();
        let result = self
            .inner
            .coordinator
            .run(mode.request_key(), move || job.execute(mode))
            .await;

        // Work that ran to completion already settled the state
        if let Err(e @ (DataError::ManagerDestroyed | DataError::Internal(_))) = &result {
            worker.set_state(DataState::Error(e.to_string()));
        }
        result
    }

    /// Snapshot of the public state.
    pub fn status(&self) -> DataState {
        self.inner.worker.status.read().state.clone()
    }

    /// The last booking successfully loaded, if any.
    pub fn current(&self) -> Option<Arc<Booking>> {
        self.inner.worker.status.read().current.clone()
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.inner.worker.status.read().last_updated
    }

    /// Receive every booking published from here on. No replay.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Booking>> {
        self.inner.worker.publisher.subscribe()
    }

    /// Best-effort `get`; failures are logged, not returned.
    pub async fn warmup_cache(&self) {
        match self.get().await {
            Ok(booking) => debug!(reference = %booking.reference, "Cache warmed"),
            Err(e) => warn!(error = %e, "Cache warmup failed"),
        }
    }

    pub fn start_background_refresh(&self) {
        if self.is_destroyed() {
            warn!("Not starting background refresh on a destroyed data manager");
            return;
        }
        let mut slot = self.inner.background.lock();
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        if tokio::runtime::Handle::try_current().is_err() {
            warn!("No tokio runtime, background refresh not started");
            return;
        }

        let interval = self.inner.worker.config.refresh_interval();
        info!(interval_secs = interval.as_secs(), "Starting background refresh");
        *slot = Some(background::spawn(Arc::downgrade(&self.inner), interval));
    }

    pub fn stop_background_refresh(&self) {
        self.inner.stop_background_refresh();
    }

    pub fn is_background_refresh_running(&self) -> bool {
        self.inner.is_background_refresh_running()
    }

    pub fn health_check(&self) -> HealthReport {
        let worker = &self.inner.worker;
        let mut issues = Vec::new();

        if self.is_destroyed() {
            issues.push("Data manager has been destroyed".to_string());
        }

        let memory = worker.memory_info.memory_info_or_default();
        if memory.used_ratio() > MEMORY_PRESSURE_RATIO {
            issues.push(format!(
                "System memory usage is {:.0}%",
                memory.used_ratio() * 100.0
            ));
        }

        let cache_ratio = worker.store.memory_usage_ratio();
        if cache_ratio > MEMORY_PRESSURE_RATIO {
            issues.push(format!("Cache memory usage is {:.0}%", cache_ratio * 100.0));
        }

        let waiters = self.inner.coordinator.waiter_count();
        if waiters > worker.config.max_waiters {
            issues.push(format!(
                "{} callers waiting on in-flight requests (limit {})",
                waiters, worker.config.max_waiters
            ));
        }

        if worker.config.background_refresh
            && !self.is_destroyed()
            && !self.is_background_refresh_running()
        {
            issues.push("Background refresh is enabled but not running".to_string());
        }

        HealthReport::from_issues(issues)
    }

    pub fn resource_usage(&self) -> ResourceReport {
        let worker = &self.inner.worker;
        ResourceReport {
            memory: worker.memory_info.memory_info_or_default(),
            cache: worker.store.statistics(),
            in_flight_requests: self.inner.coordinator.in_flight_count(),
            pending_waiters: self.inner.coordinator.waiter_count(),
            background_refresh_running: self.is_background_refresh_running(),
            disk_cache_valid: worker.disk.as_ref().is_some_and(|disk| disk.is_valid()),
        }
    }

    pub fn cache_statistics(&self) -> CacheStatistics {
        self.inner.worker.store.statistics()
    }

    pub fn cache_metrics(&self, top_n: usize) -> CacheMetrics {
        self.inner.worker.store.metrics(top_n)
    }

    /// Empty both tiers. A disk failure is logged and otherwise ignored.
    pub fn clear_cache(&self) {
        let worker = &self.inner.worker;
        worker.store.clear();
        if let Some(disk) = &worker.disk {
            if let Err(e) = disk.clear() {
                warn!(error = %e, "Failed to clear disk cache");
            }
        }
        info!("Cache cleared");
    }

    /// Callers currently suspended on an in-flight request, leaders included.
    pub fn pending_waiters(&self) -> usize {
        self.inner.coordinator.waiter_count()
    }

    /// Stop background work, fail every pending caller with
    /// `ManagerDestroyed`, and refuse further fetches. Idempotent.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Destroying data manager");
        self.inner.teardown();
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.is_destroyed()
    }
}

impl Inner {
    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn stop_background_refresh(&self) {
        if let Some(handle) = self.background.lock().take() {
            handle.abort();
            info!("Stopped background refresh");
        }
    }

    fn is_background_refresh_running(&self) -> bool {
        self.background
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn teardown(&self) {
        self.stop_background_refresh();
        self.coordinator.shutdown();
        let config = &self.worker.config;
        if config.strategy == CacheStrategy::MemoryOnly && config.clear_memory_on_destroy {
            self.worker.store.clear();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if !self.destroyed.swap(true, Ordering::SeqCst) {
            debug!("Last data manager handle dropped");
            self.teardown();
        }
    }
}

impl Worker {
    async fn execute(self, mode: FetchMode) -> Result<Arc<Booking>, DataError> {
        self.flag_expired_current();

        if mode == FetchMode::Cached {
            if let Some(booking) = self.read_tiers() {
                self.mark_loaded(Arc::clone(&booking));
                return Ok(booking);
            }
        }

        match self.fetch_and_store(mode).await {
            Ok(booking) => {
                self.mark_loaded(Arc::clone(&booking));
                Ok(booking)
            }
            Err(e) => {
                error!(source = %self.source.describe(), error = %e, "Failed to load booking");
                self.set_state(DataState::Error(e.to_string()));
                Err(e)
            }
        }
    }

    async fn fetch_and_store(&self, mode: FetchMode) -> Result<Arc<Booking>, DataError> {
        let (policy, label) = match mode {
            FetchMode::Cached => (self.config.get_retry_policy(), "fetch booking"),
            FetchMode::Fresh => (self.config.refresh_retry_policy(), "refresh booking"),
        };
        let Fetched {
            booking,
            fetched_at,
        } = retry(policy, label, || self.fetch_once()).await?;

        booking.validate(&self.config.validation)?;

        if booking.is_expired(self.clock.now()) {
            return Err(DataError::Expired {
                reference: booking.reference.clone(),
                expired_at: booking.expiry_time.to_rfc3339(),
            });
        }

        info!(
            reference = %booking.reference,
            segments = booking.segments.len(),
            expiry = %booking.expiry_time,
            "Fetched booking"
        );
        let booking = Arc::new(booking);
        self.write_through(&booking, fetched_at);
        Ok(booking)
    }

    /// One source call bounded by the request timeout.
    async fn fetch_once(&self) -> Result<Fetched, DataError> {
        let timeout = self.config.request_timeout();
        match tokio::time::timeout(timeout, self.source.fetch()).await {
            Ok(result) => result,
            Err(_) => Err(DataError::Timeout(timeout)),
        }
    }

    /// First valid, unexpired booking found in the strategy's read order.
    fn read_tiers(&self) -> Option<Arc<Booking>> {
        let now = self.clock.now();
        for &tier in read_plan(self.config.strategy) {
            let hit = match tier {
                Tier::Memory => self.read_memory(now),
                Tier::Disk => self.read_disk(now),
            };
            if let Some(booking) = hit {
                debug!(%tier, reference = %booking.reference, "Cache hit");
                return Some(booking);
            }
            debug!(%tier, "Cache miss");
        }
        None
    }

    fn read_memory(&self, now: DateTime<Utc>) -> Option<Arc<Booking>> {
        let booking = self.store.get(&self.cache_key)?;
        if booking.is_expired(now) {
            self.store.remove(&self.cache_key);
            return None;
        }
        Some(booking)
    }

    /// A read failure is a miss. A hit is copied into memory when the
    /// strategy would have written it there.
    fn read_disk(&self, now: DateTime<Utc>) -> Option<Arc<Booking>> {
        let disk = self.disk.as_ref()?;
        let cached = match disk.load() {
            Ok(Some(cached)) => cached,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "Disk cache unreadable, treating as miss");
                return None;
            }
        };
        if !cached.is_valid_at(now) {
            debug!(age = %cached.age_display(now), "Disk cache is stale");
            return None;
        }
        if cached.record.is_expired(now) {
            return None;
        }

        let booking = Arc::new(cached.record);
        if self.plan_for(&booking).memory {
            self.store.set(self.cache_key.clone(), Arc::clone(&booking));
        }
        Some(booking)
    }

    fn plan_for(&self, booking: &Booking) -> WritePlan {
        let memory = if self.config.strategy == CacheStrategy::Smart {
            self.memory_info.memory_info_or_default()
        } else {
            MemoryInfo::conservative()
        };
        write_plan(self.config.strategy, booking.size_of() as u64, memory)
    }

    /// Write failures never fail the fetch.
    fn write_through(&self, booking: &Arc<Booking>, fetched_at: DateTime<Utc>) {
        let plan = self.plan_for(booking);
        debug!(memory = plan.memory, disk = plan.disk, "Write plan");

        if plan.memory {
            self.store.set(self.cache_key.clone(), Arc::clone(booking));
        }
        if plan.disk {
            if let Some(disk) = &self.disk {
                if let Err(e) = disk.save(booking.as_ref(), fetched_at) {
                    warn!(error = %e, path = %disk.path().display(), "Failed to write disk cache");
                }
            }
        }
    }

    fn set_state(&self, state: DataState) {
        self.status.write().state = state;
    }

    fn mark_loaded(&self, booking: Arc<Booking>) {
        {
            let mut status = self.status.write();
            status.state = DataState::Loaded;
            status.current = Some(Arc::clone(&booking));
            status.last_updated = Some(self.clock.now());
        }
        // No subscribers is fine
        let _ = self.publisher.send(booking);
    }

    /// Report `Expired` instead of `Loading` while replacing a booking
    /// that has run out. The fetch outcome moves the state on.
    fn flag_expired_current(&self) {
        let now = self.clock.now();
        let mut status = self.status.write();
        let Some(current) = status.current.as_ref() else {
            return;
        };
        if current.is_expired(now) {
            info!(reference = %current.reference, "Loaded booking has expired");
            status.state = DataState::Expired;
        }
    }
}
