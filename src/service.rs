use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::info;

use crate::{
    cache::{CacheKey, CacheLimits, PageCache, SweepPriority},
    config::Config,
    coordinator::SubmissionCoordinator,
    correlator::EventCorrelator,
    engine::AnalysisEngine,
    error::EngineError,
    listener::{self, EventTransport, ListenerHandle},
    maintenance::{self, Visibility},
    models::{
        AnalysisJob, AnalysisRequest, CacheStats, ChunkRequest, EngineEvent, FileAnalysisView,
        GlobalAnalysisView, Notification, OverviewRequest, StartAnalysisResponse,
    },
    notify::NotificationFeed,
    state::{CoordinationState, SharedState},
};

/// Process-wide owner of the job registry, the event subscription and the
/// result cache. Construct once at startup and share by `Arc`.
pub struct AnalysisService {
    config: Config,
    engine: Arc<dyn AnalysisEngine>,
    state: SharedState,
    transport: EventTransport,
    correlator: EventCorrelator,
    coordinator: SubmissionCoordinator,
    cache: PageCache,
    visibility: Arc<Visibility>,
    notifications: Arc<NotificationFeed>,
    listener: Mutex<Option<ListenerHandle>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl AnalysisService {
    pub fn new(config: Config, engine: Arc<dyn AnalysisEngine>) -> Self {
        let state = CoordinationState::shared(config.event_buffer_ttl);
        let notifications = Arc::new(NotificationFeed::new(config.notification_capacity));
        let correlator = EventCorrelator::new(state.clone(), engine.clone(), notifications.clone());
        let coordinator =
            SubmissionCoordinator::new(state.clone(), engine.clone(), correlator.clone());
        let cache = PageCache::new(
            CacheLimits {
                chunk: config.chunk_cache_limit,
                overview: config.overview_cache_limit,
                background_divisor: config.background_sweep_divisor,
            },
            config.cache_entry_ttl,
        );

        Self {
            transport: EventTransport::new(config.event_channel_capacity),
            config,
            engine,
            state,
            correlator,
            coordinator,
            cache,
            visibility: Arc::new(Visibility::default()),
            notifications,
            listener: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Attaches the event listener. Safe to call repeatedly; only the first
    /// call subscribes. Returns whether this call attached it.
    pub fn attach_listener(&self) -> bool {
        let Ok(mut slot) = self.listener.lock() else {
            return false;
        };
        if slot.is_some() {
            return false;
        }
        match listener::attach(&self.transport, self.correlator.clone()) {
            Some(handle) => {
                *slot = Some(handle);
                true
            }
            None => false,
        }
    }

    pub fn listener_attached(&self) -> bool {
        self.transport.is_subscribed()
    }

    /// Starts the periodic cache sweep and the buffer reaper.
    pub fn spawn_workers(&self) {
        let sweeper = maintenance::spawn_cache_sweeper(
            self.cache.clone(),
            self.visibility.clone(),
            self.config.cache_sweep_interval,
        );
        let reaper =
            maintenance::spawn_buffer_reaper(self.state.clone(), self.config.event_buffer_ttl);
        if let Ok(mut workers) = self.workers.lock() {
            workers.push(sweeper);
            workers.push(reaper);
        }
    }

    /// Detaches the listener and stops background workers.
    pub fn shutdown(&self) {
        if let Some(handle) = self.listener.lock().ok().and_then(|mut slot| slot.take()) {
            handle.shutdown();
        }
        if let Ok(mut workers) = self.workers.lock() {
            for worker in workers.drain(..) {
                worker.abort();
            }
        }
        info!("Analysis service stopped");
    }

    /// Delivers an engine event onto the transport.
    pub async fn publish_event(&self, event: EngineEvent) -> bool {
        self.transport.publish(event).await
    }

    pub async fn start_analysis(
        &self,
        file_path: &str,
        spec: &AnalysisRequest,
    ) -> StartAnalysisResponse {
        self.coordinator.start(file_path, spec).await
    }

    pub async fn cancel_analysis(&self, analysis_id: &str) -> bool {
        self.coordinator.cancel(analysis_id).await
    }

    pub async fn dismiss(&self, analysis_id: &str) -> Option<AnalysisJob> {
        self.state.write().await.registry.dismiss(analysis_id)
    }

    pub async fn clear_finished(&self) -> usize {
        self.state.write().await.registry.clear_finished()
    }

    pub async fn job(&self, analysis_id: &str) -> Option<AnalysisJob> {
        self.state.read().await.registry.get(analysis_id).cloned()
    }

    pub async fn file_view(&self, file_path: &str) -> FileAnalysisView {
        let state = self.state.read().await;
        let is_submitting = state.is_submitting(file_path);
        match state.registry.job_for_file(file_path) {
            Some(job) => FileAnalysisView::from_job(job, is_submitting),
            None => FileAnalysisView {
                is_submitting,
                ..FileAnalysisView::default()
            },
        }
    }

    pub async fn global_view(&self) -> GlobalAnalysisView {
        let state = self.state.read().await;
        GlobalAnalysisView {
            all_jobs: state.registry.jobs(),
            running_jobs: state.registry.running_jobs(),
            is_running: state.busy(),
            submitting_for_file: state.submitting_for_file().map(ToOwned::to_owned),
        }
    }

    /// Number of events waiting for `analysis_id` to be registered.
    pub async fn buffered_events(&self, analysis_id: &str) -> usize {
        self.state.read().await.buffer.queued(analysis_id)
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.list()
    }

    pub fn cache(&self) -> &PageCache {
        &self.cache
    }

    /// Raw signal window, served from the chunk pool when present.
    pub async fn fetch_chunk(&self, request: &ChunkRequest) -> Result<Value, EngineError> {
        self.cache
            .get_or_fetch(CacheKey::from(request), || self.engine.fetch_chunk(request))
            .await
    }

    /// Downsampled file view, served from the overview pool when present.
    pub async fn fetch_overview(&self, request: &OverviewRequest) -> Result<Value, EngineError> {
        self.cache
            .get_or_fetch(CacheKey::from(request), || self.engine.fetch_overview(request))
            .await
    }

    pub async fn invalidate_file(&self, file_path: &str) -> usize {
        self.cache.invalidate_file(file_path).await
    }

    pub async fn invalidate_all_chunks(&self) -> usize {
        self.cache.invalidate_all_chunks().await
    }

    pub async fn invalidate_all_overviews(&self) -> usize {
        self.cache.invalidate_all_overviews().await
    }

    pub async fn clear_cache(&self) -> usize {
        self.cache.clear_all().await
    }

    pub async fn enforce_memory_limits(&self) -> usize {
        self.cache.enforce_limits(SweepPriority::Normal).await
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    pub async fn set_visibility(&self, hidden: bool) -> usize {
        maintenance::on_visibility_change(&self.cache, &self.visibility, hidden).await
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
