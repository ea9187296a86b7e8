//! Conversion orchestrator implementation.
//!
//! Composes the normalizer, dispatcher, job tracker, and result store into
//! the caller-facing start/cancel/download surface. All shared state is
//! updated through transactional `send_modify` transitions or id-keyed
//! registry writes, so concurrent job completions never lose updates.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::dispatch::{DispatchError, DispatchOutcome, Dispatcher, HttpDispatcher};
use crate::item::{
    normalize, revalidate, ConversionItem, ItemStatus, RawItem, ValidationError,
};
use crate::metrics;
use crate::store::{DownloadArtifact, ResultStore};
use crate::tracker::{
    ArtifactFetcher, HttpArtifactFetcher, Job, JobTracker, RealtimeChannel, TrackerObserver,
    WsChannel,
};

use super::types::{AggregateState, OrchestratorError, OverallStatus};

/// An item plus its per-run status.
#[derive(Debug, Clone)]
pub struct TrackedItem {
    pub item: ConversionItem,
    pub status: ItemStatus,
}

/// The conversion orchestrator - turns the current item set into tracked
/// backend jobs and a downloadable result.
pub struct ConversionOrchestrator {
    config: Config,
    dispatcher: Arc<dyn Dispatcher>,
    channel: Arc<dyn RealtimeChannel>,
    store: Arc<ResultStore>,
    tracker: JobTracker,

    // Runtime state
    items: Arc<RwLock<Vec<TrackedItem>>>,
    credential: RwLock<Option<String>>,
    state_tx: Arc<watch::Sender<AggregateState>>,
    cancel: Mutex<CancellationToken>,
    running: Arc<AtomicBool>,
    channel_opened: AtomicBool,
}

impl ConversionOrchestrator {
    /// Wire the orchestrator with explicit collaborators.
    ///
    /// Tests inject mock implementations of the dispatcher, channel, and
    /// fetcher seams here.
    pub fn new(
        config: Config,
        dispatcher: Arc<dyn Dispatcher>,
        channel: Arc<dyn RealtimeChannel>,
        fetcher: Arc<dyn ArtifactFetcher>,
        store: Arc<ResultStore>,
    ) -> Self {
        let tracker = JobTracker::new(Arc::clone(&channel), Arc::clone(&store), fetcher);
        let (state_tx, _) = watch::channel(AggregateState::default());
        let credential = config.api.credential.clone();

        Self {
            config,
            dispatcher,
            channel,
            store,
            tracker,
            items: Arc::new(RwLock::new(Vec::new())),
            credential: RwLock::new(credential),
            state_tx: Arc::new(state_tx),
            cancel: Mutex::new(CancellationToken::new()),
            running: Arc::new(AtomicBool::new(false)),
            channel_opened: AtomicBool::new(false),
        }
    }

    /// Production wiring over HTTP and WebSocket.
    pub fn from_config(config: Config) -> Self {
        let dispatcher = Arc::new(HttpDispatcher::new(&config));
        let channel = Arc::new(WsChannel::new(config.realtime.clone()));
        let fetcher = Arc::new(HttpArtifactFetcher::new(&config));
        let store = Arc::new(ResultStore::new());
        Self::new(config, dispatcher, channel, fetcher, store)
    }

    /// Read-only subscription to the aggregate state.
    pub fn state(&self) -> watch::Receiver<AggregateState> {
        self.state_tx.subscribe()
    }

    /// Snapshot of the current aggregate state.
    pub fn current_state(&self) -> AggregateState {
        self.state_tx.borrow().clone()
    }

    /// Supply or replace the caller's credential.
    ///
    /// Held in memory for the session only; never persisted.
    pub async fn set_credential(&self, credential: Option<String>) {
        *self.credential.write().await = credential;
    }

    /// Snapshot of the current item set with statuses.
    pub async fn items(&self) -> Vec<TrackedItem> {
        self.items.read().await.clone()
    }

    /// Validate and add an item to the set.
    ///
    /// A URL already present (compared canonically) is a silent no-op
    /// returning the existing item's id.
    pub async fn add_item(&self, raw: RawItem) -> Result<String, ValidationError> {
        let credential = self.credential.read().await.clone();
        let item = normalize(&raw, &self.config.limits, credential.as_deref())?;

        let mut items = self.items.write().await;
        if let Some(url) = item.source_url() {
            if let Some(existing) = items.iter().find(|t| t.item.source_url() == Some(url)) {
                debug!(url = %url, "Duplicate URL ignored");
                return Ok(existing.item.id.clone());
            }
        }

        info!(item = %item.name, kind = %item.kind, "Item added");
        let id = item.id.clone();
        items.push(TrackedItem {
            item,
            status: ItemStatus::Pending,
        });
        Ok(id)
    }

    /// Remove an item by id; returns whether anything was removed.
    pub async fn remove_item(&self, item_id: &str) -> bool {
        let mut items = self.items.write().await;
        let before = items.len();
        items.retain(|t| t.item.id != item_id);
        items.len() != before
    }

    /// Drop every item.
    pub async fn clear_items(&self) {
        self.items.write().await.clear();
    }

    /// Start converting the current item set.
    ///
    /// Fails fast with `NoItems` on an empty set and with the first
    /// validation error before anything is dispatched. Once dispatch
    /// succeeds the aggregate status is `Processing`, independent of
    /// individual job completion.
    pub async fn start_conversion(&self) -> Result<(), OrchestratorError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(OrchestratorError::AlreadyRunning);
        }

        match self.start_inner().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    async fn start_inner(&self) -> Result<(), OrchestratorError> {
        let snapshot: Vec<ConversionItem> = self
            .items
            .read()
            .await
            .iter()
            .map(|t| t.item.clone())
            .collect();

        if snapshot.is_empty() {
            self.fail_run("no items to convert");
            return Err(ValidationError::NoItems.into());
        }

        info!(items = snapshot.len(), "Starting conversion");
        metrics::CONVERSIONS_STARTED.inc();

        // Fresh run: clear the previous result, job registry, and abort
        // signal before anything goes out.
        self.store.clear();
        self.tracker.reset().await;
        let cancel = {
            let mut guard = self.cancel.lock().await;
            *guard = CancellationToken::new();
            guard.clone()
        };
        self.state_tx.send_modify(|s| {
            *s = AggregateState {
                status: OverallStatus::Converting,
                ..AggregateState::default()
            };
        });

        let credential = self.credential.read().await.clone();

        // The first validation failure aborts the whole run before any
        // dispatch.
        for item in &snapshot {
            if let Err(e) = revalidate(item, &self.config.limits, credential.as_deref()) {
                warn!(item = %item.name, error = %e, "Validation failed, aborting run");
                self.fail_run(&e.to_string());
                return Err(e.into());
            }
        }

        {
            let mut items = self.items.write().await;
            for tracked in items.iter_mut() {
                tracked.status = ItemStatus::Pending;
            }
        }

        if !self.channel_opened.swap(true, Ordering::SeqCst) {
            if let Err(e) = self.channel.open().await {
                self.channel_opened.store(false, Ordering::SeqCst);
                self.fail_run(&e.to_string());
                return Err(e.into());
            }
        }

        let outcomes = match self
            .dispatcher
            .dispatch(&snapshot, credential.as_deref(), &cancel)
            .await
        {
            Ok(outcomes) => outcomes,
            Err(DispatchError::Cancelled) => {
                // cancel_conversion already settled the state
                debug!("Dispatch aborted by cancellation");
                return Ok(());
            }
            Err(e) => {
                warn!(error = %e, "Dispatch failed");
                self.fail_run(&e.to_string());
                return Err(e.into());
            }
        };

        let mut accepted = Vec::new();
        let mut rejected: Vec<(String, String)> = Vec::new();
        for outcome in outcomes {
            match outcome {
                DispatchOutcome::Accepted(job) => accepted.push(job),
                DispatchOutcome::Rejected { item_id, error } => {
                    rejected.push((item_id, error.to_string()))
                }
            }
        }

        let accepted_items: u64 = accepted.iter().map(|j| j.item_ids.len() as u64).sum();
        metrics::ITEMS_DISPATCHED
            .with_label_values(&["accepted"])
            .inc_by(accepted_items);
        metrics::ITEMS_DISPATCHED
            .with_label_values(&["rejected"])
            .inc_by(rejected.len() as u64);

        // Per-item rejections are isolated; the rest of the batch continues.
        {
            let mut items = self.items.write().await;
            for (item_id, reason) in &rejected {
                warn!(item = %item_id, reason = %reason, "Item rejected at dispatch");
                if let Some(t) = items.iter_mut().find(|t| &t.item.id == item_id) {
                    t.status = ItemStatus::Error;
                }
            }
            for job in &accepted {
                for id in &job.item_ids {
                    if let Some(t) = items.iter_mut().find(|t| &t.item.id == id) {
                        t.status = ItemStatus::Converting;
                    }
                }
            }
        }

        if accepted.is_empty() {
            self.state_tx.send_modify(|s| {
                s.status = OverallStatus::Error;
                s.error = Some("no items were accepted for conversion".to_string());
                s.error_count = rejected.len();
            });
            metrics::CONVERSIONS_FINISHED
                .with_label_values(&["error"])
                .inc();
            self.running.store(false, Ordering::SeqCst);
            return Ok(());
        }

        self.state_tx.send_modify(|s| {
            s.status = OverallStatus::Processing;
            s.error_count = rejected.len();
            s.total_jobs = accepted.len();
        });

        let observer: Arc<dyn TrackerObserver> = Arc::new(StateObserver {
            state_tx: Arc::clone(&self.state_tx),
            items: Arc::clone(&self.items),
            running: Arc::clone(&self.running),
        });
        self.tracker
            .track(accepted, &snapshot, credential, cancel, observer)
            .await;

        Ok(())
    }

    /// Cancel the in-flight conversion.
    ///
    /// Aborts outstanding HTTP requests through the shared token, lets
    /// every job task unsubscribe, and marks non-terminal items cancelled.
    /// Best-effort: jobs already finished server-side are not rolled back.
    pub async fn cancel_conversion(&self) {
        info!("Cancelling conversion");
        self.cancel.lock().await.cancel();

        {
            let mut items = self.items.write().await;
            for tracked in items.iter_mut() {
                if !tracked.status.is_terminal() {
                    tracked.status = ItemStatus::Cancelled;
                }
            }
        }

        self.state_tx.send_modify(|s| {
            if matches!(s.status, OverallStatus::Converting | OverallStatus::Processing) {
                s.status = OverallStatus::Cancelled;
            }
        });

        if self.running.swap(false, Ordering::SeqCst) {
            metrics::CONVERSIONS_FINISHED
                .with_label_values(&["cancelled"])
                .inc();
        }
    }

    /// Take the stored result and hand it to the caller's save mechanism.
    ///
    /// The store is cleared; a second call without a new conversion fails
    /// with `NoResult`.
    pub fn trigger_download(&self) -> Result<DownloadArtifact, OrchestratorError> {
        let result = self.store.take().ok_or(OrchestratorError::NoResult)?;
        let filename = result.suggested_filename();
        info!(filename = %filename, bytes = result.payload.len(), "Download triggered");

        Ok(DownloadArtifact {
            filename,
            content_kind: result.content_kind,
            payload: result.payload,
        })
    }

    /// Close the realtime channel and cancel any in-flight work.
    pub async fn shutdown(&self) {
        self.cancel.lock().await.cancel();
        self.channel.close().await;
        self.running.store(false, Ordering::SeqCst);
    }

    /// Mark the run failed before it could begin.
    fn fail_run(&self, message: &str) {
        self.state_tx.send_modify(|s| {
            s.status = OverallStatus::Error;
            s.error = Some(message.to_string());
        });
        metrics::CONVERSIONS_FINISHED
            .with_label_values(&["error"])
            .inc();
    }
}

/// Tracker observer that projects job events onto the aggregate state and
/// the item registry.
struct StateObserver {
    state_tx: Arc<watch::Sender<AggregateState>>,
    items: Arc<RwLock<Vec<TrackedItem>>>,
    running: Arc<AtomicBool>,
}

#[async_trait]
impl TrackerObserver for StateObserver {
    async fn on_update(&self, _job: &Job, aggregate_percent: f32) {
        self.state_tx.send_modify(|s| {
            // Monotonic while the run is live; a cancelled run stays put.
            if matches!(s.status, OverallStatus::Converting | OverallStatus::Processing)
                && aggregate_percent > s.progress_percent
            {
                s.progress_percent = aggregate_percent;
            }
        });
    }

    async fn on_terminal(&self, job: &Job, error: Option<String>) {
        let failed = error.is_some();

        {
            let mut items = self.items.write().await;
            for tracked in items.iter_mut() {
                if job.item_ids.contains(&tracked.item.id) && !tracked.status.is_terminal() {
                    tracked.status = if failed {
                        ItemStatus::Error
                    } else {
                        ItemStatus::Completed
                    };
                }
            }
        }

        metrics::JOBS_FINISHED
            .with_label_values(&[if failed { "error" } else { "completed" }])
            .inc();

        let mut completed_now = false;
        self.state_tx.send_modify(|s| {
            if failed {
                s.error_count += 1;
            } else {
                s.completed_count += 1;
            }
            if matches!(s.status, OverallStatus::Converting | OverallStatus::Processing)
                && s.all_jobs_finished()
            {
                s.status = OverallStatus::Completed;
                completed_now = true;
            }
        });

        if completed_now {
            info!("Conversion run completed");
            self.running.store(false, Ordering::SeqCst);
            metrics::CONVERSIONS_FINISHED
                .with_label_values(&["completed"])
                .inc();
        }
    }
}
