//! Job tracker: one task per accepted job.
//!
//! Each task subscribes to its job's event stream, folds events through the
//! pure reducer into the shared registry, re-subscribes once per reconnect
//! epoch, retrieves the artifact on completion, and unsubscribes on any
//! terminal outcome.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::Config;
use crate::dispatch::DispatchedJob;
use crate::item::ConversionItem;
use crate::store::{ContentKind, ConversionResult, ResultStore};

use super::channel::{ConnectionState, RealtimeChannel};
use super::types::{aggregate_progress, apply_event, Job, JobStatus, TrackError};

/// Receives tracking effects; implemented by the orchestrator.
#[async_trait]
pub trait TrackerObserver: Send + Sync {
    /// Called after every applied event, with the job snapshot and the
    /// mean progress across all tracked jobs.
    async fn on_update(&self, job: &Job, aggregate_percent: f32);

    /// Called once per job when it reaches a terminal outcome; `error` is
    /// set for failures (including artifact retrieval failures).
    async fn on_terminal(&self, job: &Job, error: Option<String>);
}

/// Retrieves completed artifacts behind download locators.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    /// Fetch the artifact as a binary blob.
    ///
    /// Returns the payload and the declared content type, if any.
    async fn fetch(
        &self,
        locator: &str,
        credential: Option<&str>,
    ) -> Result<(Bytes, Option<String>), TrackError>;
}

/// HTTP artifact fetcher; relative locators resolve against the API base.
pub struct HttpArtifactFetcher {
    client: Client,
    base_url: String,
}

impl HttpArtifactFetcher {
    /// Create a new fetcher with the given configuration.
    pub fn new(config: &Config) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.api.timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: config.api.base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ArtifactFetcher for HttpArtifactFetcher {
    async fn fetch(
        &self,
        locator: &str,
        credential: Option<&str>,
    ) -> Result<(Bytes, Option<String>), TrackError> {
        let url = if locator.starts_with("http://") || locator.starts_with("https://") {
            locator.to_string()
        } else {
            format!("{}/{}", self.base_url, locator.trim_start_matches('/'))
        };
        debug!(url = %url, "Fetching artifact");

        let mut request = self.client.get(&url);
        if let Some(token) = credential {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TrackError::Fetch(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(TrackError::Fetch(format!("HTTP {}", status)));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let payload = response
            .bytes()
            .await
            .map_err(|e| TrackError::Fetch(e.to_string()))?;

        Ok((payload, content_type))
    }
}

/// Tracks all jobs of the current conversion run.
pub struct JobTracker {
    channel: Arc<dyn RealtimeChannel>,
    store: Arc<ResultStore>,
    fetcher: Arc<dyn ArtifactFetcher>,
    jobs: Arc<RwLock<HashMap<String, Job>>>,
}

/// Everything a per-job task needs, cloned out of the tracker.
struct JobTaskContext {
    channel: Arc<dyn RealtimeChannel>,
    store: Arc<ResultStore>,
    fetcher: Arc<dyn ArtifactFetcher>,
    jobs: Arc<RwLock<HashMap<String, Job>>>,
    items: Arc<HashMap<String, ConversionItem>>,
    credential: Option<String>,
    cancel: CancellationToken,
    observer: Arc<dyn TrackerObserver>,
}

impl JobTracker {
    pub fn new(
        channel: Arc<dyn RealtimeChannel>,
        store: Arc<ResultStore>,
        fetcher: Arc<dyn ArtifactFetcher>,
    ) -> Self {
        Self {
            channel,
            store,
            fetcher,
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Drop all job state for a fresh conversion run.
    pub async fn reset(&self) {
        self.jobs.write().await.clear();
    }

    /// Snapshot of all tracked jobs.
    pub async fn jobs(&self) -> Vec<Job> {
        self.jobs.read().await.values().cloned().collect()
    }

    /// Number of jobs not yet in a terminal status.
    pub async fn active_count(&self) -> usize {
        self.jobs
            .read()
            .await
            .values()
            .filter(|j| !j.status.is_terminal())
            .count()
    }

    /// Register and start tracking the given accepted jobs.
    ///
    /// All state updates are keyed by job/item id; tasks run until their
    /// job is terminal or `cancel` fires.
    pub async fn track(
        &self,
        dispatched: Vec<DispatchedJob>,
        items: &[ConversionItem],
        credential: Option<String>,
        cancel: CancellationToken,
        observer: Arc<dyn TrackerObserver>,
    ) {
        let item_index: Arc<HashMap<String, ConversionItem>> = Arc::new(
            items
                .iter()
                .map(|item| (item.id.clone(), item.clone()))
                .collect(),
        );

        {
            let mut registry = self.jobs.write().await;
            for job in &dispatched {
                registry.insert(job.job_id.clone(), Job::new(job));
            }
        }

        for job in dispatched {
            let ctx = JobTaskContext {
                channel: Arc::clone(&self.channel),
                store: Arc::clone(&self.store),
                fetcher: Arc::clone(&self.fetcher),
                jobs: Arc::clone(&self.jobs),
                items: Arc::clone(&item_index),
                credential: credential.clone(),
                cancel: cancel.clone(),
                observer: Arc::clone(&observer),
            };
            tokio::spawn(run_job(ctx, job.job_id));
        }
    }
}

/// Drive one job from subscription to terminal state.
async fn run_job(ctx: JobTaskContext, job_id: String) {
    let mut sub = match ctx.channel.subscribe(&job_id).await {
        Ok(sub) => sub,
        Err(e) => {
            fail_job(&ctx, &job_id, &format!("subscription failed: {}", e)).await;
            return;
        }
    };

    let mut conn = ctx.channel.connection();
    let mut epoch = conn.borrow().epoch().unwrap_or(0);

    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => {
                debug!(job_id = %job_id, "Job tracking cancelled");
                {
                    let mut registry = ctx.jobs.write().await;
                    if let Some(job) = registry.get_mut(&job_id) {
                        if !job.status.is_terminal() {
                            job.status = JobStatus::Cancelled;
                        }
                    }
                }
                ctx.channel.unsubscribe(&job_id).await;
                return;
            }
            changed = conn.changed() => {
                if changed.is_err() {
                    fail_job(&ctx, &job_id, "realtime channel dropped").await;
                    return;
                }
                match handle_connection_change(&ctx, &job_id, &conn, &mut epoch).await {
                    Ok(Some(new_sub)) => sub = new_sub,
                    Ok(None) => {}
                    Err(reason) => {
                        fail_job(&ctx, &job_id, &reason).await;
                        return;
                    }
                }
            }
            event = sub.recv() => {
                let Some(event) = event else {
                    // Stream ended without a terminal event: the channel
                    // closed or this registration was dropped. Wait for the
                    // connection watch and act on what it says, since the
                    // wait consumes the notification the other branch
                    // would have seen.
                    if matches!(*conn.borrow(), ConnectionState::Closed) {
                        fail_job(&ctx, &job_id, "realtime channel closed").await;
                        return;
                    }
                    if conn.changed().await.is_err() {
                        fail_job(&ctx, &job_id, "realtime channel dropped").await;
                        return;
                    }
                    match handle_connection_change(&ctx, &job_id, &conn, &mut epoch).await {
                        Ok(Some(new_sub)) => sub = new_sub,
                        Ok(None) => {}
                        Err(reason) => {
                            fail_job(&ctx, &job_id, &reason).await;
                            return;
                        }
                    }
                    continue;
                };

                let (snapshot, newly_terminal, aggregate) = {
                    let mut registry = ctx.jobs.write().await;
                    let Some(job) = registry.get_mut(&job_id) else {
                        return;
                    };
                    let was_terminal = job.status.is_terminal();
                    *job = apply_event(job, &event);
                    let snapshot = job.clone();
                    let newly_terminal = !was_terminal && snapshot.status.is_terminal();
                    let aggregate = aggregate_progress(&registry);
                    (snapshot, newly_terminal, aggregate)
                };

                ctx.observer.on_update(&snapshot, aggregate).await;

                if newly_terminal {
                    finish_job(&ctx, snapshot).await;
                    ctx.channel.unsubscribe(&job_id).await;
                    return;
                }
            }
        }
    }
}

/// React to a connection state change.
///
/// On a new epoch the stale registration is dropped and the job
/// re-subscribed, so at most one registration is ever live. Returns the
/// replacement subscription, or an error message when tracking cannot
/// continue.
async fn handle_connection_change(
    ctx: &JobTaskContext,
    job_id: &str,
    conn: &tokio::sync::watch::Receiver<ConnectionState>,
    epoch: &mut u64,
) -> Result<Option<super::channel::JobSubscription>, String> {
    let state = *conn.borrow();
    match state {
        ConnectionState::Closed => Err("realtime channel closed".to_string()),
        ConnectionState::Connected { epoch: current } if current != *epoch => {
            *epoch = current;
            debug!(job_id = %job_id, epoch = current, "Re-subscribing after reconnect");
            ctx.channel.unsubscribe(job_id).await;
            match ctx.channel.subscribe(job_id).await {
                Ok(sub) => Ok(Some(sub)),
                Err(e) => Err(format!("re-subscription failed: {}", e)),
            }
        }
        _ => Ok(None),
    }
}

/// Handle a job's terminal transition.
async fn finish_job(ctx: &JobTaskContext, job: Job) {
    match job.status {
        JobStatus::Completed => match retrieve_artifact(ctx, &job).await {
            Ok(()) => {
                debug!(job_id = %job.job_id, "Job completed, artifact stored");
                ctx.observer.on_terminal(&job, None).await;
            }
            Err(e) => {
                // Item-level failure; the rest of the batch continues.
                warn!(job_id = %job.job_id, error = %e, "Artifact retrieval failed");
                let message = e.to_string();
                let snapshot = {
                    let mut registry = ctx.jobs.write().await;
                    match registry.get_mut(&job.job_id) {
                        Some(entry) => {
                            entry.status = JobStatus::Error;
                            entry.message = Some(message.clone());
                            entry.clone()
                        }
                        None => job.clone(),
                    }
                };
                ctx.observer.on_terminal(&snapshot, Some(message)).await;
            }
        },
        JobStatus::Error => {
            let message = job
                .message
                .clone()
                .unwrap_or_else(|| "conversion failed".to_string());
            ctx.observer.on_terminal(&job, Some(message)).await;
        }
        _ => {}
    }
}

/// Fetch a completed job's artifact into the result store.
async fn retrieve_artifact(ctx: &JobTaskContext, job: &Job) -> Result<(), TrackError> {
    let locator = job.download_url.as_deref().ok_or(TrackError::MissingLocator)?;
    let (payload, header_type) = ctx.fetcher.fetch(locator, ctx.credential.as_deref()).await?;

    crate::metrics::ARTIFACT_BYTES.inc_by(payload.len() as u64);

    let declared = header_type.or_else(|| job.content_type.clone());
    let content_kind = ContentKind::from_content_type(declared.as_deref());
    let source_items: Vec<ConversionItem> = job
        .item_ids
        .iter()
        .filter_map(|id| ctx.items.get(id).cloned())
        .collect();

    ctx.store.set(ConversionResult {
        payload,
        content_kind,
        source_items,
    });

    Ok(())
}

/// Mark a job failed for a tracker-side reason and notify the observer.
async fn fail_job(ctx: &JobTaskContext, job_id: &str, message: &str) {
    let snapshot = {
        let mut registry = ctx.jobs.write().await;
        match registry.get_mut(job_id) {
            Some(job) => {
                if !job.status.is_terminal() {
                    job.status = JobStatus::Error;
                    job.message = Some(message.to_string());
                }
                Some(job.clone())
            }
            None => None,
        }
    };

    if let Some(job) = snapshot {
        ctx.observer.on_terminal(&job, Some(message.to_string())).await;
    }
    ctx.channel.unsubscribe(job_id).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{ConversionOptions, ItemKind, ItemSource};
    use crate::testing::{MockArtifactFetcher, MockChannel, RecordingObserver};
    use crate::tracker::JobEvent;

    fn pdf_item(id: &str) -> ConversionItem {
        ConversionItem {
            id: id.to_string(),
            name: "original.pdf".to_string(),
            kind: ItemKind::Document,
            source: ItemSource::File {
                path: "/tmp/original.pdf".into(),
            },
            size_bytes: 2 * 1024 * 1024,
            options: ConversionOptions::default(),
            requires_credential: false,
        }
    }

    fn tracker_with(
        channel: &Arc<MockChannel>,
        fetcher: &Arc<MockArtifactFetcher>,
    ) -> (JobTracker, Arc<ResultStore>) {
        let store = Arc::new(ResultStore::new());
        let tracker = JobTracker::new(
            Arc::clone(channel) as Arc<dyn RealtimeChannel>,
            Arc::clone(&store),
            Arc::clone(fetcher) as Arc<dyn ArtifactFetcher>,
        );
        (tracker, store)
    }

    #[tokio::test]
    async fn test_complete_event_stores_artifact_and_unsubscribes() {
        let channel = Arc::new(MockChannel::new());
        let fetcher = Arc::new(MockArtifactFetcher::with_payload(
            b"# converted".to_vec(),
            Some("text/markdown".to_string()),
        ));
        let (tracker, store) = tracker_with(&channel, &fetcher);
        let observer = Arc::new(RecordingObserver::new());

        tracker
            .track(
                vec![DispatchedJob::single("j-1", "i-1")],
                &[pdf_item("i-1")],
                None,
                CancellationToken::new(),
                Arc::clone(&observer) as Arc<dyn TrackerObserver>,
            )
            .await;

        channel
            .emit("j-1", JobEvent::Progress { percent: 40.0 })
            .await;
        channel
            .emit(
                "j-1",
                JobEvent::Complete {
                    download_url: Some("/artifacts/j-1".to_string()),
                    result_url: None,
                    content_type: None,
                },
            )
            .await;

        observer.wait_for_terminals(1).await;

        let result = store.get().expect("artifact stored");
        assert_eq!(result.content_kind, ContentKind::Markdown);
        assert_eq!(result.source_items[0].name, "original.pdf");
        assert_eq!(result.suggested_filename(), "original.md");

        assert!(channel.unsubscribed().await.contains(&"j-1".to_string()));
        assert_eq!(tracker.active_count().await, 0);

        let terminals = observer.terminals().await;
        assert_eq!(terminals.len(), 1);
        assert!(terminals[0].1.is_none());
    }

    #[tokio::test]
    async fn test_regressive_progress_is_ignored() {
        let channel = Arc::new(MockChannel::new());
        let fetcher = Arc::new(MockArtifactFetcher::with_payload(Vec::new(), None));
        let (tracker, _store) = tracker_with(&channel, &fetcher);
        let observer = Arc::new(RecordingObserver::new());

        tracker
            .track(
                vec![DispatchedJob::single("j-1", "i-1")],
                &[pdf_item("i-1")],
                None,
                CancellationToken::new(),
                Arc::clone(&observer) as Arc<dyn TrackerObserver>,
            )
            .await;

        channel
            .emit("j-1", JobEvent::Progress { percent: 40.0 })
            .await;
        channel
            .emit("j-1", JobEvent::Progress { percent: 25.0 })
            .await;

        observer.wait_for_updates(2).await;

        let jobs = tracker.jobs().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].progress_percent, 40.0);
    }

    #[tokio::test]
    async fn test_error_event_is_terminal_with_message() {
        let channel = Arc::new(MockChannel::new());
        let fetcher = Arc::new(MockArtifactFetcher::with_payload(Vec::new(), None));
        let (tracker, store) = tracker_with(&channel, &fetcher);
        let observer = Arc::new(RecordingObserver::new());

        tracker
            .track(
                vec![DispatchedJob::single("j-1", "i-1")],
                &[pdf_item("i-1")],
                None,
                CancellationToken::new(),
                Arc::clone(&observer) as Arc<dyn TrackerObserver>,
            )
            .await;

        channel
            .emit(
                "j-1",
                JobEvent::Error {
                    message: "conversion exploded".to_string(),
                    code: None,
                },
            )
            .await;

        observer.wait_for_terminals(1).await;

        let terminals = observer.terminals().await;
        assert_eq!(
            terminals[0].1.as_deref(),
            Some("conversion exploded")
        );
        assert!(store.is_empty());
        assert!(channel.unsubscribed().await.contains(&"j-1".to_string()));
    }

    #[tokio::test]
    async fn test_completion_without_locator_is_item_level_error() {
        let channel = Arc::new(MockChannel::new());
        let fetcher = Arc::new(MockArtifactFetcher::with_payload(Vec::new(), None));
        let (tracker, store) = tracker_with(&channel, &fetcher);
        let observer = Arc::new(RecordingObserver::new());

        tracker
            .track(
                vec![DispatchedJob::single("j-1", "i-1")],
                &[pdf_item("i-1")],
                None,
                CancellationToken::new(),
                Arc::clone(&observer) as Arc<dyn TrackerObserver>,
            )
            .await;

        channel
            .emit(
                "j-1",
                JobEvent::Complete {
                    download_url: None,
                    result_url: None,
                    content_type: None,
                },
            )
            .await;

        observer.wait_for_terminals(1).await;

        let terminals = observer.terminals().await;
        assert!(terminals[0].1.is_some());
        assert!(store.is_empty());

        let jobs = tracker.jobs().await;
        assert_eq!(jobs[0].status, JobStatus::Error);
    }

    #[tokio::test]
    async fn test_cancellation_unsubscribes_all_jobs() {
        let channel = Arc::new(MockChannel::new());
        let fetcher = Arc::new(MockArtifactFetcher::with_payload(Vec::new(), None));
        let (tracker, _store) = tracker_with(&channel, &fetcher);
        let observer = Arc::new(RecordingObserver::new());
        let cancel = CancellationToken::new();

        tracker
            .track(
                vec![
                    DispatchedJob::single("j-1", "i-1"),
                    DispatchedJob::single("j-2", "i-2"),
                ],
                &[pdf_item("i-1"), pdf_item("i-2")],
                None,
                cancel.clone(),
                Arc::clone(&observer) as Arc<dyn TrackerObserver>,
            )
            .await;

        channel
            .emit("j-1", JobEvent::Progress { percent: 10.0 })
            .await;
        observer.wait_for_updates(1).await;

        cancel.cancel();
        channel.wait_for_unsubscribes(2).await;

        let jobs = tracker.jobs().await;
        assert!(jobs.iter().all(|j| j.status == JobStatus::Cancelled));
        assert_eq!(tracker.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_reconnect_resubscribes_active_jobs_once() {
        let channel = Arc::new(MockChannel::new());
        let fetcher = Arc::new(MockArtifactFetcher::with_payload(Vec::new(), None));
        let (tracker, _store) = tracker_with(&channel, &fetcher);
        let observer = Arc::new(RecordingObserver::new());

        tracker
            .track(
                vec![DispatchedJob::single("j-1", "i-1")],
                &[pdf_item("i-1")],
                None,
                CancellationToken::new(),
                Arc::clone(&observer) as Arc<dyn TrackerObserver>,
            )
            .await;

        channel.wait_for_subscribes(1).await;
        channel.simulate_reconnect().await;
        channel.wait_for_subscribes(2).await;

        // The stale registration was removed before the new subscribe
        let unsubscribed = channel.unsubscribed().await;
        assert_eq!(unsubscribed, vec!["j-1".to_string()]);
        assert_eq!(channel.live_subscription_count().await, 1);

        // Events on the new subscription still drive the job
        channel
            .emit("j-1", JobEvent::Progress { percent: 55.0 })
            .await;
        observer.wait_for_updates(1).await;
        assert_eq!(tracker.jobs().await[0].progress_percent, 55.0);
    }
}
