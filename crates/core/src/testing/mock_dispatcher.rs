//! Mock dispatcher for testing.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::dispatch::{
    use_batch_mode, DispatchError, DispatchOutcome, DispatchedJob, Dispatcher,
};
use crate::item::ConversionItem;

/// A recorded dispatch call for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedDispatch {
    /// The items that were submitted.
    pub items: Vec<ConversionItem>,
    /// Whether the batching rule selected batch mode.
    pub batch: bool,
    /// The credential attached to the call, if any.
    pub credential: Option<String>,
}

/// Mock implementation of the Dispatcher trait.
///
/// Provides controllable behavior for testing:
/// - Assign synthetic job ids (`job-1`, `job-2`, ...)
/// - Track dispatch calls for assertions
/// - Reject selected items, fail whole calls, or return a collective
///   batch job id
pub struct MockDispatcher {
    /// Recorded dispatch calls.
    dispatches: RwLock<Vec<RecordedDispatch>>,
    /// If set, the next dispatch fails entirely with this error.
    next_error: RwLock<Option<DispatchError>>,
    /// Item ids whose per-item requests should be rejected.
    rejected_items: RwLock<HashSet<String>>,
    /// When true, batch-mode calls return one collective job id.
    collective_batch: AtomicBool,
    job_counter: AtomicU64,
}

impl Default for MockDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDispatcher {
    pub fn new() -> Self {
        Self {
            dispatches: RwLock::new(Vec::new()),
            next_error: RwLock::new(None),
            rejected_items: RwLock::new(HashSet::new()),
            collective_batch: AtomicBool::new(false),
            job_counter: AtomicU64::new(0),
        }
    }

    /// Configure the next dispatch call to fail entirely.
    pub async fn set_next_error(&self, error: DispatchError) {
        *self.next_error.write().await = Some(error);
    }

    /// Reject the per-item request for the given item id.
    pub async fn reject_item(&self, item_id: &str) {
        self.rejected_items.write().await.insert(item_id.to_string());
    }

    /// Make batch-mode calls answer with a single collective job id.
    pub fn set_collective_batch(&self, collective: bool) {
        self.collective_batch.store(collective, Ordering::SeqCst);
    }

    /// Recorded dispatch calls, in order.
    pub async fn recorded(&self) -> Vec<RecordedDispatch> {
        self.dispatches.read().await.clone()
    }

    /// Number of dispatch calls made.
    pub async fn dispatch_count(&self) -> usize {
        self.dispatches.read().await.len()
    }

    fn next_job_id(&self) -> String {
        let n = self.job_counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("job-{}", n)
    }
}

#[async_trait]
impl Dispatcher for MockDispatcher {
    fn name(&self) -> &str {
        "mock"
    }

    async fn dispatch(
        &self,
        items: &[ConversionItem],
        credential: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Vec<DispatchOutcome>, DispatchError> {
        if cancel.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }
        if let Some(err) = self.next_error.write().await.take() {
            return Err(err);
        }

        let batch = use_batch_mode(items);
        self.dispatches.write().await.push(RecordedDispatch {
            items: items.to_vec(),
            batch,
            credential: credential.map(str::to_string),
        });

        if batch && self.collective_batch.load(Ordering::SeqCst) {
            let job = DispatchedJob {
                job_id: self.next_job_id(),
                item_ids: items.iter().map(|i| i.id.clone()).collect(),
            };
            return Ok(vec![DispatchOutcome::Accepted(job)]);
        }

        let rejected = self.rejected_items.read().await.clone();
        Ok(items
            .iter()
            .map(|item| {
                if rejected.contains(&item.id) {
                    DispatchOutcome::Rejected {
                        item_id: item.id.clone(),
                        error: DispatchError::Api {
                            status: 500,
                            code: Some("MOCK_REJECTED".to_string()),
                            message: "rejected by mock".to_string(),
                        },
                    }
                } else {
                    DispatchOutcome::Accepted(DispatchedJob::single(
                        self.next_job_id(),
                        item.id.clone(),
                    ))
                }
            })
            .collect())
    }
}
