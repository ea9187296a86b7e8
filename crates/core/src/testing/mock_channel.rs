//! Mock real-time channel for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, watch, RwLock};

use crate::tracker::{
    ChannelError, ConnectionState, JobEvent, JobSubscription, RealtimeChannel,
};

use super::wait_until;

/// Mock implementation of the RealtimeChannel trait.
///
/// Provides controllable behavior for testing:
/// - Emit scripted events into any job's subscription
/// - Track subscribe/unsubscribe calls for assertions
/// - Simulate reconnects (epoch bumps) and failures
pub struct MockChannel {
    /// Live per-job event senders.
    routes: RwLock<HashMap<String, mpsc::Sender<JobEvent>>>,
    /// Every job id passed to `subscribe`, in call order.
    subscribes: RwLock<Vec<String>>,
    /// Every job id passed to `unsubscribe`, in call order.
    unsubscribes: RwLock<Vec<String>>,
    /// If set, the next subscribe will fail with this error.
    next_error: RwLock<Option<ChannelError>>,
    conn_tx: watch::Sender<ConnectionState>,
    epoch: AtomicU64,
}

impl Default for MockChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChannel {
    /// Create a mock channel that reports itself connected.
    pub fn new() -> Self {
        let (conn_tx, _) = watch::channel(ConnectionState::Connected { epoch: 1 });
        Self {
            routes: RwLock::new(HashMap::new()),
            subscribes: RwLock::new(Vec::new()),
            unsubscribes: RwLock::new(Vec::new()),
            next_error: RwLock::new(None),
            conn_tx,
            epoch: AtomicU64::new(1),
        }
    }

    /// Emit an event into a job's subscription.
    ///
    /// Waits for the subscription to exist first, since tracker tasks
    /// subscribe asynchronously.
    pub async fn emit(&self, job_id: &str, event: JobEvent) {
        wait_until(
            || async { self.routes.read().await.contains_key(job_id) },
            &format!("subscription for {}", job_id),
        )
        .await;

        let tx = self.routes.read().await.get(job_id).cloned();
        if let Some(tx) = tx {
            let _ = tx.send(event).await;
        }
    }

    /// Bump the connection epoch, as a reconnect would.
    pub async fn simulate_reconnect(&self) {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.conn_tx
            .send_replace(ConnectionState::Connected { epoch });
    }

    /// Configure the next subscribe call to fail.
    pub async fn set_next_error(&self, error: ChannelError) {
        *self.next_error.write().await = Some(error);
    }

    /// Job ids passed to `subscribe`, in call order.
    pub async fn subscribed(&self) -> Vec<String> {
        self.subscribes.read().await.clone()
    }

    /// Job ids passed to `unsubscribe`, in call order.
    pub async fn unsubscribed(&self) -> Vec<String> {
        self.unsubscribes.read().await.clone()
    }

    /// Number of currently live subscriptions.
    pub async fn live_subscription_count(&self) -> usize {
        self.routes.read().await.len()
    }

    /// Wait until `subscribe` has been called at least `count` times.
    pub async fn wait_for_subscribes(&self, count: usize) {
        wait_until(
            || async { self.subscribes.read().await.len() >= count },
            &format!("{} subscribes", count),
        )
        .await;
    }

    /// Wait until `unsubscribe` has been called at least `count` times.
    pub async fn wait_for_unsubscribes(&self, count: usize) {
        wait_until(
            || async { self.unsubscribes.read().await.len() >= count },
            &format!("{} unsubscribes", count),
        )
        .await;
    }
}

#[async_trait]
impl RealtimeChannel for MockChannel {
    async fn open(&self) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn close(&self) {
        self.routes.write().await.clear();
        self.conn_tx.send_replace(ConnectionState::Closed);
    }

    async fn subscribe(&self, job_id: &str) -> Result<JobSubscription, ChannelError> {
        if let Some(err) = self.next_error.write().await.take() {
            return Err(err);
        }

        self.subscribes.write().await.push(job_id.to_string());

        let (tx, rx) = mpsc::channel(32);
        self.routes.write().await.insert(job_id.to_string(), tx);
        Ok(JobSubscription::new(job_id, rx))
    }

    async fn unsubscribe(&self, job_id: &str) {
        self.routes.write().await.remove(job_id);
        self.unsubscribes.write().await.push(job_id.to_string());
    }

    fn connection(&self) -> watch::Receiver<ConnectionState> {
        self.conn_tx.subscribe()
    }
}
