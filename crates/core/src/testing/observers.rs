//! Recording tracker observer for testing.

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::tracker::{Job, TrackerObserver};

use super::wait_until;

/// Records every tracker callback for assertions.
pub struct RecordingObserver {
    updates: RwLock<Vec<(Job, f32)>>,
    terminals: RwLock<Vec<(Job, Option<String>)>>,
}

impl Default for RecordingObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self {
            updates: RwLock::new(Vec::new()),
            terminals: RwLock::new(Vec::new()),
        }
    }

    /// All `(job, aggregate_percent)` updates, in order.
    pub async fn updates(&self) -> Vec<(Job, f32)> {
        self.updates.read().await.clone()
    }

    /// All `(job, error)` terminal callbacks, in order.
    pub async fn terminals(&self) -> Vec<(Job, Option<String>)> {
        self.terminals.read().await.clone()
    }

    /// Wait until at least `count` updates were observed.
    pub async fn wait_for_updates(&self, count: usize) {
        wait_until(
            || async { self.updates.read().await.len() >= count },
            &format!("{} tracker updates", count),
        )
        .await;
    }

    /// Wait until at least `count` terminal callbacks were observed.
    pub async fn wait_for_terminals(&self, count: usize) {
        wait_until(
            || async { self.terminals.read().await.len() >= count },
            &format!("{} terminal jobs", count),
        )
        .await;
    }
}

#[async_trait]
impl TrackerObserver for RecordingObserver {
    async fn on_update(&self, job: &Job, aggregate_percent: f32) {
        self.updates
            .write()
            .await
            .push((job.clone(), aggregate_percent));
    }

    async fn on_terminal(&self, job: &Job, error: Option<String>) {
        self.terminals.write().await.push((job.clone(), error));
    }
}
