//! Real-time channel abstraction.
//!
//! The channel is an explicitly constructed, injectable object with an
//! open/close lifecycle so tests can substitute fakes. Subscriptions are
//! typed per-job event streams with structured cancellation: the handle is
//! closed on terminal events or explicit unsubscribe.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

use super::types::JobEvent;

/// Errors raised by the real-time channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The channel has not been opened, or the connection is down.
    #[error("Channel is not connected")]
    NotConnected,

    /// The channel was closed and will not reconnect.
    #[error("Channel closed")]
    Closed,

    /// Transport-level failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The subscribe request could not be delivered.
    #[error("Subscription failed for job {job_id}: {reason}")]
    Subscribe { job_id: String, reason: String },
}

/// Connection state, observable through [`RealtimeChannel::connection`].
///
/// The epoch increments on every successful (re)connect; trackers use it to
/// re-subscribe active jobs exactly once per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never opened, or currently between retries.
    Connecting,
    /// Connected; `epoch` identifies this connection.
    Connected { epoch: u64 },
    /// Closed for good; no further events will arrive.
    Closed,
}

impl ConnectionState {
    /// The connection epoch, when connected.
    pub fn epoch(&self) -> Option<u64> {
        match self {
            Self::Connected { epoch } => Some(*epoch),
            _ => None,
        }
    }
}

/// A live per-job event stream.
///
/// Dropping the subscription stops local delivery; the channel-side
/// registration is removed by [`RealtimeChannel::unsubscribe`].
pub struct JobSubscription {
    job_id: String,
    events: mpsc::Receiver<JobEvent>,
}

impl JobSubscription {
    pub fn new(job_id: impl Into<String>, events: mpsc::Receiver<JobEvent>) -> Self {
        Self {
            job_id: job_id.into(),
            events,
        }
    }

    /// The job this subscription follows.
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Receive the next event; `None` when the stream ended.
    pub async fn recv(&mut self) -> Option<JobEvent> {
        self.events.recv().await
    }
}

impl std::fmt::Debug for JobSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobSubscription")
            .field("job_id", &self.job_id)
            .finish()
    }
}

/// A real-time channel delivering per-job conversion events.
#[async_trait]
pub trait RealtimeChannel: Send + Sync {
    /// Open the underlying connection and start delivering events.
    async fn open(&self) -> Result<(), ChannelError>;

    /// Close the connection and drop every subscription.
    async fn close(&self);

    /// Subscribe to a job's events.
    ///
    /// At most one live registration per job: subscribing again replaces
    /// the previous one.
    async fn subscribe(&self, job_id: &str) -> Result<JobSubscription, ChannelError>;

    /// Remove a job's registration; no-op when not subscribed.
    async fn unsubscribe(&self, job_id: &str);

    /// Watch the connection state for reconnect epochs.
    fn connection(&self) -> watch::Receiver<ConnectionState>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscription_delivers_events() {
        let (tx, rx) = mpsc::channel(4);
        let mut sub = JobSubscription::new("j-1", rx);

        tx.send(JobEvent::Progress { percent: 10.0 }).await.unwrap();
        assert_eq!(sub.recv().await, Some(JobEvent::Progress { percent: 10.0 }));

        drop(tx);
        assert_eq!(sub.recv().await, None);
        assert_eq!(sub.job_id(), "j-1");
    }

    #[test]
    fn test_connection_state_epoch() {
        assert_eq!(ConnectionState::Connecting.epoch(), None);
        assert_eq!(ConnectionState::Closed.epoch(), None);
        assert_eq!(ConnectionState::Connected { epoch: 3 }.epoch(), Some(3));
    }
}
