//! WebSocket implementation of the real-time channel.
//!
//! One connection per channel; the io task routes inbound JSON-tagged
//! events to per-job subscriptions and reconnects with capped exponential
//! backoff. Re-subscription after a reconnect is driven by the tracker
//! through the connection epoch, so a job never holds more than one live
//! registration.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RealtimeConfig;

use super::channel::{ChannelError, ConnectionState, JobSubscription, RealtimeChannel};
use super::types::{JobEvent, JobStatus};

/// Capacity of a per-job event buffer.
const EVENT_BUFFER: usize = 32;

/// Capacity of the outbound control frame queue.
const COMMAND_BUFFER: usize = 64;

/// Outbound control frames.
#[derive(Debug)]
enum Command {
    Subscribe(String),
    Unsubscribe(String),
}

/// WebSocket-backed [`RealtimeChannel`].
pub struct WsChannel {
    inner: Arc<Inner>,
}

struct Inner {
    config: RealtimeConfig,
    /// job id -> event sender for the live subscription.
    routes: RwLock<HashMap<String, mpsc::Sender<JobEvent>>>,
    commands: mpsc::Sender<Command>,
    /// Taken by `open`; present means the io task has not started yet.
    pending_commands: Mutex<Option<mpsc::Receiver<Command>>>,
    conn_tx: watch::Sender<ConnectionState>,
    shutdown: CancellationToken,
}

impl WsChannel {
    /// Create a new channel for the given realtime configuration.
    ///
    /// Nothing connects until [`RealtimeChannel::open`] is called.
    pub fn new(config: RealtimeConfig) -> Self {
        let (commands, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let (conn_tx, _) = watch::channel(ConnectionState::Connecting);

        Self {
            inner: Arc::new(Inner {
                config,
                routes: RwLock::new(HashMap::new()),
                commands,
                pending_commands: Mutex::new(Some(cmd_rx)),
                conn_tx,
                shutdown: CancellationToken::new(),
            }),
        }
    }
}

#[async_trait]
impl RealtimeChannel for WsChannel {
    async fn open(&self) -> Result<(), ChannelError> {
        let Some(cmd_rx) = self.inner.pending_commands.lock().await.take() else {
            warn!("Realtime channel already opened");
            return Ok(());
        };

        tokio::spawn(run_io(Arc::clone(&self.inner), cmd_rx));
        Ok(())
    }

    async fn close(&self) {
        self.inner.shutdown.cancel();
        self.inner.routes.write().await.clear();
        self.inner.conn_tx.send_replace(ConnectionState::Closed);
    }

    async fn subscribe(&self, job_id: &str) -> Result<JobSubscription, ChannelError> {
        if matches!(*self.inner.conn_tx.borrow(), ConnectionState::Closed) {
            return Err(ChannelError::Closed);
        }

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        // Insert replaces any previous registration for this job.
        self.inner
            .routes
            .write()
            .await
            .insert(job_id.to_string(), tx);

        self.inner
            .commands
            .send(Command::Subscribe(job_id.to_string()))
            .await
            .map_err(|_| ChannelError::Subscribe {
                job_id: job_id.to_string(),
                reason: "channel io task is gone".to_string(),
            })?;

        Ok(JobSubscription::new(job_id, rx))
    }

    async fn unsubscribe(&self, job_id: &str) {
        self.inner.routes.write().await.remove(job_id);
        let _ = self
            .inner
            .commands
            .send(Command::Unsubscribe(job_id.to_string()))
            .await;
    }

    fn connection(&self) -> watch::Receiver<ConnectionState> {
        self.inner.conn_tx.subscribe()
    }
}

/// Connection loop: connect, serve, back off, repeat until shutdown.
async fn run_io(inner: Arc<Inner>, mut cmd_rx: mpsc::Receiver<Command>) {
    let mut epoch: u64 = 0;
    let initial = Duration::from_millis(inner.config.reconnect_initial_ms);
    let max_backoff = Duration::from_millis(inner.config.reconnect_max_ms);
    let mut backoff = initial;

    loop {
        if inner.shutdown.is_cancelled() {
            break;
        }

        let connect = tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            result = connect_async(inner.config.url.as_str()) => result,
        };

        match connect {
            Ok((socket, _response)) => {
                epoch += 1;
                backoff = initial;
                if epoch > 1 {
                    crate::metrics::WS_RECONNECTS.inc();
                }
                info!(epoch, url = %inner.config.url, "Realtime channel connected");
                inner
                    .conn_tx
                    .send_replace(ConnectionState::Connected { epoch });

                run_connection(&inner, socket, &mut cmd_rx).await;

                if inner.shutdown.is_cancelled() {
                    break;
                }
                inner.conn_tx.send_replace(ConnectionState::Connecting);
            }
            Err(e) => {
                warn!(error = %e, "Realtime connect failed");
                inner.conn_tx.send_replace(ConnectionState::Connecting);
            }
        }

        debug!(backoff_ms = backoff.as_millis() as u64, "Reconnecting after backoff");
        tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = (backoff * 2).min(max_backoff);
    }

    inner.conn_tx.send_replace(ConnectionState::Closed);
    inner.routes.write().await.clear();
    debug!("Realtime channel io task stopped");
}

/// Serve one live connection until it drops or shutdown is requested.
async fn run_connection<S>(inner: &Inner, socket: S, cmd_rx: &mut mpsc::Receiver<Command>)
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin,
{
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return;
            }
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { return };
                let frame = match &cmd {
                    Command::Subscribe(job_id) => control_frame("subscribe", job_id),
                    Command::Unsubscribe(job_id) => control_frame("unsubscribe", job_id),
                };
                if let Err(e) = sink.send(Message::Text(frame)).await {
                    warn!(error = %e, "Realtime send failed");
                    return;
                }
            }
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => route_message(inner, &text).await,
                // Pong is queued by tungstenite on read
                Some(Ok(Message::Ping(_))) => {}
                Some(Ok(Message::Close(_))) | None => {
                    debug!("Realtime connection closed by server");
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "Realtime receive error");
                    return;
                }
            }
        }
    }
}

/// Deliver one inbound frame to its job's subscription.
async fn route_message(inner: &Inner, text: &str) {
    let wire: WireMessage = match serde_json::from_str(text) {
        Ok(wire) => wire,
        Err(e) => {
            debug!(error = %e, "Ignoring unparseable realtime frame");
            return;
        }
    };

    let Some((job_id, event)) = wire.into_event() else {
        return;
    };

    let tx = inner.routes.read().await.get(&job_id).cloned();
    match tx {
        Some(tx) => {
            if tx.send(event).await.is_err() {
                debug!(job_id = %job_id, "Subscriber dropped, event discarded");
            }
        }
        None => debug!(job_id = %job_id, "Event for unsubscribed job"),
    }
}

fn control_frame(action: &str, job_id: &str) -> String {
    #[derive(Serialize)]
    struct ControlFrame<'a> {
        action: &'a str,
        job_id: &'a str,
    }

    serde_json::to_string(&ControlFrame { action, job_id }).expect("control frame serialize")
}

/// Inbound frame sent by the server, keyed by job id.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireMessage {
    Status {
        job_id: String,
        #[serde(default)]
        state: Option<JobStatus>,
        #[serde(default)]
        message: Option<String>,
    },
    Progress {
        job_id: String,
        percent: f32,
    },
    Complete {
        job_id: String,
        #[serde(default)]
        download_url: Option<String>,
        #[serde(default)]
        result_url: Option<String>,
        #[serde(default)]
        content_type: Option<String>,
    },
    Error {
        job_id: String,
        message: String,
        #[serde(default)]
        code: Option<String>,
    },
    /// Keep-alive; not routed anywhere.
    Heartbeat {
        #[serde(default)]
        timestamp: i64,
    },
}

impl WireMessage {
    /// Split into the target job id and the routed event.
    fn into_event(self) -> Option<(String, JobEvent)> {
        match self {
            Self::Status {
                job_id,
                state,
                message,
            } => Some((job_id, JobEvent::Status { state, message })),
            Self::Progress { job_id, percent } => Some((job_id, JobEvent::Progress { percent })),
            Self::Complete {
                job_id,
                download_url,
                result_url,
                content_type,
            } => Some((
                job_id,
                JobEvent::Complete {
                    download_url,
                    result_url,
                    content_type,
                },
            )),
            Self::Error {
                job_id,
                message,
                code,
            } => Some((job_id, JobEvent::Error { message, code })),
            Self::Heartbeat { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_progress_frame() {
        let wire: WireMessage =
            serde_json::from_str(r#"{"type": "progress", "job_id": "j-1", "percent": 42.0}"#)
                .unwrap();
        let (job_id, event) = wire.into_event().unwrap();
        assert_eq!(job_id, "j-1");
        assert_eq!(event, JobEvent::Progress { percent: 42.0 });
    }

    #[test]
    fn test_parse_status_frame() {
        let wire: WireMessage = serde_json::from_str(
            r#"{"type": "status", "job_id": "j-1", "state": "streaming", "message": "rendering"}"#,
        )
        .unwrap();
        let (_, event) = wire.into_event().unwrap();
        assert_eq!(
            event,
            JobEvent::Status {
                state: Some(JobStatus::Streaming),
                message: Some("rendering".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_complete_frame() {
        let wire: WireMessage = serde_json::from_str(
            r#"{"type": "complete", "job_id": "j-2", "download_url": "/artifacts/j-2", "content_type": "text/markdown"}"#,
        )
        .unwrap();
        let (job_id, event) = wire.into_event().unwrap();
        assert_eq!(job_id, "j-2");
        assert!(event.is_terminal());
    }

    #[test]
    fn test_heartbeat_is_not_routed() {
        let wire: WireMessage =
            serde_json::from_str(r#"{"type": "heartbeat", "timestamp": 1700000000}"#).unwrap();
        assert!(wire.into_event().is_none());
    }

    #[test]
    fn test_control_frames() {
        assert_eq!(
            control_frame("subscribe", "j-1"),
            r#"{"action":"subscribe","job_id":"j-1"}"#
        );
        assert_eq!(
            control_frame("unsubscribe", "j-1"),
            r#"{"action":"unsubscribe","job_id":"j-1"}"#
        );
    }

    #[tokio::test]
    async fn test_subscribe_after_close_fails() {
        let channel = WsChannel::new(RealtimeConfig::default());
        channel.close().await;
        let err = channel.subscribe("j-1").await.unwrap_err();
        assert!(matches!(err, ChannelError::Closed));
    }
}
