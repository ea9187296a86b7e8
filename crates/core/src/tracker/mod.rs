//! Job lifecycle tracking over the real-time update channel.
//!
//! Every accepted job gets a per-job subscription; inbound events drive a
//! pure state reducer, completions trigger the artifact fetch, and terminal
//! events tear the subscription down.

mod channel;
mod runner;
mod types;
mod ws;

pub use channel::{ChannelError, ConnectionState, JobSubscription, RealtimeChannel};
pub use runner::{ArtifactFetcher, HttpArtifactFetcher, JobTracker, TrackerObserver};
pub use types::*;
pub use ws::WsChannel;
