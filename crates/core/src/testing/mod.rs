//! Testing utilities and mock implementations for E2E tests.
//!
//! This module provides mock implementations of the dispatcher, real-time
//! channel, and artifact fetcher seams, allowing full conversion flows to
//! be tested without real infrastructure.
//!
//! # Example
//!
//! ```rust,ignore
//! use markpress_core::testing::{MockChannel, MockDispatcher, MockArtifactFetcher};
//!
//! let dispatcher = MockDispatcher::new();
//! let channel = MockChannel::new();
//!
//! // Drive a job from the test
//! channel.emit("job-1", JobEvent::Progress { percent: 50.0 }).await;
//! ```

mod mock_channel;
mod mock_dispatcher;
mod mock_fetcher;
mod observers;

pub use mock_channel::MockChannel;
pub use mock_dispatcher::{MockDispatcher, RecordedDispatch};
pub use mock_fetcher::MockArtifactFetcher;
pub use observers::RecordingObserver;

use std::future::Future;
use std::time::Duration;

/// Poll `cond` until it holds, panicking after five seconds.
///
/// Event delivery in the tracker is asynchronous; tests use this instead of
/// sleeping for fixed amounts.
pub async fn wait_until<F, Fut>(mut cond: F, what: &str)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if cond().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await;

    if deadline.is_err() {
        panic!("timed out waiting for {}", what);
    }
}

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::item::{ConversionItem, ConversionOptions, ItemKind, ItemSource};

    /// Create a normalized file-backed item with reasonable defaults.
    pub fn file_item(id: &str, name: &str, kind: ItemKind) -> ConversionItem {
        ConversionItem {
            id: id.to_string(),
            name: name.to_string(),
            kind,
            source: ItemSource::File {
                path: format!("/tmp/{}", name).into(),
            },
            size_bytes: 1024,
            options: ConversionOptions::default(),
            requires_credential: kind.requires_credential(),
        }
    }

    /// Create a normalized URL-backed item.
    pub fn url_item(id: &str, url: &str, crawl: bool) -> ConversionItem {
        let kind = if crawl {
            ItemKind::ParentUrl
        } else {
            ItemKind::Url
        };
        ConversionItem {
            id: id.to_string(),
            name: url.to_string(),
            kind,
            source: ItemSource::Url {
                url: url.to_string(),
            },
            size_bytes: 0,
            options: ConversionOptions::default(),
            requires_credential: true,
        }
    }
}
