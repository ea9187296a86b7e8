//! Mock artifact fetcher for testing.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use crate::tracker::{ArtifactFetcher, TrackError};

/// Mock implementation of the ArtifactFetcher trait.
///
/// Returns a configured payload for every locator and records what was
/// fetched.
pub struct MockArtifactFetcher {
    payload: Vec<u8>,
    content_type: Option<String>,
    /// If set, the next fetch fails with this error.
    next_error: RwLock<Option<TrackError>>,
    /// Locators fetched, in call order.
    fetched: RwLock<Vec<String>>,
}

impl MockArtifactFetcher {
    /// A fetcher answering every locator with the given payload.
    pub fn with_payload(payload: Vec<u8>, content_type: Option<String>) -> Self {
        Self {
            payload,
            content_type,
            next_error: RwLock::new(None),
            fetched: RwLock::new(Vec::new()),
        }
    }

    /// Configure the next fetch to fail.
    pub async fn set_next_error(&self, error: TrackError) {
        *self.next_error.write().await = Some(error);
    }

    /// Locators fetched so far.
    pub async fn fetched(&self) -> Vec<String> {
        self.fetched.read().await.clone()
    }
}

#[async_trait]
impl ArtifactFetcher for MockArtifactFetcher {
    async fn fetch(
        &self,
        locator: &str,
        _credential: Option<&str>,
    ) -> Result<(Bytes, Option<String>), TrackError> {
        if let Some(err) = self.next_error.write().await.take() {
            return Err(err);
        }

        self.fetched.write().await.push(locator.to_string());
        Ok((
            Bytes::from(self.payload.clone()),
            self.content_type.clone(),
        ))
    }
}
