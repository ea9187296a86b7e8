//! Trait definition for the request dispatcher.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::item::ConversionItem;

use super::error::DispatchError;
use super::types::DispatchOutcome;

/// Submits normalized items to the conversion backend.
///
/// Implementations decide nothing about shared state; they return per-item
/// outcomes for the orchestrator to act on. The whole call fails only when
/// no item could be submitted at all (batch transport failure,
/// cancellation).
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Returns the name of this dispatcher implementation.
    fn name(&self) -> &str;

    /// Dispatch the given items, honoring the shared cancellation token.
    ///
    /// `credential` is attached to credential-gated requests only. In
    /// per-item mode the returned vector has exactly one outcome per item,
    /// in submission order.
    async fn dispatch(
        &self,
        items: &[ConversionItem],
        credential: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Vec<DispatchOutcome>, DispatchError>;
}
