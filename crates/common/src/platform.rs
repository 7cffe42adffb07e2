//! Adapter interface for prediction-market platforms.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// A venue adapter. A process may host several, keyed by [`Platform::name`].
///
/// New venues are added by implementing this trait over the venue's stream
/// and catalog clients; the engine and store stay untouched.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Stable platform identifier (e.g. "polymarket").
    fn name(&self) -> &'static str;

    /// Connect and consume the venue's feed. Blocks until `cancel` fires or
    /// an unrecoverable error occurs; the error is returned to the caller,
    /// which decides whether to restart.
    async fn start(&self, cancel: CancellationToken) -> anyhow::Result<()>;

    /// Close the venue connection. Best-effort.
    async fn stop(&self) -> anyhow::Result<()>;
}
