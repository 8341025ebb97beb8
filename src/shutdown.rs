//! Interrupt handling for a running pipeline

use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Process exit status after a forced stop (128 + SIGINT)
pub const FORCED_EXIT_CODE: i32 = 130;

/// The first interrupt cancels `cancel`, which stops the run between batches.
/// Resolves to `true` once a second interrupt arrives and the caller should
/// exit immediately, `false` if the signal source fails.
pub async fn watch_interrupts<F, Fut>(mut next_interrupt: F, cancel: CancellationToken) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = next_interrupt().await {
        warn!("Interrupt handler unavailable: {}", e);
        return false;
    }
    warn!("Interrupt received, stopping after the current batch (press Ctrl-C again to exit now)");
    cancel.cancel();

    if next_interrupt().await.is_err() {
        return false;
    }
    warn!("Second interrupt received, exiting without waiting for confirmation");
    true
}
