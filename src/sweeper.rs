//! Expiry sweeper
//!
//! A long-lived background task that purges expired token records: once
//! immediately at startup, then on a fixed interval until cancelled. Cleanup
//! failures are logged and retried on the next tick; they never terminate
//! the loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::store::TokenStore;

/// Spawn the sweeper. Returns the task handle; cancel `shutdown` to stop the
/// loop without an error surfacing anywhere.
pub fn spawn(
    store: Arc<dyn TokenStore>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        // The first tick fires immediately, giving the startup sweep.
        let mut ticker = tokio::time::interval(interval);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    debug!("Expiry sweeper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    match store.cleanup_expired().await {
                        Ok(0) => {}
                        Ok(removed) => info!(removed, "Purged expired token records"),
                        Err(e) => {
                            warn!(error = %e, "Token cleanup failed; retrying next interval");
                        }
                    }
                }
            }
        }
    })
}
