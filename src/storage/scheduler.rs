//! Periodic background sync for one tenant.

use std::sync::Weak;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};

use super::user_storage::UserStorage;

/// Spawn the sync ticker for one instance.
///
/// The first tick fires one full `interval` after spawning. The task holds
/// only a weak reference, so it ends when the token is cancelled or the
/// instance has been dropped.
#[must_use]
pub(crate) fn spawn_sync_task(
    storage: Weak<UserStorage>,
    tenant: String,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let span = info_span!("sync_task", tenant = %tenant);
    tokio::spawn(
        async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        debug!("sync task shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let Some(storage) = storage.upgrade() else {
                            debug!("storage dropped; sync task exiting");
                            break;
                        };
                        match storage.sync(&cancel).await {
                            Ok(report) if report.skipped => {}
                            Ok(report) => info!(
                                upserted = report.upserted,
                                deleted = report.deleted,
                                backed_up = report.backed_up,
                                "background sync completed"
                            ),
                            Err(err) => error!(%err, "background sync failed"),
                        }
                    }
                }
            }
        }
        .instrument(span),
    )
}
