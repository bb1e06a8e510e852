//! Background sweep for expired sessions and mailboxes.
//!
//! Reads already ignore expired entries; the sweep only reclaims memory in
//! backends without native expiry.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::clock::Clock;
use crate::storage::Stores;

/// Spawns the sweep. A zero `every` disables it.
pub fn spawn_cleanup_task(stores: Stores, clock: Arc<dyn Clock>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        if every.is_zero() {
            info!("cleanup task disabled");
            return;
        }
        info!(interval_secs = every.as_secs(), "cleanup task started");

        let mut timer = interval(every);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            timer.tick().await;
            let now = clock.now_millis();

            match stores.sessions.purge_expired(now).await {
                Ok(0) => debug!("cleanup: no expired sessions"),
                Ok(purged) => info!(purged, "cleanup: removed expired sessions"),
                Err(err) => error!(error = %err, "cleanup: session sweep failed"),
            }
            match stores.mailboxes.purge_expired(now).await {
                Ok(0) => debug!("cleanup: no expired mailboxes"),
                Ok(purged) => info!(purged, "cleanup: removed expired mailboxes"),
                Err(err) => error!(error = %err, "cleanup: mailbox sweep failed"),
            }
        }
    })
}
