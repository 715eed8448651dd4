//! Retention sweeper: periodic purge of stale presence records.

use chrono::Utc;
use diesel::PgConnection;
use log::{debug, info, warn};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::StoreError;
use crate::services::presence;

/// Purge everything older than `now - retention`. Also the entry point
/// for the administrative manual trigger. Idempotent: a second run with
/// no new writes deletes nothing.
pub fn sweep_once(conn: &mut PgConnection, retention: chrono::Duration) -> Result<usize, StoreError> {
    let cutoff = Utc::now() - retention;
    presence::purge_older_than(conn, cutoff)
}

/// Run the sweeper at a steady cadence. Safe alongside concurrent
/// upserts and queries; deletes are a single statement per tick. A
/// failed tick is logged and retried on the next one rather than
/// stopping retention for good.
pub fn run_loop(conn: &mut PgConnection, retention: chrono::Duration, interval: Duration) -> ! {
    info!(
        "Sweeper: retention={}h, interval={}s",
        retention.num_hours(),
        interval.as_secs()
    );
    loop {
        let tick_start = Instant::now();

        match sweep_once(conn, retention) {
            Ok(0) => debug!("Sweeper: nothing to purge"),
            Ok(deleted) => info!("Sweeper: purged {} stale record(s)", deleted),
            Err(e) => warn!("Sweeper: purge failed, will retry next tick: {}", e),
        }

        // Maintain steady cadence
        let elapsed = tick_start.elapsed();
        if elapsed < interval {
            thread::sleep(interval - elapsed);
        }
    }
}
