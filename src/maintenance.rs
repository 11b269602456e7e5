use std::time::Duration as StdDuration;

use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::DatabaseMaintenanceConfig;
use crate::db;

/// Periodic WAL checkpoint job (spec.md §4.4). Checkpoint failures are
/// logged and never fatal.
pub async fn maintenance_loop(pool: SqlitePool, config: DatabaseMaintenanceConfig, cancel: CancellationToken) {
    if !config.checkpoint_enabled {
        info!("database maintenance disabled");
        return;
    }

    info!(interval_hours = config.checkpoint_interval_hours, mode = %config.checkpoint_mode, "maintenance loop started");
    let interval = StdDuration::from_secs(config.checkpoint_interval_hours as u64 * 3600);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("maintenance loop shutting down");
                return;
            }
            _ = tokio::time::sleep(interval) => {}
        }

        match db::checkpoint(&pool, &config.checkpoint_mode).await {
            Ok(()) => info!(mode = %config.checkpoint_mode, "wal checkpoint complete"),
            Err(e) => error!(error = %e, "wal checkpoint failed"),
        }
    }
}
