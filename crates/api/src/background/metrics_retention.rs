//! Periodic cleanup of old VM metrics.
//!
//! Deletes `vm_metrics` rows older than the configured retention period,
//! once an hour.

use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use vmwatch_db::repositories::VmMetricRepo;

/// How often the cleanup job runs.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

/// Run the metrics retention loop until `cancel` is triggered.
pub async fn run(pool: PgPool, retention_hours: i64, cancel: CancellationToken) {
    tracing::info!(
        retention_hours,
        interval_secs = CLEANUP_INTERVAL.as_secs(),
        "Metrics retention job started"
    );

    let mut interval = tokio::time::interval(CLEANUP_INTERVAL);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Metrics retention job stopping");
                break;
            }
            _ = interval.tick() => {
                let cutoff = Utc::now() - chrono::Duration::hours(retention_hours);
                match VmMetricRepo::delete_older_than(&pool, cutoff).await {
                    Ok(0) => tracing::debug!("Metrics retention: no rows to purge"),
                    Ok(deleted) => tracing::info!(deleted, "Metrics retention: purged old rows"),
                    Err(e) => tracing::error!(error = %e, "Metrics retention: cleanup failed"),
                }
            }
        }
    }
}
