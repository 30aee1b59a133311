//! Repository for the `vm_metrics` table (append-only time-series).

use sqlx::PgPool;
use vmwatch_core::types::{DbId, Timestamp};

use crate::models::vm_metric::{MetricsSample, VmMetric};

/// Column list for `vm_metrics` SELECT / RETURNING clauses.
///
/// NUMERIC columns are cast to text to preserve the stored decimal.
const COLUMNS: &str = "\
    id, vm_id, recorded_at, uptime, cpu_usage::text AS cpu_usage, \
    memory_used, memory_total, swap_used, swap_total, \
    disk_used, disk_total, disk_read, disk_write, \
    network_in, network_out, tcp_connections, udp_connections, process_count, \
    load_1::text AS load_1, load_5::text AS load_5, load_15::text AS load_15, \
    created_at";

/// Column list for `vm_metrics` INSERT statements (excludes auto-generated `id` and `created_at`).
const INSERT_COLUMNS: &str = "\
    vm_id, recorded_at, uptime, cpu_usage, \
    memory_used, memory_total, swap_used, swap_total, \
    disk_used, disk_total, disk_read, disk_write, \
    network_in, network_out, tcp_connections, udp_connections, process_count, \
    load_1, load_5, load_15";

/// Provides query operations for VM metrics.
pub struct VmMetricRepo;

impl VmMetricRepo {
    /// Insert a single sample, returning the persisted row.
    pub async fn insert(pool: &PgPool, sample: &MetricsSample) -> Result<VmMetric, sqlx::Error> {
        let query = format!(
            "INSERT INTO vm_metrics ({INSERT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, \
                     $11, $12, $13, $14, $15, $16, $17, $18, $19, $20) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, VmMetric>(&query)
            .bind(sample.vm_id)
            .bind(sample.recorded_at)
            .bind(sample.uptime)
            .bind(sample.cpu_usage)
            .bind(sample.memory_used)
            .bind(sample.memory_total)
            .bind(sample.swap_used)
            .bind(sample.swap_total)
            .bind(sample.disk_used)
            .bind(sample.disk_total)
            .bind(sample.disk_read)
            .bind(sample.disk_write)
            .bind(sample.network_in)
            .bind(sample.network_out)
            .bind(sample.tcp_connections)
            .bind(sample.udp_connections)
            .bind(sample.process_count)
            .bind(sample.load_1)
            .bind(sample.load_5)
            .bind(sample.load_15)
            .fetch_one(pool)
            .await
    }

    /// Most recent samples across the given VMs, newest first.
    ///
    /// A `None` limit binds SQL `NULL`, which Postgres treats as `LIMIT ALL`.
    pub async fn list_for_vms(
        pool: &PgPool,
        vm_ids: &[DbId],
        limit: Option<i64>,
    ) -> Result<Vec<VmMetric>, sqlx::Error> {
        if vm_ids.is_empty() {
            return Ok(Vec::new());
        }
        let query = format!(
            "SELECT {COLUMNS} FROM vm_metrics \
             WHERE vm_id = ANY($1) \
             ORDER BY recorded_at DESC, id DESC \
             LIMIT $2"
        );
        sqlx::query_as::<_, VmMetric>(&query)
            .bind(vm_ids)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// Delete metrics older than the given cutoff timestamp.
    ///
    /// Returns the number of rows deleted.
    pub async fn delete_older_than(pool: &PgPool, cutoff: Timestamp) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM vm_metrics WHERE recorded_at < $1")
            .bind(cutoff)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
