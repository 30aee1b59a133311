//! VM telemetry samples (append-only time-series).

use serde::Serialize;
use sqlx::FromRow;
use vmwatch_core::protocol::AgentMetrics;
use vmwatch_core::types::{DbId, Timestamp};

/// A persisted metrics row from the `vm_metrics` table.
///
/// NUMERIC columns are selected as text so clients receive the exact stored
/// decimal (e.g. `"42.5"`).
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VmMetric {
    pub id: DbId,
    pub vm_id: DbId,
    pub recorded_at: Timestamp,
    pub uptime: i64,
    pub cpu_usage: String,
    pub memory_used: i64,
    pub memory_total: i64,
    pub swap_used: i64,
    pub swap_total: i64,
    pub disk_used: i64,
    pub disk_total: i64,
    pub disk_read: i64,
    pub disk_write: i64,
    pub network_in: i64,
    pub network_out: i64,
    pub tcp_connections: i32,
    pub udp_connections: i32,
    pub process_count: i32,
    pub load_1: String,
    pub load_5: String,
    pub load_15: String,
    pub created_at: Timestamp,
}

/// An immutable sample built from one agent `metrics` frame, ready to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSample {
    pub vm_id: DbId,
    pub recorded_at: Timestamp,
    pub uptime: i64,
    pub cpu_usage: f64,
    pub memory_used: i64,
    pub memory_total: i64,
    pub swap_used: i64,
    pub swap_total: i64,
    pub disk_used: i64,
    pub disk_total: i64,
    pub disk_read: i64,
    pub disk_write: i64,
    pub network_in: i64,
    pub network_out: i64,
    pub tcp_connections: i32,
    pub udp_connections: i32,
    pub process_count: i32,
    pub load_1: f64,
    pub load_5: f64,
    pub load_15: f64,
}

impl MetricsSample {
    /// Build a sample from an agent report, stamped with the ingest time.
    pub fn from_agent(vm_id: DbId, report: &AgentMetrics, recorded_at: Timestamp) -> Self {
        let sys = &report.system;
        Self {
            vm_id,
            recorded_at,
            uptime: whole(report.uptime),
            cpu_usage: finite(sys.cpu_usage),
            memory_used: whole(sys.memory_used),
            memory_total: whole(sys.memory_total),
            swap_used: whole(sys.swap_used),
            swap_total: whole(sys.swap_total),
            disk_used: whole(report.disk.space_used),
            disk_total: whole(report.disk.space_total),
            disk_read: whole(report.disk.read),
            disk_write: whole(report.disk.write),
            network_in: whole(report.network.download_traffic),
            network_out: whole(report.network.upload_traffic),
            tcp_connections: count(report.network.tcp_count),
            udp_connections: count(report.network.udp_count),
            process_count: count(sys.process_count),
            load_1: finite(sys.load_avg.one),
            load_5: finite(sys.load_avg.five),
            load_15: finite(sys.load_avg.fifteen),
        }
    }
}

// Float-to-int `as` casts saturate and map NaN to 0.
fn whole(v: f64) -> i64 {
    v.round() as i64
}

fn count(v: f64) -> i32 {
    v.round() as i32
}

fn finite(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}
