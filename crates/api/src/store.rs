//! Collaborator seam between the WebSocket endpoints and persistence.
//!
//! Endpoints only see [`MonitorStore`]; production wires in
//! [`PgMonitorStore`], tests substitute an in-memory implementation.

use async_trait::async_trait;
use vmwatch_core::secret::hash_agent_secret;
use vmwatch_core::types::DbId;
use vmwatch_db::models::vm::{SshCredentials, Vm};
use vmwatch_db::models::vm_metric::{MetricsSample, VmMetric};
use vmwatch_db::repositories::{PageRepo, VmMetricRepo, VmRepo};
use vmwatch_db::DbPool;

#[async_trait]
pub trait MonitorStore: Send + Sync {
    /// Look up the VM an agent secret belongs to. The raw secret is never stored.
    async fn find_vm_by_secret(&self, secret: &str) -> Result<Option<Vm>, sqlx::Error>;

    async fn find_vm_by_id(&self, id: DbId) -> Result<Option<Vm>, sqlx::Error>;

    /// Persist one sample, returning the stored row with server-assigned fields.
    async fn insert_metrics(&self, sample: &MetricsSample) -> Result<VmMetric, sqlx::Error>;

    async fn update_vm_metadata(
        &self,
        id: DbId,
        metadata: &serde_json::Value,
    ) -> Result<(), sqlx::Error>;

    /// Member VMs of a page; empty when the page is missing or empty.
    async fn resolve_page_vm_ids(&self, page_id: DbId) -> Result<Vec<DbId>, sqlx::Error>;

    async fn get_vm_ssh_credentials(
        &self,
        id: DbId,
    ) -> Result<Option<SshCredentials>, sqlx::Error>;

    /// Newest-first metrics across `vm_ids`; `limit` caps the row count when set.
    async fn list_metrics(
        &self,
        vm_ids: &[DbId],
        limit: Option<i64>,
    ) -> Result<Vec<VmMetric>, sqlx::Error>;

    async fn health_check(&self) -> Result<(), sqlx::Error>;
}

/// [`MonitorStore`] backed by PostgreSQL.
#[derive(Clone)]
pub struct PgMonitorStore {
    pool: DbPool,
}

impl PgMonitorStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MonitorStore for PgMonitorStore {
    async fn find_vm_by_secret(&self, secret: &str) -> Result<Option<Vm>, sqlx::Error> {
        VmRepo::find_by_secret_hash(&self.pool, &hash_agent_secret(secret)).await
    }

    async fn find_vm_by_id(&self, id: DbId) -> Result<Option<Vm>, sqlx::Error> {
        VmRepo::find_by_id(&self.pool, id).await
    }

    async fn insert_metrics(&self, sample: &MetricsSample) -> Result<VmMetric, sqlx::Error> {
        VmMetricRepo::insert(&self.pool, sample).await
    }

    async fn update_vm_metadata(
        &self,
        id: DbId,
        metadata: &serde_json::Value,
    ) -> Result<(), sqlx::Error> {
        if !VmRepo::update_metadata(&self.pool, id, metadata).await? {
            tracing::warn!(vm_id = id, "Metadata update for missing VM");
        }
        Ok(())
    }

    async fn resolve_page_vm_ids(&self, page_id: DbId) -> Result<Vec<DbId>, sqlx::Error> {
        PageRepo::vm_ids(&self.pool, page_id).await
    }

    async fn get_vm_ssh_credentials(
        &self,
        id: DbId,
    ) -> Result<Option<SshCredentials>, sqlx::Error> {
        VmRepo::ssh_credentials(&self.pool, id).await
    }

    async fn list_metrics(
        &self,
        vm_ids: &[DbId],
        limit: Option<i64>,
    ) -> Result<Vec<VmMetric>, sqlx::Error> {
        VmMetricRepo::list_for_vms(&self.pool, vm_ids, limit).await
    }

    async fn health_check(&self) -> Result<(), sqlx::Error> {
        vmwatch_db::health_check(&self.pool).await
    }
}
