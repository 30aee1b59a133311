//! Repository for the `vms` table.

use sqlx::PgPool;
use vmwatch_core::types::DbId;

use crate::models::vm::{CreateVm, SshCredentials, Vm};

/// Column list for `vms` SELECT queries (secrets and credentials excluded).
const COLUMNS: &str = "id, name, metadata, metadata_updated_at, created_at, updated_at";

/// Column list for the stored SSH credential bundle.
const SSH_COLUMNS: &str =
    "ssh_host, ssh_port, ssh_username, ssh_password, ssh_private_key, ssh_passphrase";

/// Provides query operations for VM records.
pub struct VmRepo;

impl VmRepo {
    /// Insert a new VM, returning the created row.
    pub async fn create(pool: &PgPool, input: &CreateVm) -> Result<Vm, sqlx::Error> {
        let query = format!(
            "INSERT INTO vms (name, agent_secret_hash) VALUES ($1, $2) RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Vm>(&query)
            .bind(&input.name)
            .bind(&input.agent_secret_hash)
            .fetch_one(pool)
            .await
    }

    /// Find a VM by id.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Vm>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM vms WHERE id = $1");
        sqlx::query_as::<_, Vm>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Find the VM whose agent secret hashes to `secret_hash`.
    pub async fn find_by_secret_hash(
        pool: &PgPool,
        secret_hash: &str,
    ) -> Result<Option<Vm>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM vms WHERE agent_secret_hash = $1");
        sqlx::query_as::<_, Vm>(&query)
            .bind(secret_hash)
            .fetch_optional(pool)
            .await
    }

    /// Replace the agent-reported metadata. Returns `true` if the VM exists.
    pub async fn update_metadata(
        pool: &PgPool,
        id: DbId,
        metadata: &serde_json::Value,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE vms SET metadata = $2, metadata_updated_at = NOW(), updated_at = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .bind(metadata)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Store the SSH credential bundle for a VM.
    pub async fn set_ssh_credentials(
        pool: &PgPool,
        id: DbId,
        creds: &SshCredentials,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE vms SET ssh_host = $2, ssh_port = $3, ssh_username = $4,
                            ssh_password = $5, ssh_private_key = $6, ssh_passphrase = $7,
                            updated_at = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .bind(&creds.host)
        .bind(creds.port)
        .bind(&creds.username)
        .bind(&creds.password)
        .bind(&creds.private_key)
        .bind(&creds.passphrase)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Load the SSH credentials for a VM.
    ///
    /// Returns `None` when the VM is missing, has no host/user, or has
    /// neither a password nor a private key.
    pub async fn ssh_credentials(
        pool: &PgPool,
        id: DbId,
    ) -> Result<Option<SshCredentials>, sqlx::Error> {
        let query = format!(
            "SELECT {SSH_COLUMNS} FROM vms
             WHERE id = $1 AND ssh_host IS NOT NULL AND ssh_username IS NOT NULL"
        );
        let creds = sqlx::query_as::<_, SshCredentials>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(creds.filter(SshCredentials::has_secret))
    }
}
