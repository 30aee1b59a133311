//! VM records and their stored SSH credentials.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use vmwatch_core::types::{DbId, Timestamp};

/// Default SSH port when none is stored.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// A VM row from the `vms` table (secret and credential columns excluded).
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Vm {
    pub id: DbId,
    pub name: String,
    /// Last `vm_info` payload reported by the agent.
    pub metadata: Option<serde_json::Value>,
    pub metadata_updated_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for registering a VM.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateVm {
    pub name: String,
    /// SHA-256 hex digest of the agent secret.
    pub agent_secret_hash: String,
}

/// SSH connection details stored for a VM.
#[derive(Clone, FromRow)]
pub struct SshCredentials {
    #[sqlx(rename = "ssh_host")]
    pub host: String,
    #[sqlx(rename = "ssh_port")]
    pub port: i32,
    #[sqlx(rename = "ssh_username")]
    pub username: String,
    #[sqlx(rename = "ssh_password")]
    pub password: Option<String>,
    #[sqlx(rename = "ssh_private_key")]
    pub private_key: Option<String>,
    #[sqlx(rename = "ssh_passphrase")]
    pub passphrase: Option<String>,
}

impl SshCredentials {
    /// Whether a password or a private key is available.
    pub fn has_secret(&self) -> bool {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());
        present(&self.password) || present(&self.private_key)
    }

    /// The port as a `u16`, falling back to 22 for out-of-range values.
    pub fn port(&self) -> u16 {
        u16::try_from(self.port)
            .ok()
            .filter(|p| *p != 0)
            .unwrap_or(DEFAULT_SSH_PORT)
    }
}

impl std::fmt::Debug for SshCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshCredentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}
