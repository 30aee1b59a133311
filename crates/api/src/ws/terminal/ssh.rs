//! SSH leg of the terminal bridge (russh client).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use russh::client::{self, Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect};
use tokio::time::timeout;
use vmwatch_db::models::vm::SshCredentials;

use crate::config::env_or;
use crate::ws::terminal::input::TerminalSize;

const TERM: &str = "xterm-256color";

/// Timeouts and keepalive for outbound SSH connections.
#[derive(Debug, Clone)]
pub struct SshConfig {
    /// TCP connect plus key exchange (default: 10).
    pub connect_timeout_secs: u64,
    /// Authentication and shell setup (default: 20).
    pub ready_timeout_secs: u64,
    /// Interval between SSH keepalives (default: 15).
    pub keepalive_interval_secs: u64,
    /// Unanswered keepalives before the connection is dropped (default: 3).
    pub keepalive_max: usize,
}

impl SshConfig {
    /// Load SSH settings from `SSH_CONNECT_TIMEOUT_SECS`, `SSH_READY_TIMEOUT_SECS`,
    /// `SSH_KEEPALIVE_INTERVAL_SECS` and `SSH_KEEPALIVE_MAX`.
    pub fn from_env() -> Self {
        Self {
            connect_timeout_secs: env_or("SSH_CONNECT_TIMEOUT_SECS", 10),
            ready_timeout_secs: env_or("SSH_READY_TIMEOUT_SECS", 20),
            keepalive_interval_secs: env_or("SSH_KEEPALIVE_INTERVAL_SECS", 15),
            keepalive_max: env_or("SSH_KEEPALIVE_MAX", 3),
        }
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            ready_timeout_secs: 20,
            keepalive_interval_secs: 15,
            keepalive_max: 3,
        }
    }
}

/// Failure to establish or drive the SSH session.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("SSH authentication failed: {0}")]
    AuthFailed(String),

    #[error("SSH authentication failed: invalid private key: {0}")]
    BadKey(#[from] russh_keys::Error),

    #[error("{stage} timed out after {secs}s")]
    Timeout { stage: &'static str, secs: u64 },

    #[error("{0}")]
    Ssh(#[from] russh::Error),
}

impl BridgeError {
    /// The `[ERROR] ...` line shown to the terminal user.
    pub fn user_message(&self) -> String {
        match self {
            Self::AuthFailed(_) | Self::BadKey(_) => format!("[ERROR] {self}"),
            Self::Ssh(russh::Error::NotAuthenticated | russh::Error::NoAuthMethod) => {
                format!("[ERROR] SSH authentication failed: {self}")
            }
            _ => format!("[ERROR] SSH connection error: {self}"),
        }
    }

    /// The line shown when input could not be delivered to a running shell.
    pub fn write_failure_line(&self) -> String {
        format!("[ERROR] Failed to write to terminal: {self}\r\n")
    }
}

/// Host keys are not pinned; VMs are reached by the address stored for them.
struct ClientHandler;

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// What the shell produced.
#[derive(Debug)]
pub enum SshEvent {
    /// stdout or stderr bytes.
    Output(Bytes),
    /// The channel or the connection is gone.
    Closed,
}

/// An interactive shell on a remote host.
pub struct SshSession {
    handle: Handle<ClientHandler>,
    channel: Channel<Msg>,
}

impl SshSession {
    /// Connect, authenticate and start a PTY shell of the given size.
    pub async fn open(
        creds: &SshCredentials,
        size: TerminalSize,
        config: &SshConfig,
    ) -> Result<Self, BridgeError> {
        let ssh_config = Arc::new(client::Config {
            inactivity_timeout: None,
            keepalive_interval: Some(Duration::from_secs(config.keepalive_interval_secs)),
            keepalive_max: config.keepalive_max,
            ..Default::default()
        });

        let addr = (creds.host.clone(), creds.port());
        let mut handle = timeout(
            Duration::from_secs(config.connect_timeout_secs),
            client::connect(ssh_config, addr, ClientHandler),
        )
        .await
        .map_err(|_| BridgeError::Timeout {
            stage: "SSH connect",
            secs: config.connect_timeout_secs,
        })??;

        let channel = timeout(
            Duration::from_secs(config.ready_timeout_secs),
            start_shell(&mut handle, creds, size),
        )
        .await
        .map_err(|_| BridgeError::Timeout {
            stage: "SSH handshake",
            secs: config.ready_timeout_secs,
        })??;

        Ok(Self { handle, channel })
    }

    /// Wait for the next chunk of shell output.
    pub async fn next_event(&mut self) -> SshEvent {
        loop {
            match self.channel.wait().await {
                Some(ChannelMsg::Data { data }) => {
                    return SshEvent::Output(Bytes::copy_from_slice(&data));
                }
                Some(ChannelMsg::ExtendedData { data, .. }) => {
                    return SshEvent::Output(Bytes::copy_from_slice(&data));
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    tracing::debug!(exit_status, "Remote shell exited");
                }
                Some(ChannelMsg::Close) | None => return SshEvent::Closed,
                Some(_) => {}
            }
        }
    }

    pub async fn write(&mut self, bytes: &[u8]) -> Result<(), BridgeError> {
        self.channel.data(bytes).await?;
        Ok(())
    }

    pub async fn resize(&mut self, size: TerminalSize) -> Result<(), BridgeError> {
        self.channel
            .window_change(size.cols, size.rows, size.pixel_width(), size.pixel_height())
            .await?;
        Ok(())
    }

    /// End the channel and the connection. Errors are ignored; the peer may
    /// already be gone.
    pub async fn close(self) {
        let _ = self.channel.eof().await;
        let _ = self.channel.close().await;
        let _ = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await;
    }
}

async fn start_shell(
    handle: &mut Handle<ClientHandler>,
    creds: &SshCredentials,
    size: TerminalSize,
) -> Result<Channel<Msg>, BridgeError> {
    authenticate(handle, creds).await?;

    let channel = handle.channel_open_session().await?;
    channel
        .request_pty(
            false,
            TERM,
            size.cols,
            size.rows,
            size.pixel_width(),
            size.pixel_height(),
            &[],
        )
        .await?;
    channel.request_shell(false).await?;
    Ok(channel)
}

/// Try the stored key first, then the stored password.
async fn authenticate(
    handle: &mut Handle<ClientHandler>,
    creds: &SshCredentials,
) -> Result<(), BridgeError> {
    let user = creds.username.as_str();
    let password = non_empty(&creds.password);
    let mut rejected = Vec::new();

    if let Some(pem) = non_empty(&creds.private_key) {
        match russh_keys::decode_secret_key(pem, non_empty(&creds.passphrase)) {
            Ok(key) => {
                if handle.authenticate_publickey(user, Arc::new(key)).await? {
                    return Ok(());
                }
                rejected.push("key");
            }
            Err(e) if password.is_none() => return Err(BridgeError::BadKey(e)),
            Err(e) => tracing::warn!(error = %e, "Stored private key unusable, trying password"),
        }
    }

    if let Some(password) = password {
        if handle.authenticate_password(user, password).await? {
            return Ok(());
        }
        rejected.push("password");
    }

    Err(BridgeError::AuthFailed(format!(
        "{} rejected for user {user}",
        rejected.join(" and ")
    )))
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}
