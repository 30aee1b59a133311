use crate::auth::jwt::JwtConfig;
use crate::ws::terminal::SshConfig;

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// How long background tasks get to stop after the server drains (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// Interval between fabric heartbeat pings (default: `30`).
    pub heartbeat_interval_secs: u64,
    /// Age after which `vm_metrics` rows are purged (default: `168`).
    pub metrics_retention_hours: i64,
    /// Interval between WebSocket pings on terminal sessions (default: `30`).
    pub terminal_ping_interval_secs: u64,
    /// JWT token configuration (secret, expiry).
    pub jwt: JwtConfig,
    /// SSH leg timeouts for the terminal bridge.
    pub ssh: SshConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                       | Default                 |
    /// |-------------------------------|-------------------------|
    /// | `HOST`                        | `0.0.0.0`               |
    /// | `PORT`                        | `3000`                  |
    /// | `CORS_ORIGINS`                | `http://localhost:5173` |
    /// | `REQUEST_TIMEOUT_SECS`        | `30`                    |
    /// | `SHUTDOWN_TIMEOUT_SECS`       | `30`                    |
    /// | `HEARTBEAT_INTERVAL_SECS`     | `30`                    |
    /// | `METRICS_RETENTION_HOURS`     | `168`                   |
    /// | `TERMINAL_PING_INTERVAL_SECS` | `30`                    |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs: env_or("REQUEST_TIMEOUT_SECS", 30),
            shutdown_timeout_secs: env_or("SHUTDOWN_TIMEOUT_SECS", 30),
            heartbeat_interval_secs: env_or("HEARTBEAT_INTERVAL_SECS", 30),
            metrics_retention_hours: env_or("METRICS_RETENTION_HOURS", 168),
            terminal_ping_interval_secs: env_or("TERMINAL_PING_INTERVAL_SECS", 30),
            jwt: JwtConfig::from_env(),
            ssh: SshConfig::from_env(),
        }
    }
}

/// Parse an optional numeric env var, panicking on a malformed value.
pub(crate) fn env_or<T>(name: &str, default: T) -> T
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|e| panic!("{name} must be a valid number: {e}")),
        Err(_) => default,
    }
}
