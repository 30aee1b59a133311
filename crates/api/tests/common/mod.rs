#![allow(dead_code)]

pub mod ssh_server;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use http_body_util::BodyExt;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use vmwatch_api::auth::jwt::{generate_access_token, JwtConfig};
use vmwatch_api::config::ServerConfig;
use vmwatch_api::router::build_app_router;
use vmwatch_api::state::AppState;
use vmwatch_api::store::MonitorStore;
use vmwatch_api::ws::terminal::SshConfig;
use vmwatch_api::ws::Fabric;
use vmwatch_core::protocol::encode_frame;
use vmwatch_core::types::DbId;
use vmwatch_db::models::vm::{SshCredentials, Vm};
use vmwatch_db::models::vm_metric::{MetricsSample, VmMetric};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const TEST_JWT_SECRET: &str = "integration-test-secret";

/// How long a test waits for any single frame.
const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
        heartbeat_interval_secs: 30,
        metrics_retention_hours: 168,
        terminal_ping_interval_secs: 30,
        jwt: JwtConfig {
            secret: TEST_JWT_SECRET.to_string(),
            access_token_expiry_mins: 15,
        },
        ssh: SshConfig {
            connect_timeout_secs: 2,
            ready_timeout_secs: 2,
            ..SshConfig::default()
        },
    }
}

/// A valid session token for `user_id`.
pub fn user_token(user_id: DbId) -> String {
    generate_access_token(user_id, "viewer", &test_config().jwt).expect("token")
}

// ---------------------------------------------------------------------------
// In-memory collaborator
// ---------------------------------------------------------------------------

struct VmRecord {
    vm: Vm,
    secret: String,
    ssh: Option<SshCredentials>,
}

#[derive(Default)]
struct Tables {
    vms: HashMap<DbId, VmRecord>,
    pages: HashMap<DbId, Vec<DbId>>,
    metrics: Vec<VmMetric>,
}

/// [`MonitorStore`] over plain maps. Secrets are compared as given.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_vm(&self, id: DbId, secret: &str) {
        let now = Utc::now();
        let vm = Vm {
            id,
            name: format!("vm-{id}"),
            metadata: None,
            metadata_updated_at: None,
            created_at: now,
            updated_at: now,
        };
        self.tables.lock().unwrap().vms.insert(
            id,
            VmRecord {
                vm,
                secret: secret.to_string(),
                ssh: None,
            },
        );
    }

    pub fn set_ssh(&self, id: DbId, creds: SshCredentials) {
        if let Some(record) = self.tables.lock().unwrap().vms.get_mut(&id) {
            record.ssh = Some(creds);
        }
    }

    pub fn add_page(&self, page_id: DbId, vm_ids: &[DbId]) {
        self.tables
            .lock()
            .unwrap()
            .pages
            .insert(page_id, vm_ids.to_vec());
    }

    pub fn metric_count(&self) -> usize {
        self.tables.lock().unwrap().metrics.len()
    }
}

#[async_trait]
impl MonitorStore for MemoryStore {
    async fn find_vm_by_secret(&self, secret: &str) -> Result<Option<Vm>, sqlx::Error> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .vms
            .values()
            .find(|r| r.secret == secret)
            .map(|r| r.vm.clone()))
    }

    async fn find_vm_by_id(&self, id: DbId) -> Result<Option<Vm>, sqlx::Error> {
        Ok(self.tables.lock().unwrap().vms.get(&id).map(|r| r.vm.clone()))
    }

    async fn insert_metrics(&self, sample: &MetricsSample) -> Result<VmMetric, sqlx::Error> {
        let mut tables = self.tables.lock().unwrap();
        let row = VmMetric {
            id: tables.metrics.len() as DbId + 1,
            vm_id: sample.vm_id,
            recorded_at: sample.recorded_at,
            uptime: sample.uptime,
            cpu_usage: sample.cpu_usage.to_string(),
            memory_used: sample.memory_used,
            memory_total: sample.memory_total,
            swap_used: sample.swap_used,
            swap_total: sample.swap_total,
            disk_used: sample.disk_used,
            disk_total: sample.disk_total,
            disk_read: sample.disk_read,
            disk_write: sample.disk_write,
            network_in: sample.network_in,
            network_out: sample.network_out,
            tcp_connections: sample.tcp_connections,
            udp_connections: sample.udp_connections,
            process_count: sample.process_count,
            load_1: sample.load_1.to_string(),
            load_5: sample.load_5.to_string(),
            load_15: sample.load_15.to_string(),
            created_at: Utc::now(),
        };
        tables.metrics.push(row.clone());
        Ok(row)
    }

    async fn update_vm_metadata(&self, id: DbId, metadata: &Value) -> Result<(), sqlx::Error> {
        if let Some(record) = self.tables.lock().unwrap().vms.get_mut(&id) {
            record.vm.metadata = Some(metadata.clone());
            record.vm.metadata_updated_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn resolve_page_vm_ids(&self, page_id: DbId) -> Result<Vec<DbId>, sqlx::Error> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .pages
            .get(&page_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_vm_ssh_credentials(
        &self,
        id: DbId,
    ) -> Result<Option<SshCredentials>, sqlx::Error> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .vms
            .get(&id)
            .and_then(|r| r.ssh.clone())
            .filter(SshCredentials::has_secret))
    }

    async fn list_metrics(
        &self,
        vm_ids: &[DbId],
        limit: Option<i64>,
    ) -> Result<Vec<VmMetric>, sqlx::Error> {
        let mut rows: Vec<VmMetric> = self
            .tables
            .lock()
            .unwrap()
            .metrics
            .iter()
            .filter(|m| vm_ids.contains(&m.vm_id))
            .cloned()
            .collect();
        rows.sort_by(|a, b| (b.recorded_at, b.id).cmp(&(a.recorded_at, a.id)));
        if let Some(limit) = limit {
            rows.truncate(limit.max(0) as usize);
        }
        Ok(rows)
    }

    async fn health_check(&self) -> Result<(), sqlx::Error> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// A running server bound to an ephemeral port.
pub struct TestApp {
    pub addr: SocketAddr,
    pub state: AppState,
    pub store: Arc<MemoryStore>,
}

impl TestApp {
    pub fn fabric(&self) -> &Arc<Fabric> {
        &self.state.fabric
    }

    pub fn ws_url(&self, path_and_query: &str) -> String {
        format!("ws://{}{}", self.addr, path_and_query)
    }

    /// A router over the same state, for one-shot HTTP requests.
    pub fn router(&self) -> Router {
        build_app_router(self.state.clone(), &self.state.config)
    }
}

pub async fn spawn_app(store: Arc<MemoryStore>) -> TestApp {
    spawn_app_with_config(store, test_config()).await
}

pub async fn spawn_app_with_config(store: Arc<MemoryStore>, config: ServerConfig) -> TestApp {
    let state = AppState {
        store: store.clone(),
        config: Arc::new(config.clone()),
        fabric: Fabric::new(),
        shutdown: CancellationToken::new(),
    };
    let app = build_app_router(state.clone(), &config);

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server");
    });

    TestApp { addr, state, store }
}

// ---------------------------------------------------------------------------
// HTTP helpers
// ---------------------------------------------------------------------------

pub async fn get_with_token(app: Router, uri: &str, token: &str) -> Response<Body> {
    let request = Request::builder()
        .uri(uri)
        .header("authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

// ---------------------------------------------------------------------------
// WebSocket helpers
// ---------------------------------------------------------------------------

pub async fn connect(url: &str) -> WsClient {
    let (ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .expect("websocket connect");
    ws
}

pub async fn connect_with_token(url: &str, token: &str) -> WsClient {
    let mut request = url.into_client_request().unwrap();
    request.headers_mut().insert(
        "authorization",
        HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
    );
    let (ws, _) = tokio_tungstenite::connect_async(request)
        .await
        .expect("websocket connect");
    ws
}

pub async fn send_frame(ws: &mut WsClient, kind: &str, data: Value) {
    let bytes = encode_frame(kind, &data).expect("encode frame");
    ws.send(Message::Binary(bytes)).await.expect("send frame");
}

/// Next non-control message, failing the test after [`RECV_TIMEOUT`].
pub async fn next_message(ws: &mut WsClient) -> Option<Message> {
    loop {
        let next = tokio::time::timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for a frame");
        match next {
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(message)) => return Some(message),
            Some(Err(_)) | None => return None,
        }
    }
}

/// Next binary frame decoded from MessagePack.
pub async fn recv_frame(ws: &mut WsClient) -> Value {
    match next_message(ws).await {
        Some(Message::Binary(bytes)) => rmp_serde::from_slice(&bytes).expect("decode frame"),
        other => panic!("expected a binary frame, got {other:?}"),
    }
}

/// Next text frame.
pub async fn recv_text(ws: &mut WsClient) -> String {
    match next_message(ws).await {
        Some(Message::Text(text)) => text,
        other => panic!("expected a text frame, got {other:?}"),
    }
}

/// Whether the peer closes the connection within [`RECV_TIMEOUT`].
pub async fn closes(ws: &mut WsClient) -> bool {
    matches!(next_message(ws).await, Some(Message::Close(_)) | None)
}

/// Poll `check` until it holds or a few seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

/// A metrics payload as an agent would send it.
pub fn metrics_payload(cpu_usage: f64) -> Value {
    serde_json::json!({
        "uptime": 3600,
        "system": {
            "cpuUsage": cpu_usage,
            "memoryUsed": 1024,
            "memoryTotal": 4096,
            "swapUsed": 0,
            "swapTotal": 512,
            "processCount": 120,
            "loadAvg": { "one": 0.5, "five": 0.25, "fifteen": 0.1 }
        },
        "network": { "uploadTraffic": 10, "downloadTraffic": 20, "tcpCount": 3, "udpCount": 1 },
        "disk": { "spaceUsed": 100, "spaceTotal": 200, "read": 5, "write": 6 }
    })
}

/// Send a frame the agent endpoint rejects and wait for the error reply.
///
/// Frames on one connection are handled in order, so once the reply arrives
/// every earlier frame has been fully processed.
pub async fn agent_barrier(agent: &mut WsClient) {
    send_frame(agent, "barrier", Value::Null).await;
    let reply = recv_frame(agent).await;
    assert_eq!(reply["type"], "error");
}
