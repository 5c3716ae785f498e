/*!
Stub PuppetDB pour tests sans serveur réel

Sert les endpoints v4 utilisés par l'exporter sur 127.0.0.1 (port libre) :
- `GET /v4/nodes?query=...`
- `GET /v4/reports/{hash}/metrics`

Enregistre toutes les requêtes reçues et permet de simuler des pannes.
*/

use anyhow::Result;
use axum::extract::{Path, RawQuery, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub path: String,
    pub query: Option<String>,
}

#[derive(Default)]
struct StubState {
    nodes: Vec<Value>,
    reports: HashMap<String, Vec<Value>>,
    nodes_failure: Option<StatusCode>,
    failing_reports: HashSet<String>,
    requests: Vec<RecordedRequest>,
}

type SharedState = Arc<Mutex<StubState>>;

struct ServerTask(JoinHandle<()>);

impl Drop for ServerTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Serveur PuppetDB factice. Clonable, arrêté quand le dernier clone disparaît.
#[derive(Clone)]
pub struct StubPuppetDb {
    state: SharedState,
    addr: SocketAddr,
    _task: Arc<ServerTask>,
}

impl StubPuppetDb {
    /// Démarre le stub sur un port libre
    pub async fn start() -> Result<Self> {
        let state = SharedState::default();
        let app = Router::new()
            .route("/v4/nodes", get(nodes_handler))
            .route("/v4/reports/{hash}/metrics", get(report_metrics_handler))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                log::error!("[STUB] PuppetDB stub stopped: {}", e);
            }
        });

        log::info!("🧪 [STUB] PuppetDB listening on {}", addr);
        Ok(Self {
            state,
            addr,
            _task: Arc::new(ServerTask(task)),
        })
    }

    /// URL de base à donner au client (sans slash final)
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Remplace la liste des nœuds renvoyée par `/v4/nodes`
    pub fn set_nodes(&self, nodes: Vec<Value>) {
        self.state.lock().nodes = nodes;
    }

    /// Définit les métriques du rapport `hash`
    pub fn set_report_metrics<S: Into<String>>(&self, hash: S, metrics: Vec<Value>) {
        self.state.lock().reports.insert(hash.into(), metrics);
    }

    /// `/v4/nodes` répond avec `status` jusqu'à `restore_nodes`
    pub fn fail_nodes(&self, status: u16) {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        self.state.lock().nodes_failure = Some(status);
    }

    pub fn restore_nodes(&self) {
        self.state.lock().nodes_failure = None;
    }

    /// Les métriques du rapport `hash` répondent 500
    pub fn fail_report<S: Into<String>>(&self, hash: S) {
        self.state.lock().failing_reports.insert(hash.into());
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().requests.clone()
    }

    /// Nombre de requêtes dont le chemin commence par `prefix`
    pub fn count_requests(&self, prefix: &str) -> usize {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|r| r.path.starts_with(prefix))
            .count()
    }

    pub fn clear_requests(&self) {
        self.state.lock().requests.clear();
    }
}

async fn nodes_handler(State(state): State<SharedState>, RawQuery(query): RawQuery) -> Response {
    let mut state = state.lock();
    state.requests.push(RecordedRequest {
        path: "/v4/nodes".to_string(),
        query,
    });
    if let Some(status) = state.nodes_failure {
        log::warn!("[STUB] /v4/nodes failing with {}", status);
        return (status, Json(json!({ "error": "simulated failure" }))).into_response();
    }
    Json(Value::Array(state.nodes.clone())).into_response()
}

async fn report_metrics_handler(
    State(state): State<SharedState>,
    Path(hash): Path<String>,
    RawQuery(query): RawQuery,
) -> Response {
    let mut state = state.lock();
    state.requests.push(RecordedRequest {
        path: format!("/v4/reports/{}/metrics", hash),
        query,
    });
    if state.failing_reports.contains(&hash) {
        log::warn!("[STUB] report {} failing", hash);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "simulated failure" })),
        )
            .into_response();
    }
    match state.reports.get(&hash) {
        Some(metrics) => Json(Value::Array(metrics.clone())).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({ "error": "no such report" }))).into_response(),
    }
}
