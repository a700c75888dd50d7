//! HTTP surface of the interception network: the three endpoints the target
//! binaries talk to (`/replica`, `/message`, `/event`), plus the task that
//! serves them and a handle the orchestrator uses to tear it down.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::NetworkState;
use crate::error::{FuzzerError, Result};
use crate::schedule::NodeId;

/// A live interception network for one cluster run.
pub struct NetworkHandle {
    pub state: Arc<NetworkState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    server_task: JoinHandle<std::io::Result<()>>,
}

impl NetworkHandle {
    /// Signals the server to stop accepting connections and waits for it to
    /// drain, mirroring the teacher's `ClusterSupervisor::stop_all` shape:
    /// best-effort, logged on failure, never fatal to the surrounding run.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = self.server_task.await {
            warn!("interception network task panicked during shutdown: {e}");
        }
    }
}

/// Binds the interception network on `port` and starts serving in the
/// background. Returns once the listener is bound so the orchestrator can
/// reliably hand the port to target processes right after this returns.
pub async fn run_network(port: u16) -> Result<NetworkHandle> {
    let state = Arc::new(NetworkState::new());

    let app = Router::new()
        .route("/replica", post(handle_replica))
        .route("/message", post(handle_message))
        .route("/event", post(handle_event))
        .with_state(state.clone());

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| FuzzerError::NetworkBind { port, source })?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let server_task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    Ok(NetworkHandle {
        state,
        shutdown_tx: Some(shutdown_tx),
        server_task,
    })
}

fn ok_response() -> Json<Value> {
    Json(json!({"message": "Ok"}))
}

/// `POST /replica` — register or update one node's delivery address.
///
/// Takes a raw [`Value`] rather than a typed body: a malformed or
/// partial registration must never fail the request (§4.2's "must never
/// observe the fuzzer rejecting a POST"), so parsing is best-effort and
/// any failure just drops the registration. `id` arrives as either a JSON
/// string or number depending on the target's call site; both are
/// accepted and normalized to a [`NodeId`].
async fn handle_replica(State(state): State<Arc<NetworkState>>, Json(body): Json<Value>) -> Json<Value> {
    let parsed = body.get("id").and_then(|id| match id {
        Value::Number(n) => n.as_u64().map(|n| n as NodeId),
        Value::String(s) => s.parse().ok(),
        _ => None,
    });
    match (parsed, body.get("addr").and_then(Value::as_str)) {
        (Some(id), Some(addr)) => state.register_replica(id, addr.to_string()),
        _ => debug!("dropped malformed /replica registration: {body}"),
    }
    ok_response()
}

/// `POST /message` — enqueue one intercepted message and record a
/// `SendMessage` event, per `spec.md` §4.2.
async fn handle_message(State(state): State<Arc<NetworkState>>, Json(body): Json<Value>) -> Json<Value> {
    match serde_json::from_value(body.clone()) {
        Ok(msg) => state.enqueue_message(msg),
        Err(e) => debug!("dropped malformed /message body: {e}"),
    }
    ok_response()
}

/// `POST /event` — the body is a JSON-encoded JSON string (double decode),
/// per `spec.md` §4.2 and §9's design note.
async fn handle_event(State(state): State<Arc<NetworkState>>, Json(body): Json<String>) -> Json<Value> {
    match serde_json::from_str::<Value>(&body) {
        Ok(raw) => {
            if let Some(event) = state.map_raw_event(&raw) {
                state.record_event(event);
            }
        }
        Err(e) => debug!("dropped malformed /event body: {e}"),
    }
    ok_response()
}
