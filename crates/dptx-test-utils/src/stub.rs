//! Stub configuration service served over real HTTP.
//!
//! [`StubDataPlane`] binds `127.0.0.1:0` and emulates the remote service's
//! version counter, transaction table and staged writes:
//!
//! - `GET /configuration/version`
//! - `POST /transactions?version=<V>` (409 `version mismatch` when stale)
//! - `PUT /transactions/{id}` (406 when outdated, 400 when unknown)
//! - `DELETE /transactions/{id}` (404 when unknown)
//! - any other path with `?transaction_id=<id>` is a staged write
//!
//! Tests can script one-shot responses per endpoint, which are served
//! before the emulated behavior, and inspect every request received.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use serde_json::{Value, json};
use tokio::sync::oneshot;

/// Endpoint family a request was routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// `GET /configuration/version`.
    Version,
    /// `POST /transactions`.
    Create,
    /// `PUT /transactions/{id}`.
    Commit,
    /// `DELETE /transactions/{id}`.
    Delete,
    /// A write scoped by `transaction_id`.
    Stage,
}

/// How the version endpoint encodes the version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VersionShape {
    /// A bare JSON integer: `42`.
    #[default]
    Bare,
    /// `{"version": 42}`.
    Integer,
    /// `{"version": 42.0}`.
    Float,
    /// `{"version": "42"}`.
    Text,
}

/// A canned response served once by an endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedResponse {
    /// HTTP status code.
    pub status: u16,
    /// Raw response body.
    pub body: String,
    /// Delay before the response is sent.
    pub delay: Option<Duration>,
}

impl ScriptedResponse {
    /// A structured error body `{"code": status, "message": message}`.
    pub fn error(status: u16, message: &str) -> Self {
        Self::raw(status, json!({ "code": status, "message": message }).to_string())
    }

    /// A response with an arbitrary body.
    pub fn raw(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            delay: None,
        }
    }

    /// Delays the response.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Lifecycle state of a stub transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Accepting staged writes.
    Open,
    /// Committed.
    Committed,
    /// Deleted.
    Deleted,
}

/// One request received by the stub.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestRecord {
    /// Endpoint family.
    pub endpoint: Endpoint,
    /// HTTP method.
    pub method: String,
    /// Request path.
    pub path: String,
    /// Decoded query parameters.
    pub query: HashMap<String, String>,
    /// JSON body, if one was sent.
    pub body: Option<Value>,
    /// Whether an `Authorization` header was present.
    pub authorized: bool,
}

impl RequestRecord {
    /// Returns the transaction id the request targeted, if any.
    pub fn transaction_id(&self) -> Option<&str> {
        match self.endpoint {
            Endpoint::Commit | Endpoint::Delete => self.path.rsplit('/').next(),
            _ => self.query.get("transaction_id").map(String::as_str),
        }
    }
}

#[derive(Debug)]
struct StubTransaction {
    base_version: u64,
    status: TransactionStatus,
    writes: Vec<RequestRecord>,
}

#[derive(Debug, Default)]
struct StubState {
    version: u64,
    next_id: u64,
    shape: VersionShape,
    transactions: HashMap<String, StubTransaction>,
    order: Vec<String>,
    scripted: HashMap<Endpoint, VecDeque<ScriptedResponse>>,
    requests: Vec<RequestRecord>,
    committed_writes: Vec<RequestRecord>,
}

type SharedState = Arc<Mutex<StubState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, StubState> {
    state.lock().expect("stub state poisoned")
}

/// In-process HTTP emulation of the remote configuration service.
pub struct StubDataPlane {
    state: SharedState,
    base_url: String,
    shutdown_tx: Option<oneshot::Sender<()>>,
    _task: tokio::task::JoinHandle<()>,
}

impl std::fmt::Debug for StubDataPlane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StubDataPlane")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl StubDataPlane {
    /// Starts a stub at version 1.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound.
    pub async fn start() -> std::io::Result<Self> {
        Self::start_at(1).await
    }

    /// Starts a stub at the given version on `127.0.0.1:0`.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound or its address read.
    pub async fn start_at(version: u64) -> std::io::Result<Self> {
        let state: SharedState = Arc::new(Mutex::new(StubState {
            version,
            ..StubState::default()
        }));

        let app = Router::new()
            .route("/configuration/version", get(read_version))
            .route("/transactions", post(create_transaction))
            .route(
                "/transactions/:id",
                put(commit_transaction).delete(delete_transaction),
            )
            .fallback(stage_write)
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr: SocketAddr = listener.local_addr()?;
        let base_url = format!("http://{addr}");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            let _ = server.await;
        });

        tracing::debug!(%base_url, version, "stub data plane listening");
        Ok(Self {
            state,
            base_url,
            shutdown_tx: Some(shutdown_tx),
            _task: task,
        })
    }

    /// Returns the server base URL (e.g., `http://127.0.0.1:12345`).
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Changes how the version endpoint encodes the version.
    pub fn set_version_shape(&self, shape: VersionShape) {
        lock(&self.state).shape = shape;
    }

    /// Returns the current version.
    pub fn version(&self) -> u64 {
        lock(&self.state).version
    }

    /// Advances the version as a concurrent writer would.
    pub fn bump_version(&self) -> u64 {
        let mut state = lock(&self.state);
        state.version += 1;
        state.version
    }

    /// Queues a one-shot response for the next request to `endpoint`.
    pub fn script(&self, endpoint: Endpoint, response: ScriptedResponse) {
        lock(&self.state)
            .scripted
            .entry(endpoint)
            .or_default()
            .push_back(response);
    }

    /// Returns every request received, in arrival order.
    pub fn requests(&self) -> Vec<RequestRecord> {
        lock(&self.state).requests.clone()
    }

    /// Returns how many requests reached `endpoint`.
    pub fn count(&self, endpoint: Endpoint) -> usize {
        lock(&self.state)
            .requests
            .iter()
            .filter(|r| r.endpoint == endpoint)
            .count()
    }

    /// Returns every transaction id created, in creation order.
    pub fn transaction_ids(&self) -> Vec<String> {
        lock(&self.state).order.clone()
    }

    /// Returns the state of a transaction, if it was ever created.
    pub fn transaction_status(&self, id: &str) -> Option<TransactionStatus> {
        lock(&self.state).transactions.get(id).map(|t| t.status)
    }

    /// Returns the writes published by committed transactions.
    pub fn committed_writes(&self) -> Vec<RequestRecord> {
        lock(&self.state).committed_writes.clone()
    }
}

impl Drop for StubDataPlane {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

fn json_response(status: StatusCode, body: String) -> Response {
    (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
}

fn error_response(status: StatusCode, message: &str) -> Response {
    json_response(
        status,
        json!({ "code": status.as_u16(), "message": message }).to_string(),
    )
}

/// Records the request and pops a scripted response, if one is queued.
fn receive(state: &SharedState, record: RequestRecord) -> Option<ScriptedResponse> {
    let mut state = lock(state);
    let endpoint = record.endpoint;
    state.requests.push(record);
    state
        .scripted
        .get_mut(&endpoint)
        .and_then(VecDeque::pop_front)
}

async fn serve_scripted(response: ScriptedResponse) -> Response {
    if let Some(delay) = response.delay {
        tokio::time::sleep(delay).await;
    }
    let status =
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    json_response(status, response.body)
}

fn record(
    endpoint: Endpoint,
    method: &Method,
    path: &str,
    query: HashMap<String, String>,
    headers: &HeaderMap,
    body: Option<Value>,
) -> RequestRecord {
    RequestRecord {
        endpoint,
        method: method.to_string(),
        path: path.to_string(),
        query,
        body,
        authorized: headers.contains_key(header::AUTHORIZATION),
    }
}

async fn read_version(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    let entry = record(
        Endpoint::Version,
        &Method::GET,
        "/configuration/version",
        HashMap::new(),
        &headers,
        None,
    );
    if let Some(response) = receive(&state, entry) {
        return serve_scripted(response).await;
    }

    let (version, shape) = {
        let state = lock(&state);
        (state.version, state.shape)
    };
    let body = match shape {
        VersionShape::Bare => version.to_string(),
        VersionShape::Integer => json!({ "version": version }).to_string(),
        VersionShape::Float => format!("{{\"version\":{version}.0}}"),
        VersionShape::Text => json!({ "version": version.to_string() }).to_string(),
    };
    json_response(StatusCode::OK, body)
}

async fn create_transaction(
    State(state): State<SharedState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let requested = query.get("version").cloned();
    let entry = record(
        Endpoint::Create,
        &Method::POST,
        "/transactions",
        query,
        &headers,
        None,
    );
    if let Some(response) = receive(&state, entry) {
        return serve_scripted(response).await;
    }

    let Some(requested) = requested else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "version or transaction not specified",
        );
    };

    let mut state = lock(&state);
    if requested != state.version.to_string() {
        return error_response(StatusCode::CONFLICT, "version mismatch");
    }

    state.next_id += 1;
    let id = format!("stub-tx-{}", state.next_id);
    let base_version = state.version;
    state.transactions.insert(
        id.clone(),
        StubTransaction {
            base_version,
            status: TransactionStatus::Open,
            writes: Vec::new(),
        },
    );
    state.order.push(id.clone());
    json_response(
        StatusCode::CREATED,
        json!({ "id": id, "_version": base_version, "status": "in_progress" }).to_string(),
    )
}

async fn commit_transaction(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let entry = record(
        Endpoint::Commit,
        &Method::PUT,
        &format!("/transactions/{id}"),
        HashMap::new(),
        &headers,
        None,
    );
    if let Some(response) = receive(&state, entry) {
        return serve_scripted(response).await;
    }

    let mut state = lock(&state);
    let current = state.version;
    let writes = match state.transactions.get_mut(&id) {
        Some(tx) if tx.status == TransactionStatus::Open => {
            if tx.base_version != current {
                return error_response(
                    StatusCode::NOT_ACCEPTABLE,
                    &format!(
                        "transaction {id} of version {} is outdated and cannot be committed",
                        tx.base_version
                    ),
                );
            }
            tx.status = TransactionStatus::Committed;
            std::mem::take(&mut tx.writes)
        }
        _ => return error_response(StatusCode::BAD_REQUEST, "transaction does not exist"),
    };

    state.version += 1;
    state.committed_writes.extend(writes);
    json_response(
        StatusCode::ACCEPTED,
        json!({ "id": id, "status": "success" }).to_string(),
    )
}

async fn delete_transaction(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let entry = record(
        Endpoint::Delete,
        &Method::DELETE,
        &format!("/transactions/{id}"),
        HashMap::new(),
        &headers,
        None,
    );
    if let Some(response) = receive(&state, entry) {
        return serve_scripted(response).await;
    }

    let mut state = lock(&state);
    match state.transactions.get_mut(&id) {
        Some(tx) if tx.status == TransactionStatus::Open => {
            tx.status = TransactionStatus::Deleted;
            tx.writes.clear();
            StatusCode::NO_CONTENT.into_response()
        }
        _ => error_response(StatusCode::NOT_FOUND, "transaction does not exist"),
    }
}

async fn stage_write(
    State(state): State<SharedState>,
    method: Method,
    uri: Uri,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let payload = serde_json::from_slice::<Value>(&body).ok();
    let transaction_id = query.get("transaction_id").cloned();
    let entry = record(
        Endpoint::Stage,
        &method,
        uri.path(),
        query,
        &headers,
        payload.clone(),
    );
    if let Some(response) = receive(&state, entry.clone()) {
        return serve_scripted(response).await;
    }

    let Some(transaction_id) = transaction_id else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "version or transaction not specified",
        );
    };

    let mut state = lock(&state);
    match state.transactions.get_mut(&transaction_id) {
        Some(tx) if tx.status == TransactionStatus::Open => {
            tx.writes.push(entry);
        }
        _ => return error_response(StatusCode::BAD_REQUEST, "transaction does not exist"),
    }

    match (method, payload) {
        (Method::DELETE, _) | (_, None) => StatusCode::NO_CONTENT.into_response(),
        (Method::POST, Some(payload)) => json_response(StatusCode::CREATED, payload.to_string()),
        (_, Some(payload)) => json_response(StatusCode::ACCEPTED, payload.to_string()),
    }
}
