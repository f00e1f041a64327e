//! Fake search-store HTTP API for integration tests.
//!
//! Spins up a minimal `axum` server on a random TCP port bound to 127.0.0.1.
//! Serves the subset of the Meilisearch API the store client uses:
//! - `GET /health`
//! - `GET /indexes?offset&limit`: paged listing
//! - `GET /indexes/{uid}`: 404 with `index_not_found` when absent
//! - `POST /indexes`: create, answered with an enqueued task
//! - `POST /indexes/{uid}/documents`: add or replace by `@id`
//!
//! # Example
//!
//! ```rust,no_run
//! let api = FakeSearchApi::start().await.unwrap();
//! api.add_index("app").await;
//! let client = MeiliClient::new(&store_config(&api.base_url())).unwrap();
//! ```

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Mutex;

/// State shared between the router and test code.
#[derive(Default)]
struct ApiState {
    indexes: BTreeMap<String, Value>,
    documents: HashMap<String, BTreeMap<String, Value>>,
    create_calls: usize,
    document_posts: usize,
    task_uid: u64,
    unhealthy: bool,
    /// Applied to every response.
    delay: Duration,
    authorizations: Vec<String>,
}

type Shared = Arc<Mutex<ApiState>>;

/// Handle to the running fake search API.
pub struct FakeSearchApi {
    addr: SocketAddr,
    state: Shared,
}

impl FakeSearchApi {
    /// Start the server on a random port. Returns once it is listening.
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state: Shared = Arc::new(Mutex::new(ApiState::default()));

        let app = Router::new()
            .route("/health", get(health))
            .route("/indexes", get(list_indexes).post(create_index))
            .route("/indexes/{uid}", get(get_index))
            .route("/indexes/{uid}/documents", post(add_documents))
            .with_state(state.clone());

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Ok(Self { addr, state })
    }

    /// Base URL for the API (e.g. `http://127.0.0.1:PORT`).
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn add_index(&self, uid: &str) {
        let mut state = self.state.lock().await;
        state.indexes.insert(uid.to_string(), index_json(uid, "@id"));
    }

    pub async fn set_unhealthy(&self, unhealthy: bool) {
        self.state.lock().await.unhealthy = unhealthy;
    }

    pub async fn set_delay(&self, delay: Duration) {
        self.state.lock().await.delay = delay;
    }

    pub async fn index_uids(&self) -> Vec<String> {
        self.state.lock().await.indexes.keys().cloned().collect()
    }

    pub async fn primary_key(&self, uid: &str) -> Option<String> {
        self.state
            .lock()
            .await
            .indexes
            .get(uid)
            .and_then(|index| index["primaryKey"].as_str().map(str::to_string))
    }

    pub async fn create_calls(&self) -> usize {
        self.state.lock().await.create_calls
    }

    pub async fn document_posts(&self) -> usize {
        self.state.lock().await.document_posts
    }

    pub async fn documents(&self, uid: &str) -> BTreeMap<String, Value> {
        self.state
            .lock()
            .await
            .documents
            .get(uid)
            .cloned()
            .unwrap_or_default()
    }

    /// Every `Authorization` header received, in order.
    pub async fn authorizations(&self) -> Vec<String> {
        self.state.lock().await.authorizations.clone()
    }
}

fn index_json(uid: &str, primary_key: &str) -> Value {
    json!({
        "uid": uid,
        "primaryKey": primary_key,
        "createdAt": "2024-01-15T10:00:00Z",
        "updatedAt": "2024-01-15T10:00:00Z",
    })
}

fn task(state: &mut ApiState, uid: &str, kind: &str) -> Value {
    state.task_uid += 1;
    json!({
        "taskUid": state.task_uid,
        "indexUid": uid,
        "status": "enqueued",
        "type": kind,
        "enqueuedAt": "2024-01-15T10:00:00Z",
    })
}

/// Record the request and apply the configured delay.
async fn enter(state: &Shared, headers: &HeaderMap) {
    let delay = {
        let mut state = state.lock().await;
        if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
            state.authorizations.push(auth.to_string());
        }
        state.delay
    };
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

async fn health(State(state): State<Shared>, headers: HeaderMap) -> impl IntoResponse {
    enter(&state, &headers).await;
    if state.lock().await.unhealthy {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "message": "unavailable", "code": "unavailable" })),
        )
    } else {
        (StatusCode::OK, Json(json!({ "status": "available" })))
    }
}

#[derive(Deserialize)]
struct Page {
    #[serde(default)]
    offset: usize,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize { 20 }

async fn list_indexes(
    State(state): State<Shared>,
    Query(page): Query<Page>,
    headers: HeaderMap,
) -> impl IntoResponse {
    enter(&state, &headers).await;
    let state = state.lock().await;
    let results: Vec<Value> = state
        .indexes
        .values()
        .skip(page.offset)
        .take(page.limit)
        .cloned()
        .collect();
    Json(json!({
        "results": results,
        "offset": page.offset,
        "limit": page.limit,
        "total": state.indexes.len(),
    }))
}

async fn get_index(
    State(state): State<Shared>,
    Path(uid): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    enter(&state, &headers).await;
    let state = state.lock().await;
    match state.indexes.get(&uid) {
        Some(index) => (StatusCode::OK, Json(index.clone())),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "message": format!("Index `{uid}` not found."),
                "code": "index_not_found",
                "type": "invalid_request",
            })),
        ),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateIndex {
    uid: String,
    primary_key: Option<String>,
}

async fn create_index(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<CreateIndex>,
) -> impl IntoResponse {
    enter(&state, &headers).await;
    let mut state = state.lock().await;
    state.create_calls += 1;
    let primary_key = body.primary_key.unwrap_or_else(|| "id".to_string());
    state
        .indexes
        .entry(body.uid.clone())
        .or_insert_with(|| index_json(&body.uid, &primary_key));
    let task = task(&mut state, &body.uid, "indexCreation");
    (StatusCode::ACCEPTED, Json(task))
}

async fn add_documents(
    State(state): State<Shared>,
    Path(uid): Path<String>,
    headers: HeaderMap,
    Json(docs): Json<Vec<Value>>,
) -> impl IntoResponse {
    enter(&state, &headers).await;
    let mut state = state.lock().await;
    state.document_posts += 1;
    // The real store creates missing indexes implicitly on document writes.
    if !state.indexes.contains_key(&uid) {
        state.indexes.insert(uid.clone(), index_json(&uid, "@id"));
    }
    let stored = state.documents.entry(uid.clone()).or_default();
    for doc in docs {
        if let Some(id) = doc.get("@id").and_then(Value::as_str) {
            stored.insert(id.to_string(), doc);
        }
    }
    let task = task(&mut state, &uid, "documentAdditionOrUpdate");
    (StatusCode::ACCEPTED, Json(task))
}
