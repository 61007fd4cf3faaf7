//! Exposes an in-process fake of the Elasticsearch index API for use in integration tests.
//!
//! Only the endpoints used by the metrics sink are implemented: index creation, mapping updates
//! and indexing single documents. Everything sent to the server is kept in memory for inspection.
//!
//! ```
//! use kvbench_test::elasticsearch::FakeElasticsearch;
//!
//! #[tokio::main]
//! async fn main() {
//!    let server = FakeElasticsearch::new().await;
//!    let url = server.url();
//!    // point the sink at the URL...
//! }
//! ```

use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener};
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{post, put};
use serde_json::{Value, json};

#[derive(Debug, Default)]
struct Index {
    mapping: Option<Value>,
    documents: Vec<Value>,
}

#[derive(Debug, Default)]
struct Inner {
    indices: HashMap<String, Index>,
    reject_documents: bool,
    authorization: Option<String>,
}

type Shared = Arc<Mutex<Inner>>;

/// An in-process fake Elasticsearch server.
///
/// The server listens on a random available port on localhost and is shut down when dropped.
#[derive(Debug)]
pub struct FakeElasticsearch {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
    inner: Shared,
}

impl FakeElasticsearch {
    pub async fn new() -> Self {
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = TcpListener::bind(addr).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();

        let inner = Shared::default();
        let app = Router::new()
            .route("/{index}", put(create_index))
            .route("/{index}/_mapping", put(put_mapping))
            .route("/{index}/_doc", post(index_document))
            .with_state(inner.clone());

        let handle = tokio::spawn(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            handle,
            socket,
            inner,
        }
    }

    /// Returns the base URL of the server.
    pub fn url(&self) -> String {
        format!("http://localhost:{}", self.socket.port())
    }

    /// Makes the server answer every indexing request with `503 Service Unavailable`.
    pub fn reject_documents(&self, reject: bool) {
        self.inner.lock().unwrap().reject_documents = reject;
    }

    /// Returns `true` if the index has been created.
    pub fn has_index(&self, index: &str) -> bool {
        self.inner.lock().unwrap().indices.contains_key(index)
    }

    /// Returns the last mapping put for the index.
    pub fn mapping(&self, index: &str) -> Option<Value> {
        let inner = self.inner.lock().unwrap();
        inner.indices.get(index)?.mapping.clone()
    }

    /// Returns all documents indexed so far, in arrival order.
    pub fn documents(&self, index: &str) -> Vec<Value> {
        let inner = self.inner.lock().unwrap();
        inner
            .indices
            .get(index)
            .map(|index| index.documents.clone())
            .unwrap_or_default()
    }

    /// Returns the `Authorization` header of the most recent request.
    pub fn authorization(&self) -> Option<String> {
        self.inner.lock().unwrap().authorization.clone()
    }
}

impl Drop for FakeElasticsearch {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn remember_auth(inner: &mut Inner, headers: &HeaderMap) {
    inner.authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
}

async fn create_index(
    State(inner): State<Shared>,
    Path(index): Path<String>,
    headers: HeaderMap,
) -> Response {
    let mut inner = inner.lock().unwrap();
    remember_auth(&mut inner, &headers);

    if inner.indices.contains_key(&index) {
        let body = json!({
            "error": { "type": "resource_already_exists_exception", "index": index },
            "status": 400,
        });
        return (StatusCode::BAD_REQUEST, axum::Json(body)).into_response();
    }

    inner.indices.insert(index.clone(), Index::default());
    axum::Json(json!({ "acknowledged": true, "index": index })).into_response()
}

async fn put_mapping(
    State(inner): State<Shared>,
    Path(index): Path<String>,
    headers: HeaderMap,
    axum::Json(mapping): axum::Json<Value>,
) -> Response {
    let mut inner = inner.lock().unwrap();
    remember_auth(&mut inner, &headers);

    match inner.indices.get_mut(&index) {
        Some(entry) => {
            entry.mapping = Some(mapping);
            axum::Json(json!({ "acknowledged": true })).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn index_document(
    State(inner): State<Shared>,
    Path(index): Path<String>,
    headers: HeaderMap,
    axum::Json(document): axum::Json<Value>,
) -> Response {
    let mut inner = inner.lock().unwrap();
    remember_auth(&mut inner, &headers);

    if inner.reject_documents {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    // Elasticsearch creates missing indices on first write.
    let entry = inner.indices.entry(index.clone()).or_default();
    entry.documents.push(document);
    let seq_no = entry.documents.len() - 1;

    let body = json!({ "_index": index, "result": "created", "_seq_no": seq_no });
    (StatusCode::CREATED, axum::Json(body)).into_response()
}
