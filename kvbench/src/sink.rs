//! Destinations for metrics records.
//!
//! The benchmark publishes one JSON document per iteration into a search index. The production
//! [`ElasticsearchSink`] talks to the Elasticsearch REST API, while [`MemorySink`] keeps
//! everything in memory for tests and dry runs.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use reqwest::{StatusCode, header};
use secrecy::{ExposeSecret, SecretBox};
use serde_json::{Value, json};
use thiserror::Error;

use crate::config::ConfigSecret;

/// The user agent sent with every request to the sink.
const USER_AGENT: &str = concat!("kvbench/", env!("CARGO_PKG_VERSION"));

/// Error type returned by [`Sink`] operations.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client")]
    Client(#[from] reqwest::Error),
    /// The request did not produce a response.
    #[error("request to {url} failed")]
    Transport {
        /// The URL of the failed request.
        url: String,
        /// The underlying transport error.
        #[source]
        cause: reqwest::Error,
    },
    /// The sink answered with a non-success status.
    #[error("request to {url} returned {status}")]
    Status {
        /// The URL of the failed request.
        url: String,
        /// The returned status code.
        status: StatusCode,
    },
    /// The sink is not accepting documents.
    #[error("sink is unavailable")]
    Unavailable,
}

/// Type alias for a sink shared between tasks.
pub type SharedSink = Arc<dyn Sink>;

/// A search index that metrics documents are published to.
#[async_trait::async_trait]
pub trait Sink: fmt::Debug + Send + Sync + 'static {
    /// Creates the index if it does not exist yet.
    async fn ensure_index(&self, index: &str) -> Result<(), SinkError>;

    /// Updates the field mapping of the index.
    async fn put_mapping(&self, index: &str, mapping: &Value) -> Result<(), SinkError>;

    /// Adds a single document to the index.
    async fn index_document(&self, index: &str, document: &Value) -> Result<(), SinkError>;
}

/// The mapping applied to the metrics index.
///
/// Timestamps are epoch milliseconds; without an explicit mapping they would be indexed as plain
/// numbers.
pub fn default_mapping() -> Value {
    json!({
        "properties": {
            "timestamp": { "type": "date", "format": "epoch_millis" },
            "operation": { "type": "keyword" },
            "scenario": { "type": "keyword" },
            "successful": { "type": "boolean" },
        }
    })
}

/// Creates the index and applies [`default_mapping`].
///
/// Failures are logged and otherwise ignored; documents can still be indexed into an index with a
/// dynamic mapping.
pub async fn provision(sink: &dyn Sink, index: &str) {
    tracing::info!(index, "provisioning metrics index");

    if let Err(error) = sink.ensure_index(index).await {
        tracing::warn!(
            index,
            error = &error as &dyn std::error::Error,
            "could not create metrics index"
        );
    }

    if let Err(error) = sink.put_mapping(index, &default_mapping()).await {
        tracing::warn!(
            index,
            error = &error as &dyn std::error::Error,
            "could not set metrics index mapping"
        );
    }
}

/// A [`Sink`] backed by the Elasticsearch REST API, authenticating with basic auth.
pub struct ElasticsearchSink {
    client: reqwest::Client,
    url: Arc<str>,
    username: String,
    password: SecretBox<ConfigSecret>,
}

impl fmt::Debug for ElasticsearchSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElasticsearchSink")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &format_args!("[redacted]"))
            .finish_non_exhaustive()
    }
}

impl ElasticsearchSink {
    /// Creates a sink for the cluster at `url`.
    pub fn new(
        url: &str,
        username: impl Into<String>,
        password: SecretBox<ConfigSecret>,
    ) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;

        Ok(Self {
            client,
            url: url.trim_end_matches('/').into(),
            username: username.into(),
            password,
        })
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .basic_auth(&self.username, Some(self.password.expose_secret().as_str()))
            .header(header::ACCEPT, "application/json")
    }

    async fn send(
        &self,
        url: String,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, SinkError> {
        request
            .send()
            .await
            .map_err(|cause| SinkError::Transport { url, cause })
    }
}

#[async_trait::async_trait]
impl Sink for ElasticsearchSink {
    async fn ensure_index(&self, index: &str) -> Result<(), SinkError> {
        let url = format!("{}/{index}", self.url);
        let response = self
            .send(url.clone(), self.request(reqwest::Method::PUT, &url))
            .await?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(index, "created metrics index");
            return Ok(());
        }

        if status == StatusCode::BAD_REQUEST {
            let body = response.text().await.unwrap_or_default();
            if body.contains("resource_already_exists_exception") {
                tracing::debug!(index, "metrics index already exists");
                return Ok(());
            }
        }

        Err(SinkError::Status { url, status })
    }

    async fn put_mapping(&self, index: &str, mapping: &Value) -> Result<(), SinkError> {
        let url = format!("{}/{index}/_mapping", self.url);
        let request = self.request(reqwest::Method::PUT, &url).json(mapping);
        let response = self.send(url.clone(), request).await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            status => Err(SinkError::Status { url, status }),
        }
    }

    async fn index_document(&self, index: &str, document: &Value) -> Result<(), SinkError> {
        let url = format!("{}/{index}/_doc", self.url);
        let request = self.request(reqwest::Method::POST, &url).json(document);
        let response = self.send(url.clone(), request).await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            status => Err(SinkError::Status { url, status }),
        }
    }
}

#[derive(Debug, Default)]
struct MemoryIndex {
    mapping: Option<Value>,
    documents: Vec<Value>,
}

#[derive(Debug, Default)]
struct MemoryState {
    indices: HashMap<String, MemoryIndex>,
    unavailable: bool,
}

/// A [`Sink`] keeping all documents in memory.
///
/// Clones share the same documents, so a test can keep a handle while the engine publishes into
/// another.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes all subsequent operations fail with [`SinkError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().unavailable = unavailable;
    }

    /// Returns all documents of the index, in the order they were published.
    pub fn documents(&self, index: &str) -> Vec<Value> {
        self.state()
            .indices
            .get(index)
            .map(|index| index.documents.clone())
            .unwrap_or_default()
    }

    /// Returns the mapping of the index, if one was set.
    pub fn mapping(&self, index: &str) -> Option<Value> {
        self.state().indices.get(index)?.mapping.clone()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn available(&self) -> Result<MutexGuard<'_, MemoryState>, SinkError> {
        let state = self.state();
        if state.unavailable {
            return Err(SinkError::Unavailable);
        }
        Ok(state)
    }
}

#[async_trait::async_trait]
impl Sink for MemorySink {
    async fn ensure_index(&self, index: &str) -> Result<(), SinkError> {
        self.available()?
            .indices
            .entry(index.to_owned())
            .or_default();
        Ok(())
    }

    async fn put_mapping(&self, index: &str, mapping: &Value) -> Result<(), SinkError> {
        self.available()?
            .indices
            .entry(index.to_owned())
            .or_default()
            .mapping = Some(mapping.clone());
        Ok(())
    }

    async fn index_document(&self, index: &str, document: &Value) -> Result<(), SinkError> {
        self.available()?
            .indices
            .entry(index.to_owned())
            .or_default()
            .documents
            .push(document.clone());
        Ok(())
    }
}
