//! Tests for publishing metrics to an Elasticsearch-compatible server.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use kvbench::config::{Benchmark, ConfigSecret};
use kvbench::engine::Engine;
use kvbench::sink::{ElasticsearchSink, Sink, SinkError, provision};
use kvbench_store::InMemoryStore;
use kvbench_test::elasticsearch::FakeElasticsearch;
use secrecy::SecretBox;
use serde_json::json;

fn sink(server: &FakeElasticsearch) -> ElasticsearchSink {
    let password = SecretBox::new(Box::new(ConfigSecret::from("changeme")));
    ElasticsearchSink::new(&server.url(), "elastic", password).unwrap()
}

#[tokio::test]
async fn provisions_index_idempotently() -> Result<()> {
    kvbench_test::tracing::init();
    let server = FakeElasticsearch::new().await;
    let sink = sink(&server);

    sink.ensure_index("dynamodb").await?;
    // Creating an existing index is not an error.
    sink.ensure_index("dynamodb").await?;
    assert!(server.has_index("dynamodb"));

    provision(&sink, "dynamodb").await;
    let mapping = server.mapping("dynamodb").expect("mapping was set");
    assert_eq!(mapping["properties"]["timestamp"]["type"], "date");

    // "elastic:changeme"
    assert_eq!(
        server.authorization().as_deref(),
        Some("Basic ZWxhc3RpYzpjaGFuZ2VtZQ==")
    );

    Ok(())
}

#[tokio::test]
async fn indexes_documents() -> Result<()> {
    let server = FakeElasticsearch::new().await;
    let sink = sink(&server);

    sink.index_document("dynamodb", &json!({ "operation": "read" }))
        .await?;
    assert_eq!(server.documents("dynamodb"), [json!({ "operation": "read" })]);

    server.reject_documents(true);
    let result = sink.index_document("dynamodb", &json!({})).await;
    assert!(
        matches!(result, Err(SinkError::Status { status, .. }) if status.as_u16() == 503),
        "{result:?}"
    );

    Ok(())
}

#[tokio::test]
async fn mapping_for_missing_index_fails() {
    let server = FakeElasticsearch::new().await;
    let sink = sink(&server);

    let result = sink.put_mapping("missing", &json!({})).await;
    assert!(matches!(result, Err(SinkError::Status { .. })));
}

#[tokio::test]
async fn unreachable_cluster_is_a_transport_error() {
    let server = FakeElasticsearch::new().await;
    let url = server.url();
    drop(server);
    // Give the aborted server task a moment to release the listener.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let password = SecretBox::new(Box::new(ConfigSecret::from("changeme")));
    let sink = ElasticsearchSink::new(&url, "elastic", password).unwrap();
    let result = sink.index_document("dynamodb", &json!({})).await;
    assert!(matches!(result, Err(SinkError::Transport { .. })), "{result:?}");
}

#[tokio::test]
async fn benchmark_publishes_to_elasticsearch() -> Result<()> {
    let server = FakeElasticsearch::new().await;
    let sink = Arc::new(sink(&server));
    provision(sink.as_ref(), "dynamodb").await;

    let benchmark = Benchmark {
        workers: 2,
        buffer: 4,
        attributes: 1,
        duration: Duration::from_millis(200),
        read_only: false,
        table: "items".into(),
        seed: Some(3),
        read_only_jitter: Duration::ZERO,
        drain_timeout: Duration::from_secs(5),
    };
    let engine = Engine::new(benchmark, Arc::new(InMemoryStore::new()), sink, "dynamodb");
    let report = engine.run().await?;

    let documents = server.documents("dynamodb");
    assert_eq!(documents.len() as u64, report.summary.iterations());
    for document in documents {
        assert_eq!(document["scenario"], "crud");
        assert_ne!(document["operation"], "read");
        assert_eq!(document["successful"], true);
    }

    Ok(())
}
