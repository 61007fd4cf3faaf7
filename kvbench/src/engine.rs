//! Orchestration of a benchmark run.
//!
//! The [`Engine`] prepares the key pool, spawns a fixed set of workers and the metrics publisher,
//! and tears everything down once the run is over. In-flight iterations are abandoned when the
//! run stops; records that are already queued get a bounded grace period to be published.

use std::future::Future;
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use kvbench_store::{DynamoDbStore, InMemoryStore, SharedStore};
use kvbench_types::Scenario;
use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config;
use crate::generator::ItemGenerator;
use crate::keypool::KeyPool;
use crate::operations::Operations;
use crate::pipeline;
use crate::sink::{ElasticsearchSink, MemorySink, SharedSink};
use crate::summary::Summary;
use crate::worker::Simulator;

/// Connects to the configured store.
pub async fn connect_store(config: &config::Store) -> SharedStore {
    match config {
        config::Store::DynamoDb { endpoint } => {
            let store = DynamoDbStore::from_env(endpoint.as_deref()).await;
            tracing::debug!(?store, "connected to dynamodb");
            Arc::new(store)
        }
        config::Store::InMemory { propagation_lag } => {
            Arc::new(InMemoryStore::with_propagation_lag(*propagation_lag))
        }
    }
}

/// Creates a client for the configured metrics sink.
pub fn connect_sink(config: &config::Sink) -> Result<SharedSink> {
    let sink: SharedSink = match config {
        config::Sink::Elasticsearch {
            url,
            username,
            password,
            ..
        } => Arc::new(
            ElasticsearchSink::new(url, username.as_str(), password.clone())
                .context("failed to create elasticsearch client")?,
        ),
        config::Sink::Memory { .. } => Arc::new(MemorySink::new()),
    };
    Ok(sink)
}

/// The outcome of a benchmark run.
#[derive(Debug)]
pub struct Report {
    /// Aggregated measurements of all published iterations.
    pub summary: Summary,
    /// Time between spawning the workers and stopping them.
    pub elapsed: Duration,
}

impl Report {
    /// Prints the summary to stdout.
    pub fn print(&self) {
        self.summary.print(self.elapsed);
    }
}

/// Runs a benchmark against a store and publishes its measurements to a sink.
#[derive(Debug)]
pub struct Engine {
    benchmark: config::Benchmark,
    store: SharedStore,
    sink: SharedSink,
    index: String,
}

impl Engine {
    /// Creates an engine for the given workload.
    ///
    /// The sink is expected to be provisioned already; see [`provision`](crate::sink::provision).
    pub fn new(
        benchmark: config::Benchmark,
        store: SharedStore,
        sink: SharedSink,
        index: impl Into<String>,
    ) -> Self {
        Self {
            benchmark,
            store,
            sink,
            index: index.into(),
        }
    }

    /// Runs the benchmark for the configured duration.
    pub async fn run(self) -> Result<Report> {
        let duration = self.benchmark.duration;
        self.run_until(tokio::time::sleep(duration)).await
    }

    /// Runs the benchmark until `stop` resolves.
    ///
    /// Fails before generating any load if the configuration is unusable or if a read-only run
    /// finds no items to read.
    pub async fn run_until(self, stop: impl Future<Output = ()>) -> Result<Report> {
        let benchmark = &self.benchmark;
        let generator = ItemGenerator::new(benchmark.attributes)?;

        let pool = match KeyPool::populate(self.store.as_ref(), &benchmark.table).await {
            Ok(pool) => pool,
            Err(error) => {
                tracing::error!(
                    error = &error as &dyn std::error::Error,
                    "could not fetch partition keys"
                );
                KeyPool::default()
            }
        };

        let scenario = if benchmark.read_only {
            Scenario::ReadOnly
        } else {
            Scenario::Crud
        };

        if pool.is_empty() {
            match scenario {
                Scenario::ReadOnly => anyhow::bail!(
                    "no items to read in table `{}`, a read-only run needs existing items",
                    benchmark.table
                ),
                Scenario::Crud => {
                    tracing::warn!("no items to read, running writes and updates only")
                }
            }
        }

        let mut master = match benchmark.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_os_rng(),
        };

        let ops = Operations::new(self.store.clone(), benchmark.table.as_str(), generator);
        let (records, publisher) = pipeline::channel(benchmark.buffer, self.sink, self.index);
        let summary = publisher.summary();
        let mut publisher = tokio::spawn(publisher.run());

        let cancel = CancellationToken::new();
        let workers: Vec<JoinHandle<()>> = (0..benchmark.workers)
            .map(|worker| {
                let simulator = Simulator::new(
                    ops.clone(),
                    pool.clone(),
                    scenario,
                    benchmark.read_only_jitter,
                    SmallRng::seed_from_u64(master.next_u64()),
                );
                let records = records.clone();
                let cancel = cancel.clone();

                tokio::spawn(async move {
                    tokio::select! {
                        _ = cancel.cancelled() => tracing::trace!(worker, "worker cancelled"),
                        _ = simulator.run(records) => (),
                    }
                })
            })
            .collect();
        // Workers own the remaining senders, the publisher finishes once they are gone.
        drop(records);

        tracing::info!(
            store = self.store.name(),
            %scenario,
            workers = benchmark.workers,
            table = %benchmark.table,
            keys = pool.len(),
            "benchmark started"
        );
        let start = Instant::now();
        stop.await;
        let elapsed = start.elapsed();

        tracing::info!("stopping workers");
        cancel.cancel();
        for worker in workers {
            if let Err(error) = worker.await {
                tracing::warn!(
                    error = &error as &dyn std::error::Error,
                    "worker did not shut down gracefully"
                );
            }
        }

        match tokio::time::timeout(benchmark.drain_timeout, &mut publisher).await {
            Ok(Ok(())) => tracing::debug!("published all queued records"),
            Ok(Err(error)) => tracing::warn!(
                error = &error as &dyn std::error::Error,
                "metrics publisher failed"
            ),
            Err(_) => {
                tracing::warn!(
                    timeout = ?benchmark.drain_timeout,
                    "metrics publisher did not drain in time, dropping remaining records"
                );
                publisher.abort();
            }
        }

        let summary = {
            let mut summary = summary.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *summary)
        };
        tracing::info!(
            iterations = summary.iterations(),
            failures = summary.failures(),
            "benchmark finished"
        );

        Ok(Report { summary, elapsed })
    }
}

#[cfg(test)]
mod tests {
    use kvbench_store::StoreOp;
    use kvbench_types::Operation;

    use super::*;

    fn benchmark(read_only: bool) -> config::Benchmark {
        config::Benchmark {
            workers: 4,
            buffer: 8,
            attributes: 3,
            duration: Duration::from_millis(100),
            read_only,
            table: "items".into(),
            seed: Some(7),
            read_only_jitter: Duration::ZERO,
            drain_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn read_only_needs_items() {
        let store = InMemoryStore::new();
        let sink = MemorySink::new();
        let engine = Engine::new(benchmark(true), Arc::new(store), Arc::new(sink.clone()), "m");

        let result = engine.run_until(std::future::ready(())).await;
        assert!(result.is_err());
        assert!(sink.documents("m").is_empty());
    }

    #[tokio::test]
    async fn failed_scan_degrades_crud_runs() {
        let store = InMemoryStore::new();
        store.fail(StoreOp::Scan);
        let sink = MemorySink::new();
        let engine = Engine::new(
            benchmark(false),
            Arc::new(store.clone()),
            Arc::new(sink.clone()),
            "m",
        );

        let report = engine.run().await.unwrap();
        assert!(report.summary.iterations() > 0);
        assert!(report.summary.operation(Operation::Read).is_none());
        assert_eq!(sink.documents("m").len() as u64, report.summary.iterations());
    }

    #[tokio::test]
    async fn connects_configured_backends() {
        let store = connect_store(&config::Store::InMemory { propagation_lag: 0 }).await;
        assert_eq!(store.name(), "in-memory");

        let sink = connect_sink(&config::Sink::Memory {
            index: "m".into(),
        });
        assert!(sink.is_ok());
        assert!(connect_sink(&config::Sink::default()).is_ok());
    }
}
