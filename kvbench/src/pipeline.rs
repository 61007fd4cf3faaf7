//! The bounded queue between workers and the sink.
//!
//! Workers push one [`MetricsRecord`] per iteration into a bounded channel. Once the channel is
//! full, workers wait until the publisher catches up, so memory usage is capped by the channel
//! capacity and no record is ever dropped on the producing side. A single [`Publisher`] drains
//! the channel and forwards every record to the [`Sink`](crate::sink::Sink).

use std::sync::{Arc, Mutex, PoisonError};

use kvbench_types::MetricsRecord;
use tokio::sync::mpsc;

use crate::sink::SharedSink;
use crate::summary::Summary;

/// Creates the queue and the publisher draining it.
///
/// A capacity of zero is bumped to one.
pub fn channel(
    capacity: usize,
    sink: SharedSink,
    index: impl Into<String>,
) -> (mpsc::Sender<MetricsRecord>, Publisher) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    let publisher = Publisher {
        receiver,
        sink,
        index: index.into(),
        summary: Arc::default(),
    };
    (sender, publisher)
}

/// Forwards queued records to the sink.
#[derive(Debug)]
pub struct Publisher {
    receiver: mpsc::Receiver<MetricsRecord>,
    sink: SharedSink,
    index: String,
    summary: Arc<Mutex<Summary>>,
}

impl Publisher {
    /// Returns a handle to the summary of all records received so far.
    ///
    /// The handle remains valid after the publisher has been dropped or aborted.
    pub fn summary(&self) -> Arc<Mutex<Summary>> {
        Arc::clone(&self.summary)
    }

    /// Publishes records until all senders are gone and the queue is empty.
    ///
    /// Records the sink fails to accept are logged and dropped.
    pub async fn run(mut self) {
        tracing::debug!(index = %self.index, "starting metrics publisher");

        while let Some(record) = self.receiver.recv().await {
            self.publish(&record).await;
            self.summary
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .add(&record);
        }

        tracing::debug!("metrics publisher finished");
    }

    async fn publish(&self, record: &MetricsRecord) {
        let document = match serde_json::to_value(record) {
            Ok(document) => document,
            Err(error) => {
                tracing::error!(
                    error = &error as &dyn std::error::Error,
                    "could not serialize metrics record"
                );
                return;
            }
        };

        match self.sink.index_document(&self.index, &document).await {
            Ok(()) => tracing::trace!("published metrics record"),
            Err(error) => tracing::error!(
                error = &error as &dyn std::error::Error,
                "could not publish metrics record"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use kvbench_types::{Operation, Phase, Scenario};

    use super::*;
    use crate::sink::MemorySink;

    fn record(n: i64) -> MetricsRecord {
        let mut record = MetricsRecord::new(Scenario::Crud, Operation::Write, n);
        record.record(Phase::Write, Duration::from_millis(2));
        record
    }

    #[tokio::test]
    async fn full_queue_blocks_producers() {
        let sink = MemorySink::new();
        let (sender, mut publisher) = channel(2, Arc::new(sink), "metrics");

        sender.send(record(0)).await.unwrap();
        sender.send(record(1)).await.unwrap();

        let blocked =
            tokio::time::timeout(Duration::from_millis(50), sender.send(record(2))).await;
        assert!(blocked.is_err(), "send should wait for capacity");

        let first = publisher.receiver.recv().await.unwrap();
        assert_eq!(first.timestamp_millis, 0);

        tokio::time::timeout(Duration::from_millis(50), sender.send(record(2)))
            .await
            .expect("capacity was freed")
            .unwrap();
    }

    #[tokio::test]
    async fn publishes_in_order_and_summarizes() {
        let sink = MemorySink::new();
        let (sender, publisher) = channel(8, Arc::new(sink.clone()), "metrics");
        let summary = publisher.summary();
        let task = tokio::spawn(publisher.run());

        for n in 0..5 {
            sender.send(record(n)).await.unwrap();
        }
        drop(sender);
        task.await.unwrap();

        let documents = sink.documents("metrics");
        let timestamps: Vec<_> = documents
            .iter()
            .map(|document| document["timestamp"].as_i64().unwrap())
            .collect();
        assert_eq!(timestamps, [0, 1, 2, 3, 4]);
        assert_eq!(documents[0]["operation"], "write");
        assert_eq!(documents[0]["successful"], true);
        assert!(documents[0].get("readTime").is_none());

        assert_eq!(summary.lock().unwrap().iterations(), 5);
    }

    #[tokio::test]
    async fn sink_failures_drop_records() {
        let sink = MemorySink::new();
        let (sender, publisher) = channel(8, Arc::new(sink.clone()), "metrics");
        let summary = publisher.summary();
        let task = tokio::spawn(publisher.run());

        sink.set_unavailable(true);
        sender.send(record(0)).await.unwrap();
        sender.send(record(1)).await.unwrap();
        // Wait until the publisher has handled both records before recovering.
        while summary.lock().unwrap().iterations() < 2 {
            tokio::task::yield_now().await;
        }

        sink.set_unavailable(false);
        sender.send(record(2)).await.unwrap();
        drop(sender);
        task.await.unwrap();

        let documents = sink.documents("metrics");
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0]["timestamp"], 2);
        assert_eq!(summary.lock().unwrap().iterations(), 3);
    }
}
