//! Timed primitives against the store under test.
//!
//! Every executor performs exactly one store call, writes its wall-clock duration into the
//! matching field of the iteration's [`MetricsRecord`], and marks the record as failed if the call
//! returns an error. Errors are still returned, so callers can skip the remaining steps of a
//! simulation.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use kvbench_store::{SharedStore, StoreResult};
use kvbench_types::{AttributeValue, BenchmarkItem, MetricsRecord, Phase};
use rand::Rng;

use crate::generator::{ItemGenerator, new_id};

/// Runs a future and measures how long it took.
pub(crate) async fn timed<F: Future>(future: F) -> (Duration, F::Output) {
    let start = Instant::now();
    let output = future.await;
    (start.elapsed(), output)
}

/// The store operations available to a simulation, bound to one table.
///
/// Cloning is cheap; the store handle is shared.
#[derive(Clone, Debug)]
pub struct Operations {
    store: SharedStore,
    table: Arc<str>,
    generator: ItemGenerator,
}

impl Operations {
    /// Creates operations against `table` that write items shaped by `generator`.
    pub fn new(store: SharedStore, table: impl Into<Arc<str>>, generator: ItemGenerator) -> Self {
        Self {
            store,
            table: table.into(),
            generator,
        }
    }

    /// The table all operations run against.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Reads an item without recording anything.
    pub(crate) async fn fetch(&self, id: &str) -> StoreResult<Option<BenchmarkItem>> {
        self.store.get(&self.table, id).await
    }

    /// Reads the item with the given identifier.
    ///
    /// A missing item is not a failure and yields `Ok(None)`.
    pub async fn read(
        &self,
        id: &str,
        record: &mut MetricsRecord,
    ) -> StoreResult<Option<BenchmarkItem>> {
        let (elapsed, result) = timed(self.fetch(id)).await;
        settle_read(id, record, elapsed, result)
    }

    /// Generates a new item and writes it, returning its identifier and contents.
    pub async fn create<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        record: &mut MetricsRecord,
    ) -> StoreResult<(String, BenchmarkItem)> {
        let id = new_id(rng);
        let item = self.generator.generate_with_id(&id, rng);

        let (elapsed, result) = timed(self.store.put(&self.table, &item)).await;
        record.record(Phase::Write, elapsed);

        match result {
            Ok(()) => {
                tracing::trace!(%id, "created item");
                Ok((id, item))
            }
            Err(error) => {
                record.mark_failed();
                tracing::error!(%id, error = &error as &dyn std::error::Error, "could not create item");
                Err(error)
            }
        }
    }

    /// Replaces all attributes of an existing item with freshly generated ones.
    ///
    /// `previous` is the item's tracked value before the overwrite; the new contents are
    /// guaranteed to differ from it.
    pub async fn overwrite<R: Rng + ?Sized>(
        &self,
        id: &str,
        previous: Option<&AttributeValue>,
        rng: &mut R,
        record: &mut MetricsRecord,
    ) -> StoreResult<BenchmarkItem> {
        let item = self.generator.generate_update(id, previous, rng);

        let (elapsed, result) = timed(self.store.put(&self.table, &item)).await;
        record.record(Phase::Update, elapsed);

        match result {
            Ok(()) => {
                tracing::trace!(%id, "overwrote item");
                Ok(item)
            }
            Err(error) => {
                record.mark_failed();
                tracing::error!(%id, error = &error as &dyn std::error::Error, "could not overwrite item");
                Err(error)
            }
        }
    }

    /// Deletes the item with the given identifier.
    pub async fn delete(&self, id: &str, record: &mut MetricsRecord) -> StoreResult<()> {
        let (elapsed, result) = timed(self.store.delete(&self.table, id)).await;
        record.record(Phase::Delete, elapsed);

        match result {
            Ok(()) => {
                tracing::trace!(%id, "deleted item");
                Ok(())
            }
            Err(error) => {
                record.mark_failed();
                tracing::error!(%id, error = &error as &dyn std::error::Error, "could not delete item");
                Err(error)
            }
        }
    }
}

/// Books the outcome of a read into the record.
pub(crate) fn settle_read(
    id: &str,
    record: &mut MetricsRecord,
    elapsed: Duration,
    result: StoreResult<Option<BenchmarkItem>>,
) -> StoreResult<Option<BenchmarkItem>> {
    record.record(Phase::Read, elapsed);

    match &result {
        Ok(Some(_)) => tracing::trace!(%id, "read item"),
        Ok(None) => tracing::trace!(%id, "item not found"),
        Err(error) => {
            record.mark_failed();
            tracing::error!(%id, error = error as &dyn std::error::Error, "could not read item");
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use kvbench_store::{InMemoryStore, StoreOp};
    use kvbench_types::{Operation, Scenario};
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    use super::*;

    const TABLE: &str = "items";

    fn setup() -> (InMemoryStore, Operations) {
        let store = InMemoryStore::new();
        let generator = ItemGenerator::new(5).unwrap();
        let ops = Operations::new(Arc::new(store.clone()), TABLE, generator);
        (store, ops)
    }

    fn record() -> MetricsRecord {
        MetricsRecord::new(Scenario::Crud, Operation::Write, 0)
    }

    #[tokio::test]
    async fn create_then_read_round_trips() {
        let (store, ops) = setup();
        let mut rng = SmallRng::seed_from_u64(0);
        let mut record = record();

        let (id, item) = ops.create(&mut rng, &mut record).await.unwrap();
        assert!(store.contains(TABLE, &id));

        let read = ops.read(&id, &mut record).await.unwrap();
        assert_eq!(read.as_ref().and_then(BenchmarkItem::id), Some(id.as_str()));
        assert_eq!(read, Some(item));

        assert!(record.successful);
        assert!(record.write_time.is_some());
        assert!(record.read_time.is_some());
    }

    #[tokio::test]
    async fn missing_item_is_not_a_failure() {
        let (_store, ops) = setup();
        let mut record = record();

        assert_eq!(ops.read("missing", &mut record).await.unwrap(), None);
        assert!(record.successful);
        assert!(record.read_time.is_some());
    }

    #[tokio::test]
    async fn overwrite_keeps_id() {
        let (store, ops) = setup();
        let mut rng = SmallRng::seed_from_u64(1);
        let mut record = record();

        let (id, item) = ops.create(&mut rng, &mut record).await.unwrap();
        let updated = ops
            .overwrite(&id, item.tracked_value(), &mut rng, &mut record)
            .await
            .unwrap();

        assert_eq!(updated.id(), Some(id.as_str()));
        assert_ne!(updated.tracked_value(), item.tracked_value());
        assert_eq!(store.len(TABLE), 1);
        assert!(record.update_time.is_some());
    }

    #[tokio::test]
    async fn failures_mark_record_and_propagate() {
        let (store, ops) = setup();
        let mut rng = SmallRng::seed_from_u64(2);

        store.fail(StoreOp::Put);
        let mut record = record();
        assert!(ops.create(&mut rng, &mut record).await.is_err());
        assert!(!record.successful);
        assert!(record.write_time.is_some());

        store.fail(StoreOp::Delete);
        let mut record = self::record();
        assert!(ops.delete("a", &mut record).await.is_err());
        assert!(!record.successful);

        store.fail(StoreOp::Get);
        let mut record = self::record();
        assert!(ops.read("a", &mut record).await.is_err());
        assert!(!record.successful);
    }
}
