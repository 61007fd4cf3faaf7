//! Verification that mutations became visible.
//!
//! The store only guarantees eventual consistency, so a read right after a write may still
//! observe the previous state. Every mutation of a simulation is therefore followed by polling
//! reads until the expected state shows up, bounded by [`MAX_ATTEMPTS`]. There is no delay
//! between attempts besides the read round-trip itself.
//!
//! Running out of attempts marks the iteration as failed and leaves the confirmation latency
//! unset, but the simulation carries on.

use std::future::Future;
use std::time::Instant;

use kvbench_store::StoreResult;
use kvbench_types::{AttributeValue, BenchmarkItem, MetricsRecord, Phase};

use crate::operations::Operations;

/// Maximum number of reads spent on confirming a single mutation.
pub const MAX_ATTEMPTS: u32 = 10;

/// The result of [`retry`].
#[derive(Debug, PartialEq)]
pub enum Outcome<T> {
    /// An attempt produced a value that satisfied the predicate.
    Satisfied {
        /// The accepted value.
        value: T,
        /// The number of attempts made, including the successful one.
        attempts: u32,
    },
    /// No attempt produced an acceptable value.
    Exhausted {
        /// The value produced by the last attempt.
        last: T,
        /// The number of attempts made.
        attempts: u32,
    },
}

/// Repeats `attempt` until `done` accepts its output, at most `max_attempts` times.
///
/// At least one attempt is always made. The closure receives the 1-based attempt number.
pub async fn retry<T, F, Fut, P>(max_attempts: u32, mut attempt: F, mut done: P) -> Outcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = T>,
    P: FnMut(&T) -> bool,
{
    let max_attempts = max_attempts.max(1);
    let mut number = 1;

    loop {
        let value = attempt(number).await;
        if done(&value) {
            return Outcome::Satisfied {
                value,
                attempts: number,
            };
        }
        if number == max_attempts {
            return Outcome::Exhausted {
                last: value,
                attempts: number,
            };
        }
        number += 1;
    }
}

impl Operations {
    /// Polls until the created item with the given identifier is visible.
    ///
    /// Returns `Ok(false)` if the item did not show up within [`MAX_ATTEMPTS`] reads.
    pub async fn confirm_created(&self, id: &str, record: &mut MetricsRecord) -> StoreResult<bool> {
        self.confirm(id, Phase::WriteConfirmation, record, |item| item.is_some())
            .await
    }

    /// Polls until the tracked attribute of the item differs from `previous`.
    ///
    /// A missing item counts as an unconfirmed attempt.
    pub async fn confirm_updated(
        &self,
        id: &str,
        previous: Option<&AttributeValue>,
        record: &mut MetricsRecord,
    ) -> StoreResult<bool> {
        self.confirm(id, Phase::UpdateConfirmation, record, |item| {
            item.as_ref()
                .is_some_and(|item| item.tracked_value() != previous)
        })
        .await
    }

    /// Polls until the item with the given identifier is gone.
    pub async fn confirm_deleted(&self, id: &str, record: &mut MetricsRecord) -> StoreResult<bool> {
        self.confirm(id, Phase::DeleteConfirmation, record, |item| item.is_none())
            .await
    }

    async fn confirm<P>(
        &self,
        id: &str,
        phase: Phase,
        record: &mut MetricsRecord,
        mut expected: P,
    ) -> StoreResult<bool>
    where
        P: FnMut(&Option<BenchmarkItem>) -> bool,
    {
        let start = Instant::now();
        let outcome = retry(
            MAX_ATTEMPTS,
            move |attempt| {
                tracing::trace!(%id, attempt, "awaiting {phase}");
                self.fetch(id)
            },
            |result| match result {
                Ok(item) => expected(item),
                Err(_) => true,
            },
        )
        .await;

        match outcome {
            Outcome::Satisfied {
                value: Err(error), ..
            } => {
                record.mark_failed();
                tracing::error!(%id, error = &error as &dyn std::error::Error, "{phase} aborted");
                Err(error)
            }
            Outcome::Satisfied { attempts, .. } => {
                record.record(phase, start.elapsed());
                tracing::trace!(%id, attempts, "{phase} succeeded");
                Ok(true)
            }
            Outcome::Exhausted { attempts, .. } => {
                record.mark_failed();
                tracing::warn!(%id, attempts, "{phase} exhausted all attempts");
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use kvbench_store::{InMemoryStore, Store, StoreOp};
    use kvbench_types::{Operation, Scenario};
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    use super::*;
    use crate::generator::ItemGenerator;

    const TABLE: &str = "items";

    fn setup(lag: u32) -> (InMemoryStore, Operations) {
        let store = InMemoryStore::with_propagation_lag(lag);
        let generator = ItemGenerator::new(3).unwrap();
        let ops = Operations::new(Arc::new(store.clone()), TABLE, generator);
        (store, ops)
    }

    fn record() -> MetricsRecord {
        MetricsRecord::new(Scenario::Crud, Operation::Update, 0)
    }

    #[tokio::test]
    async fn retry_stops_at_first_success() {
        let outcome = retry(10, |n| async move { n }, |n| *n == 3).await;
        assert_eq!(
            outcome,
            Outcome::Satisfied {
                value: 3,
                attempts: 3
            }
        );
    }

    #[tokio::test]
    async fn retry_exhausts_budget() {
        let mut calls = 0;
        let outcome = retry(
            4,
            |n| {
                calls += 1;
                async move { n }
            },
            |_| false,
        )
        .await;

        assert_eq!(
            outcome,
            Outcome::Exhausted {
                last: 4,
                attempts: 4
            }
        );
        assert_eq!(calls, 4);
    }

    #[tokio::test]
    async fn retry_always_attempts_once() {
        let outcome = retry(0, |n| async move { n }, |_| false).await;
        assert_eq!(
            outcome,
            Outcome::Exhausted {
                last: 1,
                attempts: 1
            }
        );
    }

    #[tokio::test]
    async fn confirms_within_lag() {
        let (_store, ops) = setup(MAX_ATTEMPTS - 1);
        let mut rng = SmallRng::seed_from_u64(0);
        let mut record = record();

        let (id, item) = ops.create(&mut rng, &mut record).await.unwrap();
        assert!(ops.confirm_created(&id, &mut record).await.unwrap());

        ops.overwrite(&id, item.tracked_value(), &mut rng, &mut record)
            .await
            .unwrap();
        assert!(
            ops.confirm_updated(&id, item.tracked_value(), &mut record)
                .await
                .unwrap()
        );

        ops.delete(&id, &mut record).await.unwrap();
        assert!(ops.confirm_deleted(&id, &mut record).await.unwrap());

        assert!(record.successful);
        assert!(record.write_item_confirmation_time.is_some());
        assert!(record.update_item_confirmation_time.is_some());
        assert!(record.delete_item_confirmation_time.is_some());
    }

    #[tokio::test]
    async fn exhaustion_marks_failure_without_latency() {
        let (_store, ops) = setup(MAX_ATTEMPTS);
        let mut rng = SmallRng::seed_from_u64(0);
        let mut record = record();

        let (id, _) = ops.create(&mut rng, &mut record).await.unwrap();
        assert!(!ops.confirm_created(&id, &mut record).await.unwrap());

        assert!(!record.successful);
        assert!(record.write_item_confirmation_time.is_none());
    }

    /// Counts point reads before passing them on to an in-memory store.
    #[derive(Debug, Default)]
    struct CountingStore {
        inner: InMemoryStore,
        gets: AtomicU32,
    }

    #[async_trait::async_trait]
    impl Store for CountingStore {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn scan(
            &self,
            table: &str,
            projection: &[&str],
            limit: usize,
        ) -> StoreResult<Vec<BenchmarkItem>> {
            self.inner.scan(table, projection, limit).await
        }

        async fn get(&self, table: &str, id: &str) -> StoreResult<Option<BenchmarkItem>> {
            self.gets.fetch_add(1, Ordering::Relaxed);
            self.inner.get(table, id).await
        }

        async fn put(&self, table: &str, item: &BenchmarkItem) -> StoreResult<()> {
            self.inner.put(table, item).await
        }

        async fn delete(&self, table: &str, id: &str) -> StoreResult<()> {
            self.inner.delete(table, id).await
        }
    }

    #[tokio::test]
    async fn confirm_deleted_is_idempotent() {
        let store = Arc::new(CountingStore::default());
        let ops = Operations::new(store.clone(), TABLE, ItemGenerator::new(3).unwrap());
        let mut record = record();

        store.delete(TABLE, "gone").await.unwrap();
        for round in 1..=3 {
            assert!(ops.confirm_deleted("gone", &mut record).await.unwrap());
            // An absent item confirms on the first read.
            assert_eq!(store.gets.load(Ordering::Relaxed), round);
        }
        assert!(record.successful);
        assert!(record.delete_item_confirmation_time.is_some());
    }

    #[tokio::test]
    async fn missing_item_does_not_confirm_update() {
        let (_store, ops) = setup(0);
        let mut record = record();

        let previous = AttributeValue::N("1.00".into());
        assert!(
            !ops.confirm_updated("missing", Some(&previous), &mut record)
                .await
                .unwrap()
        );
        assert!(!record.successful);
    }

    #[tokio::test]
    async fn read_errors_abort_confirmation() {
        let (store, ops) = setup(0);
        let mut record = record();

        store.fail(StoreOp::Get);
        assert!(ops.confirm_created("a", &mut record).await.is_err());
        assert!(!record.successful);
        assert!(record.write_item_confirmation_time.is_none());
    }
}
