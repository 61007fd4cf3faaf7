//! The pool of existing partition keys that reads are sampled from.

use std::sync::Arc;

use kvbench_store::{Store, StoreResult};
use kvbench_types::ID_ATTRIBUTE;
use rand::Rng;

/// Maximum number of items inspected when populating the pool.
pub const SCAN_LIMIT: usize = 10_000;

/// A snapshot of partition keys, taken once at the start of a run.
///
/// The pool is immutable after construction and cheap to clone; all workers share the same
/// allocation. It only ever contains non-blank keys.
#[derive(Clone, Debug, Default)]
pub struct KeyPool {
    keys: Arc<[String]>,
}

impl KeyPool {
    /// Fetches up to [`SCAN_LIMIT`] keys from `table`.
    pub async fn populate(store: &dyn Store, table: &str) -> StoreResult<Self> {
        tracing::info!(table, "fetching partition keys to sample reads from");

        let items = store.scan(table, &[ID_ATTRIBUTE], SCAN_LIMIT).await?;
        let pool = Self::from_keys(items.iter().filter_map(|item| item.id()).map(str::to_owned));

        tracing::info!(keys = pool.len(), "fetched partition keys");
        Ok(pool)
    }

    /// Creates a pool from the given keys, dropping blank ones.
    pub fn from_keys(keys: impl IntoIterator<Item = String>) -> Self {
        let keys: Vec<_> = keys
            .into_iter()
            .filter(|key| !key.trim().is_empty())
            .collect();
        Self { keys: keys.into() }
    }

    /// Returns the number of keys in the pool.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns `true` if there is nothing to sample from.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Picks a key uniformly at random, `None` if the pool is empty.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&str> {
        if self.keys.is_empty() {
            return None;
        }
        let index = rng.random_range(0..self.keys.len());
        Some(&self.keys[index])
    }
}

#[cfg(test)]
mod tests {
    use kvbench_store::{InMemoryStore, StoreOp};
    use kvbench_types::{AttributeValue, BenchmarkItem};
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    use super::*;

    #[test]
    fn blank_keys_are_dropped() {
        let pool = KeyPool::from_keys(["a", "", "  ", "b", "\t\n"].map(String::from));
        assert_eq!(pool.len(), 2);

        let mut rng = SmallRng::seed_from_u64(0);
        for _ in 0..20 {
            let key = pool.sample(&mut rng).unwrap();
            assert!(key == "a" || key == "b");
        }
    }

    #[test]
    fn empty_pool_samples_nothing() {
        let pool = KeyPool::default();
        assert!(pool.is_empty());
        assert_eq!(pool.sample(&mut SmallRng::seed_from_u64(0)), None);
    }

    #[tokio::test]
    async fn populate_collects_ids() {
        let store = InMemoryStore::new();
        for id in ["a", "b", " ", "c"] {
            let mut item = BenchmarkItem::with_id(id);
            item.insert("0", AttributeValue::S("text".into()));
            store.insert("items", item);
        }

        let pool = KeyPool::populate(&store, "items").await.unwrap();
        let mut keys = pool.keys.to_vec();
        keys.sort();
        assert_eq!(keys, ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn populate_reports_scan_failures() {
        let store = InMemoryStore::new();
        store.fail(StoreOp::Scan);
        assert!(KeyPool::populate(&store, "items").await.is_err());
    }
}
