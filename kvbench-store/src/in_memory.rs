//! In-memory store for tests and dry runs.
//!
//! This provides a [`Store`] backed by a `HashMap` per table. The store is [`Clone`] so tests can
//! hold a handle for direct inspection while the engine owns a shared copy.
//!
//! To exercise the consistency verifier, writes and deletes can be made to propagate lazily: with
//! a propagation lag of `n`, the first `n` reads of a key after a mutation still observe the
//! previous state. A mutation issued while an earlier one is still pending first makes the earlier
//! one visible, then starts its own lag. Individual operations can also be made to fail on demand.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use kvbench_types::BenchmarkItem;

use crate::common::{Store, StoreError, StoreOp, StoreResult};

#[derive(Debug, Default)]
struct Entry {
    /// What readers currently observe.
    visible: Option<BenchmarkItem>,
    /// A mutation that has not propagated yet.
    pending: Option<Pending>,
}

#[derive(Debug)]
struct Pending {
    value: Option<BenchmarkItem>,
    remaining_reads: u32,
}

#[derive(Debug, Default)]
struct State {
    tables: HashMap<String, HashMap<String, Entry>>,
    propagation_lag: u32,
    failing: HashSet<StoreOp>,
}

impl State {
    fn check(&self, op: StoreOp) -> StoreResult<()> {
        if self.failing.contains(&op) {
            return Err(StoreError::Injected { op });
        }
        Ok(())
    }

    fn mutate(&mut self, table: &str, id: &str, value: Option<BenchmarkItem>) {
        let lag = self.propagation_lag;
        let entry = self
            .tables
            .entry(table.to_owned())
            .or_default()
            .entry(id.to_owned())
            .or_default();

        // A mutation still in flight lands before the next one starts propagating, so readers
        // never skip straight past it.
        if let Some(pending) = entry.pending.take() {
            entry.visible = pending.value;
        }

        if lag == 0 {
            entry.visible = value;
        } else {
            entry.pending = Some(Pending {
                value,
                remaining_reads: lag,
            });
        }
    }
}

/// A [`Store`] keeping all items in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    /// Creates an empty store where mutations are visible immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store where mutations only become visible after `reads` reads of the key.
    pub fn with_propagation_lag(reads: u32) -> Self {
        let store = Self::new();
        store.set_propagation_lag(reads);
        store
    }

    /// Changes the propagation lag for subsequent mutations.
    pub fn set_propagation_lag(&self, reads: u32) {
        self.state().propagation_lag = reads;
    }

    /// Makes every subsequent call of `op` fail until [`recover`](Self::recover) is called.
    pub fn fail(&self, op: StoreOp) {
        self.state().failing.insert(op);
    }

    /// Stops failing calls of `op`.
    pub fn recover(&self, op: StoreOp) {
        self.state().failing.remove(&op);
    }

    /// Inserts an item that is immediately visible, bypassing lag and failure injection.
    ///
    /// Items without an identifier are ignored.
    pub fn insert(&self, table: &str, item: BenchmarkItem) {
        let Some(id) = item.id().map(str::to_owned) else {
            return;
        };
        let mut state = self.state();
        let entry = state
            .tables
            .entry(table.to_owned())
            .or_default()
            .entry(id)
            .or_default();
        entry.visible = Some(item);
        entry.pending = None;
    }

    /// Returns `true` if the item is currently visible to readers.
    pub fn contains(&self, table: &str, id: &str) -> bool {
        self.state()
            .tables
            .get(table)
            .and_then(|entries| entries.get(id))
            .is_some_and(|entry| entry.visible.is_some())
    }

    /// Returns the number of items currently visible in `table`.
    pub fn len(&self, table: &str) -> usize {
        self.state().tables.get(table).map_or(0, |entries| {
            entries
                .values()
                .filter(|entry| entry.visible.is_some())
                .count()
        })
    }

    /// Returns `true` if no item is visible in `table`.
    pub fn is_empty(&self, table: &str) -> bool {
        self.len(table) == 0
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A poisoned lock only means a test panicked while holding it; the map itself is intact.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait::async_trait]
impl Store for InMemoryStore {
    fn name(&self) -> &'static str {
        "in-memory"
    }

    async fn scan(
        &self,
        table: &str,
        projection: &[&str],
        limit: usize,
    ) -> StoreResult<Vec<BenchmarkItem>> {
        let state = self.state();
        state.check(StoreOp::Scan)?;

        let Some(entries) = state.tables.get(table) else {
            return Ok(Vec::new());
        };

        let items = entries
            .values()
            .filter_map(|entry| entry.visible.as_ref())
            .take(limit)
            .map(|item| {
                if projection.is_empty() {
                    return item.clone();
                }
                item.iter()
                    .filter(|(name, _)| projection.contains(&name.as_str()))
                    .map(|(name, value)| (name.clone(), value.clone()))
                    .collect()
            })
            .collect();

        Ok(items)
    }

    async fn get(&self, table: &str, id: &str) -> StoreResult<Option<BenchmarkItem>> {
        let mut state = self.state();
        state.check(StoreOp::Get)?;

        let Some(entry) = state
            .tables
            .get_mut(table)
            .and_then(|entries| entries.get_mut(id))
        else {
            return Ok(None);
        };

        let settled = match entry.pending.as_mut() {
            Some(pending) if pending.remaining_reads > 0 => {
                pending.remaining_reads -= 1;
                false
            }
            Some(_) => true,
            None => false,
        };
        if settled && let Some(pending) = entry.pending.take() {
            entry.visible = pending.value;
        }

        Ok(entry.visible.clone())
    }

    async fn put(&self, table: &str, item: &BenchmarkItem) -> StoreResult<()> {
        let mut state = self.state();
        state.check(StoreOp::Put)?;

        let id = item.id().ok_or_else(|| StoreError::Request {
            op: StoreOp::Put,
            table: table.to_owned(),
            cause: "item has no string id attribute".into(),
        })?;
        state.mutate(table, id, Some(item.clone()));

        Ok(())
    }

    async fn delete(&self, table: &str, id: &str) -> StoreResult<()> {
        let mut state = self.state();
        state.check(StoreOp::Delete)?;
        state.mutate(table, id, None);
        Ok(())
    }
}
