use std::fmt::{self, Debug};
use std::sync::Arc;

use kvbench_types::BenchmarkItem;
use thiserror::Error;

/// A type-erased [`Store`] instance, shared by all workers of a run.
pub type SharedStore = Arc<dyn Store>;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// A key-value store that items can be written to and read back from.
#[async_trait::async_trait]
pub trait Store: Debug + Send + Sync + 'static {
    /// The store name, used for diagnostics.
    fn name(&self) -> &'static str;

    /// Returns up to `limit` items of `table`, restricted to the `projection` attributes.
    ///
    /// An empty projection returns all attributes.
    async fn scan(
        &self,
        table: &str,
        projection: &[&str],
        limit: usize,
    ) -> StoreResult<Vec<BenchmarkItem>>;

    /// Retrieves the item with the given identifier, `None` if it does not exist.
    async fn get(&self, table: &str, id: &str) -> StoreResult<Option<BenchmarkItem>>;

    /// Stores an item, replacing any previous item with the same identifier.
    async fn put(&self, table: &str, item: &BenchmarkItem) -> StoreResult<()>;

    /// Deletes the item with the given identifier. Deleting a missing item is not an error.
    async fn delete(&self, table: &str, id: &str) -> StoreResult<()>;
}

/// The primitive store operations, used to attribute errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreOp {
    /// A bounded table scan.
    Scan,
    /// A point read.
    Get,
    /// A write of a full item.
    Put,
    /// A delete by identifier.
    Delete,
}

impl fmt::Display for StoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Scan => "scan",
            Self::Get => "get",
            Self::Put => "put",
            Self::Delete => "delete",
        })
    }
}

/// Errors returned by [`Store`] implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store rejected the call or could not be reached.
    #[error("{op} against {table} failed")]
    Request {
        /// The operation that failed.
        op: StoreOp,
        /// The table the operation ran against.
        table: String,
        /// The error reported by the client.
        #[source]
        cause: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The in-memory store was told to fail this operation.
    #[error("injected {op} failure")]
    Injected {
        /// The operation that was failed.
        op: StoreOp,
    },
}
