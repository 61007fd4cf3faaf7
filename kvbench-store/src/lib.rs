//! Clients for the key-value stores kvbench drives load against.
//!
//! Every store implements the [`Store`] trait, which exposes the four primitives the simulation
//! engine needs: a bounded `scan`, and `get`, `put` and `delete` by primary key. Implementations
//! must tolerate a high volume of concurrent calls, since a single instance is shared by all
//! workers of a benchmark run.
//!
//! - [`DynamoDbStore`] talks to DynamoDB (or anything speaking its API, such as DynamoDB Local).
//! - [`InMemoryStore`] keeps everything in a `HashMap` and can emulate propagation delay and
//!   failing calls, which makes it suitable for tests and dry runs.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

mod common;
mod dynamodb;
mod in_memory;

pub use common::{SharedStore, Store, StoreError, StoreOp, StoreResult};
pub use dynamodb::DynamoDbStore;
pub use in_memory::InMemoryStore;
