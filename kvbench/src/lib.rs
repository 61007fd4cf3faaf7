//! This is a load generator which drives synthetic traffic against a key-value [`Store`] and
//! publishes per-iteration latency measurements to a metrics [`Sink`].
//!
//! A benchmark run spawns a fixed number of workers. Every worker loops over *simulations*: in a
//! read-only run it reads items sampled from a pool of existing keys, in a CRUD run it picks a
//! read, a write or an update at random. Writes and updates create a fresh item and verify with
//! a bounded number of polling reads that the mutation became visible, then delete the item
//! again and verify that as well.
//!
//! Each simulation yields one [`MetricsRecord`](kvbench_types::MetricsRecord), which is handed to
//! a bounded queue. A single publisher drains the queue into the sink; when the sink falls behind,
//! workers block instead of dropping measurements.
//!
//! [`Store`]: kvbench_store::Store
//! [`Sink`]: crate::sink::Sink
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod cli;
pub mod config;
pub mod engine;
pub mod generator;
pub mod keypool;
pub mod observability;
pub mod operations;
pub mod pipeline;
pub mod sink;
pub mod summary;
pub mod verifier;
pub mod worker;

pub use crate::engine::Engine;
