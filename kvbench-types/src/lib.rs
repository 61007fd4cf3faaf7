//! Shared data model of the kvbench load generator.
//!
//! This crate contains the [`BenchmarkItem`]s written to and read from the store under test, and
//! the [`MetricsRecord`]s produced for every simulation iteration and published to the metrics
//! sink.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod item;
pub mod metrics;

pub use item::{AttributeValue, BenchmarkItem, ID_ATTRIBUTE};
pub use metrics::{MetricsRecord, Operation, Phase, Scenario};
