//! Test utilities for kvbench.
//!
//! This crate provides utilities to facilitate testing of the benchmark engine and its sinks. See
//! the modules for all available utilities.

pub mod elasticsearch;
pub mod tracing;
