//! The kvbench load generator binary.
//!
//! See the [`kvbench`] library for a description of what a benchmark run does.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

fn main() -> anyhow::Result<()> {
    kvbench::cli::execute()
}
