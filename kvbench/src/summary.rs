//! Aggregation and printing of the run summary.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use kvbench_types::{MetricsRecord, Operation, Phase};
use sketches_ddsketch::DDSketch;
use yansi::Paint;

/// Aggregated measurements of all iterations of one operation.
#[derive(Default)]
pub struct OperationSummary {
    iterations: u64,
    failures: u64,
    phases: BTreeMap<Phase, DDSketch>,
}

impl fmt::Debug for OperationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationSummary")
            .field("iterations", &self.iterations)
            .field("failures", &self.failures)
            .field("phases", &self.phases.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl OperationSummary {
    /// The number of iterations.
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// The number of iterations that were not successful.
    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// The number of measurements taken for a phase.
    pub fn samples(&self, phase: Phase) -> usize {
        self.phases.get(&phase).map_or(0, DDSketch::count)
    }

    fn add(&mut self, record: &MetricsRecord) {
        self.iterations += 1;
        if !record.successful {
            self.failures += 1;
        }
        for (phase, millis) in record.latencies() {
            self.phases.entry(phase).or_default().add(millis);
        }
    }
}

/// Aggregated measurements of a benchmark run, by operation.
#[derive(Debug, Default)]
pub struct Summary {
    operations: BTreeMap<Operation, OperationSummary>,
}

impl Summary {
    /// Folds a record into the summary.
    pub fn add(&mut self, record: &MetricsRecord) {
        self.operations
            .entry(record.operation)
            .or_default()
            .add(record);
    }

    /// Returns the summary of one operation, if it ran at all.
    pub fn operation(&self, operation: Operation) -> Option<&OperationSummary> {
        self.operations.get(&operation)
    }

    /// The number of iterations across all operations.
    pub fn iterations(&self) -> u64 {
        self.operations.values().map(|op| op.iterations).sum()
    }

    /// The number of failed iterations across all operations.
    pub fn failures(&self) -> u64 {
        self.operations.values().map(|op| op.failures).sum()
    }

    /// Prints the summary to stdout.
    ///
    /// `duration` is the wall-clock time the benchmark ran for, used to compute throughput.
    pub fn print(&self, duration: Duration) {
        for (operation, summary) in &self.operations {
            println!();
            print!(
                "{} ({} iterations",
                format!("{}:", operation.as_str().to_uppercase())
                    .bold()
                    .green(),
                summary.iterations.bold()
            );
            if summary.failures > 0 {
                print!(
                    ", {}",
                    format!("{} FAILURES", summary.failures).bold().red()
                );
            }
            println!(")");
            print_ops(summary.iterations, duration);

            for (phase, sketch) in &summary.phases {
                print_percentiles(*phase, sketch);
            }
        }

        println!();
        print!(
            "{} ({} iterations",
            "TOTAL:".bold(),
            self.iterations().bold()
        );
        if self.failures() > 0 {
            print!(", {}", format!("{} FAILURES", self.failures()).bold().red());
        }
        println!(")");
        print_ops(self.iterations(), duration);
    }
}

fn print_ops(iterations: u64, duration: Duration) {
    let per_second = iterations as f64 / duration.as_secs_f64().max(f64::EPSILON);
    println!("  {:.2} iterations/s", per_second.bold());
}

fn print_percentiles(phase: Phase, sketch: &DDSketch) {
    let count = sketch.count();
    if count == 0 {
        return;
    }

    let quantile = |q| {
        let millis = sketch.quantile(q).ok().flatten().unwrap_or_default();
        Duration::from_secs_f64(millis.max(0.0) / 1000.0)
    };
    let total = sketch.sum().unwrap_or_default().max(0.0);
    let avg = Duration::from_secs_f64(total / count as f64 / 1000.0);
    let p50 = quantile(0.5);
    let p90 = quantile(0.9);
    let p99 = quantile(0.99);

    println!(
        "  {:<20} avg: {:.2?}; p50: {p50:.2?}; p90: {p90:.2?}; p99: {p99:.2?}",
        format!("{phase}:"),
        avg.bold()
    );
}
