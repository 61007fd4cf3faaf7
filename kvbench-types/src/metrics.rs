//! Metrics produced by every simulation iteration.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The operation a simulation iteration performed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    /// Read an existing item.
    #[default]
    Read,
    /// Create an item, then clean it up again.
    Write,
    /// Create an item, overwrite it, then clean it up again.
    Update,
    /// Delete an item.
    Delete,
}

impl Operation {
    /// Returns the serialized name of this operation.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The high-level workload shape of a benchmark run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Scenario {
    /// A mix of reads, writes and updates.
    #[default]
    Crud,
    /// Reads of pre-existing items only.
    ReadOnly,
}

impl Scenario {
    /// Returns the serialized name of this scenario.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Crud => "crud",
            Self::ReadOnly => "readOnly",
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A timed phase of a simulation iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    /// The entire iteration.
    Simulation,
    /// Reading an existing item.
    Read,
    /// Writing a new item.
    Write,
    /// Waiting until a new item is visible.
    WriteConfirmation,
    /// Overwriting an item.
    Update,
    /// Waiting until an overwrite is visible.
    UpdateConfirmation,
    /// Deleting an item.
    Delete,
    /// Waiting until a deleted item is gone.
    DeleteConfirmation,
}

impl Phase {
    /// All phases, in the order they are reported.
    pub const ALL: [Phase; 8] = [
        Phase::Simulation,
        Phase::Read,
        Phase::Write,
        Phase::WriteConfirmation,
        Phase::Update,
        Phase::UpdateConfirmation,
        Phase::Delete,
        Phase::DeleteConfirmation,
    ];

    /// Returns a short human readable name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Simulation => "simulation",
            Self::Read => "read",
            Self::Write => "write",
            Self::WriteConfirmation => "write confirmation",
            Self::Update => "update",
            Self::UpdateConfirmation => "update confirmation",
            Self::Delete => "delete",
            Self::DeleteConfirmation => "delete confirmation",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The measurements of a single simulation iteration.
///
/// Latencies are in milliseconds. A latency is only present if its phase ran (and, for
/// confirmations, completed within the retry budget); absent latencies are omitted when the
/// record is serialized.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsRecord {
    /// The operation performed by the iteration.
    pub operation: Operation,
    /// The scenario the iteration ran in.
    pub scenario: Scenario,
    /// Milliseconds since the Unix epoch at the start of the iteration.
    #[serde(rename = "timestamp")]
    pub timestamp_millis: i64,
    /// Whether every step of the iteration succeeded.
    pub successful: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[allow(missing_docs)]
    pub simulation_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[allow(missing_docs)]
    pub read_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[allow(missing_docs)]
    pub write_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[allow(missing_docs)]
    pub write_item_confirmation_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[allow(missing_docs)]
    pub update_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[allow(missing_docs)]
    pub update_item_confirmation_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[allow(missing_docs)]
    pub delete_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[allow(missing_docs)]
    pub delete_item_confirmation_time: Option<f64>,
}

impl MetricsRecord {
    /// Creates a successful record with no latencies.
    pub fn new(scenario: Scenario, operation: Operation, timestamp_millis: i64) -> Self {
        Self {
            operation,
            scenario,
            timestamp_millis,
            successful: true,
            ..Default::default()
        }
    }

    /// Marks the iteration as failed. There is no way back to successful.
    pub fn mark_failed(&mut self) {
        self.successful = false;
    }

    /// Stores the latency of a phase with microsecond resolution, replacing any previous value.
    pub fn record(&mut self, phase: Phase, elapsed: Duration) {
        *self.slot_mut(phase) = Some(elapsed.as_micros() as f64 / 1000.0);
    }

    /// Returns the latency of a phase in milliseconds, if the phase was recorded.
    pub fn latency(&self, phase: Phase) -> Option<f64> {
        match phase {
            Phase::Simulation => self.simulation_time,
            Phase::Read => self.read_time,
            Phase::Write => self.write_time,
            Phase::WriteConfirmation => self.write_item_confirmation_time,
            Phase::Update => self.update_time,
            Phase::UpdateConfirmation => self.update_item_confirmation_time,
            Phase::Delete => self.delete_time,
            Phase::DeleteConfirmation => self.delete_item_confirmation_time,
        }
    }

    /// Iterates over all recorded latencies.
    pub fn latencies(&self) -> impl Iterator<Item = (Phase, f64)> + '_ {
        Phase::ALL
            .into_iter()
            .filter_map(|phase| self.latency(phase).map(|ms| (phase, ms)))
    }

    fn slot_mut(&mut self, phase: Phase) -> &mut Option<f64> {
        match phase {
            Phase::Simulation => &mut self.simulation_time,
            Phase::Read => &mut self.read_time,
            Phase::Write => &mut self.write_time,
            Phase::WriteConfirmation => &mut self.write_item_confirmation_time,
            Phase::Update => &mut self.update_time,
            Phase::UpdateConfirmation => &mut self.update_item_confirmation_time,
            Phase::Delete => &mut self.delete_time,
            Phase::DeleteConfirmation => &mut self.delete_item_confirmation_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn new_record_is_successful_without_latencies() {
        let record = MetricsRecord::new(Scenario::Crud, Operation::Write, 1_700_000_000_000);
        assert!(record.successful);
        assert_eq!(record.latencies().count(), 0);
    }

    #[test]
    fn absent_latencies_are_omitted() {
        let mut record = MetricsRecord::new(Scenario::ReadOnly, Operation::Read, 42);
        record.record(Phase::Read, Duration::from_micros(1500));
        record.mark_failed();

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            json!({
                "operation": "read",
                "scenario": "readOnly",
                "timestamp": 42,
                "successful": false,
                "readTime": 1.5,
            })
        );
    }

    #[test]
    fn confirmation_fields_use_item_names() {
        let mut record = MetricsRecord::new(Scenario::Crud, Operation::Update, 0);
        record.record(Phase::WriteConfirmation, Duration::from_millis(2));
        record.record(Phase::UpdateConfirmation, Duration::from_millis(3));
        record.record(Phase::DeleteConfirmation, Duration::from_millis(4));

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["writeItemConfirmationTime"], json!(2.0));
        assert_eq!(json["updateItemConfirmationTime"], json!(3.0));
        assert_eq!(json["deleteItemConfirmationTime"], json!(4.0));
    }

    #[test]
    fn latencies_iterate_in_report_order() {
        let mut record = MetricsRecord::new(Scenario::Crud, Operation::Write, 0);
        record.record(Phase::Delete, Duration::from_millis(1));
        record.record(Phase::Simulation, Duration::from_millis(5));
        record.record(Phase::Write, Duration::from_millis(2));

        let phases: Vec<_> = record.latencies().map(|(phase, _)| phase).collect();
        assert_eq!(phases, [Phase::Simulation, Phase::Write, Phase::Delete]);
    }
}
