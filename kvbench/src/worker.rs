//! The per-worker simulation loop.
//!
//! A worker repeatedly picks a simulation, runs it against the store and hands the resulting
//! [`MetricsRecord`] to the metrics pipeline. Each iteration yields exactly one record, no matter
//! how far the simulation got before failing.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use kvbench_store::StoreResult;
use kvbench_types::{MetricsRecord, Operation, Phase, Scenario};
use rand::Rng;
use rand::rngs::SmallRng;
use tokio::sync::mpsc;

use crate::keypool::KeyPool;
use crate::operations::{Operations, settle_read, timed};
use crate::verifier::{MAX_ATTEMPTS, Outcome, retry};

/// The simulations a worker can pick from.
///
/// Deletes only ever run as cleanup inside writes and updates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Simulation {
    Read,
    Write,
    Update,
}

impl Simulation {
    fn operation(self) -> Operation {
        match self {
            Self::Read => Operation::Read,
            Self::Write => Operation::Write,
            Self::Update => Operation::Update,
        }
    }
}

/// Runs simulations for a single worker.
#[derive(Debug)]
pub struct Simulator {
    ops: Operations,
    pool: KeyPool,
    scenario: Scenario,
    read_only_jitter: Duration,
    rng: SmallRng,
}

impl Simulator {
    /// Creates a simulator for the given scenario.
    ///
    /// In the read-only scenario, every iteration is preceded by a random pause of up to
    /// `read_only_jitter`, which is not part of the measured simulation time.
    pub fn new(
        ops: Operations,
        pool: KeyPool,
        scenario: Scenario,
        read_only_jitter: Duration,
        rng: SmallRng,
    ) -> Self {
        Self {
            ops,
            pool,
            scenario,
            read_only_jitter,
            rng,
        }
    }

    /// Runs simulations and sends their records until the receiving side is closed.
    ///
    /// Sending blocks while the pipeline is full.
    pub async fn run(mut self, records: mpsc::Sender<MetricsRecord>) {
        loop {
            self.pause().await;

            let record = self.simulate().await;
            if records.send(record).await.is_err() {
                tracing::debug!("metrics pipeline closed, stopping worker");
                break;
            }
        }
    }

    /// Runs a single iteration and returns its record.
    pub async fn simulate(&mut self) -> MetricsRecord {
        let simulation = self.choose();
        let mut record = MetricsRecord::new(self.scenario, simulation.operation(), now_millis());

        let start = Instant::now();
        let result = match simulation {
            Simulation::Read => self.read(&mut record).await,
            Simulation::Write => self.write(&mut record).await,
            Simulation::Update => self.update(&mut record).await,
        };
        record.record(Phase::Simulation, start.elapsed());

        if result.is_err() {
            tracing::debug!(operation = %record.operation, "simulation aborted");
        }
        record
    }

    async fn pause(&mut self) {
        if self.scenario != Scenario::ReadOnly || self.read_only_jitter.is_zero() {
            return;
        }
        let jitter = self.rng.random_range(Duration::ZERO..self.read_only_jitter);
        tokio::time::sleep(jitter).await;
    }

    fn choose(&mut self) -> Simulation {
        const ALL: [Simulation; 3] = [Simulation::Read, Simulation::Write, Simulation::Update];
        const MUTATING: [Simulation; 2] = [Simulation::Write, Simulation::Update];

        match self.scenario {
            Scenario::ReadOnly => Simulation::Read,
            Scenario::Crud if self.pool.is_empty() => {
                MUTATING[self.rng.random_range(0..MUTATING.len())]
            }
            Scenario::Crud => ALL[self.rng.random_range(0..ALL.len())],
        }
    }

    /// Reads a random existing item, retrying if it cannot be found.
    ///
    /// Only the duration of the last attempt is recorded.
    async fn read(&mut self, record: &mut MetricsRecord) -> StoreResult<()> {
        let Some(key) = self.pool.sample(&mut self.rng) else {
            record.mark_failed();
            tracing::warn!("no partition keys available to read");
            return Ok(());
        };

        let ops = &self.ops;
        let outcome = retry(
            MAX_ATTEMPTS,
            move |attempt| {
                tracing::trace!(%key, attempt, "reading existing item");
                timed(ops.fetch(key))
            },
            |(_, result)| !matches!(result, Ok(None)),
        )
        .await;

        let (attempts, (elapsed, result)) = match outcome {
            Outcome::Satisfied { value, attempts } => (attempts, value),
            Outcome::Exhausted { last, attempts } => (attempts, last),
        };

        if settle_read(key, record, elapsed, result)?.is_none() {
            record.mark_failed();
            tracing::warn!(%key, attempts, "existing item could not be found");
        }
        Ok(())
    }

    async fn write(&mut self, record: &mut MetricsRecord) -> StoreResult<()> {
        let (id, _) = self.ops.create(&mut self.rng, record).await?;
        self.ops.confirm_created(&id, record).await?;

        self.ops.delete(&id, record).await?;
        self.ops.confirm_deleted(&id, record).await?;
        Ok(())
    }

    async fn update(&mut self, record: &mut MetricsRecord) -> StoreResult<()> {
        let (id, item) = self.ops.create(&mut self.rng, record).await?;
        self.ops.confirm_created(&id, record).await?;

        let previous = item.tracked_value();
        self.ops
            .overwrite(&id, previous, &mut self.rng, record)
            .await?;
        self.ops.confirm_updated(&id, previous, record).await?;

        self.ops.delete(&id, record).await?;
        self.ops.confirm_deleted(&id, record).await?;
        Ok(())
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or_default()
}
