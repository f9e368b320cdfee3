/// Worker loop: compute a benchmark, save it under a fresh key, read the
/// container back, repeat.
///
/// ```text
/// Idle -> Computing -> Writing -> ReadingBack -> Idle -> ...
/// ```
///
/// Strictly sequential. A collision is counted and the loop moves on; any
/// error stops the loop and is returned with the state left at the step
/// that failed.
use stddev::BenchParams;
use std::io::Write;
use std::path::PathBuf;
use tracing::info;

use crate::{
    read_output, save, CollectiveWriter, Iterations, KeyBuilder, SaveOptions, SaveOutcome,
    Settings, StoreError,
};

/// Multiplier that spreads per-iteration seeds apart (64-bit golden ratio).
const SEED_STRIDE: u64 = 0x9E37_79B9_7F4A_7C15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Computing,
    Writing,
    ReadingBack,
}

/// Everything one worker needs.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub filename: PathBuf,
    pub group_path: String,
    pub iterations: Iterations,
    pub save: SaveOptions,
    pub bench: BenchParams,
    pub seed: u64,
    /// Print every dataset path during read-back.
    pub verbose: bool,
}

impl WorkerConfig {
    /// A locked worker writing into `settings.address`.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            filename: settings.file.clone(),
            group_path: settings.address.clone(),
            iterations: settings.iterations,
            save: SaveOptions::from_settings(settings),
            bench: BenchParams::default().with_repeats(settings.repeats),
            seed: settings.seed,
            verbose: false,
        }
    }

    /// A lock-free worker for one collective participant.
    pub fn collective(writer: &CollectiveWriter, iterations: Iterations, bench: BenchParams) -> Self {
        Self {
            filename: writer.filename().to_path_buf(),
            group_path: writer.group_path().to_string(),
            iterations,
            save: writer.options().clone(),
            bench,
            seed: writer.seed(),
            verbose: false,
        }
    }
}

/// Totals of one [`Worker::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub iterations: u64,
    pub written: u64,
    pub collisions: u64,
    /// Dataset count seen by the last read-back.
    pub items: usize,
}

#[derive(Debug)]
pub struct Worker {
    config: WorkerConfig,
    keys: KeyBuilder,
    state: WorkerState,
}

impl Worker {
    /// # Errors
    ///
    /// [`StoreError::InvalidConfiguration`] for a zero iteration bound or an
    /// invalid option combination.
    pub fn new(config: WorkerConfig) -> Result<Self, StoreError> {
        if config.iterations == Iterations::Bounded(0) {
            return Err(StoreError::InvalidConfiguration(
                "iteration count must be positive".to_string(),
            ));
        }
        config.save.validate()?;
        Ok(Self {
            config,
            keys: KeyBuilder::new(),
            state: WorkerState::Idle,
        })
    }

    pub fn with_key_builder(mut self, keys: KeyBuilder) -> Self {
        self.keys = keys;
        self
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Runs until the iteration bound is reached. Read-back output goes to
    /// `out`.
    pub fn run<W: Write>(&mut self, out: &mut W) -> Result<WorkerReport, StoreError> {
        let mut report = WorkerReport::default();
        while !self.config.iterations.reached(report.iterations) {
            self.step(report.iterations, &mut report, out)?;
            report.iterations += 1;
        }
        Ok(report)
    }

    fn step<W: Write>(
        &mut self,
        iteration: u64,
        report: &mut WorkerReport,
        out: &mut W,
    ) -> Result<(), StoreError> {
        self.state = WorkerState::Computing;
        info!("status: compute");
        let seed = self.config.seed.wrapping_add(iteration.wrapping_mul(SEED_STRIDE));
        let data = stddev::benchmark(&self.config.bench, seed)?;

        self.state = WorkerState::Writing;
        info!("status: save");
        let leaf = self.keys.next_key();
        match save(
            &data,
            &self.config.filename,
            &self.config.group_path,
            &leaf,
            &self.config.save,
        )? {
            SaveOutcome::Written => report.written += 1,
            SaveOutcome::Collision => report.collisions += 1,
        }

        self.state = WorkerState::ReadingBack;
        let summary = read_output(&self.config.filename, self.config.verbose, out)?;
        report.items = summary.items;
        info!("status: done");

        self.state = WorkerState::Idle;
        Ok(())
    }
}
