//! # Dataset Generation
//!
//! Driver loop producing one labeled trace per run. Runs are strictly
//! sequential: run `i + 1` starts only after the trace of run `i` is on disk.

use crate::config::Config;
use crate::error::{Result, SimulatorError};
use crate::firmware::FirmwareImage;
use crate::persistence::TraceWriter;
use crate::simulation::cpu::Cpu;
use crate::simulation::{Block, RunDiagnostics, Target, TraceHarness, BLOCK_SIZE};
use log::{debug, info};
use rand::rngs::{OsRng, StdRng};
use rand::{RngCore, SeedableRng, TryRngCore};
use std::path::PathBuf;

/// Load the configured firmware into a fresh emulator with a trace harness
pub fn emulated_target(config: &Config) -> Result<Cpu<'static, TraceHarness>> {
    let firmware = FirmwareImage::load(&config.firmware, &config.memory)?;
    info!(
        "Loaded {} with {} segment(s)",
        config.firmware.display(),
        firmware.segments.len()
    );
    let harness = TraceHarness::new(config.memory.ram_size, config.trace_capacity);
    Cpu::new(firmware, config.memory, harness, config.max_instructions)
}

/// Source of the per-run plaintexts
#[derive(Debug)]
pub enum PlaintextSource {
    /// Operating system randomness
    Os,
    /// Reproducible sequence
    Seeded(StdRng),
}

impl PlaintextSource {
    pub fn new(seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => PlaintextSource::Seeded(StdRng::seed_from_u64(seed)),
            None => PlaintextSource::Os,
        }
    }

    /// Draw the next uniformly random block
    pub fn next_block(&mut self) -> Result<Block> {
        let mut block = [0u8; BLOCK_SIZE];
        match self {
            PlaintextSource::Os => OsRng
                .try_fill_bytes(&mut block)
                .map_err(|e| SimulatorError::RandomSource(e.to_string()))?,
            PlaintextSource::Seeded(rng) => rng.fill_bytes(&mut block),
        }
        Ok(block)
    }
}

/// Totals over all runs of a dataset
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetSummary {
    pub traces_written: usize,
    pub total_samples: usize,
    pub saturated_samples: usize,
    pub truncated_runs: usize,
    pub protocol_violations: usize,
    pub unknown_markers: usize,
}

impl DatasetSummary {
    fn accumulate(&mut self, trace_len: usize, diagnostics: &RunDiagnostics) {
        self.traces_written += 1;
        self.total_samples += trace_len;
        self.saturated_samples += diagnostics.saturated_samples;
        self.truncated_runs += usize::from(diagnostics.truncated);
        self.protocol_violations += diagnostics.violations.len();
        self.unknown_markers += diagnostics.unknown_markers.len();
    }

    /// True if no run reported any condition
    pub fn is_clean(&self) -> bool {
        self.saturated_samples == 0
            && self.truncated_runs == 0
            && self.protocol_violations == 0
            && self.unknown_markers == 0
    }
}

/// Drives a target through `trace_count` runs and persists every trace.
pub struct DatasetGenerator<'c, T: Target<TraceHarness>> {
    config: &'c Config,
    target: T,
    writer: TraceWriter,
    plaintexts: PlaintextSource,
    summary: DatasetSummary,
}

impl<'c, T: Target<TraceHarness>> DatasetGenerator<'c, T> {
    /// Creates a generator writing into the configured output directory.
    ///
    /// # Arguments
    ///
    /// * `config` - Resolved configuration, key and trace count are taken from here.
    /// * `target` - Emulated target with a registered [`TraceHarness`].
    ///
    /// # Returns
    ///
    /// * `Ok(Self)` - Output directory exists and is ready.
    /// * `Err(SimulatorError::Io)` - Output directory could not be created.
    pub fn new(config: &'c Config, target: T) -> Result<Self> {
        Ok(Self {
            config,
            target,
            writer: TraceWriter::create(&config.output_directory)?,
            plaintexts: PlaintextSource::new(config.seed),
            summary: DatasetSummary::default(),
        })
    }

    /// Generate all traces.
    ///
    /// Any fatal error aborts immediately, traces written so far stay on disk.
    pub fn run(&mut self) -> Result<DatasetSummary> {
        for trace_no in 0..self.config.trace_count {
            let plaintext = self.plaintexts.next_block()?;
            self.run_once(trace_no, plaintext)?;
        }
        Ok(self.summary.clone())
    }

    /// Execute a single run with the given plaintext and persist its trace
    pub fn run_once(&mut self, trace_no: usize, plaintext: Block) -> Result<PathBuf> {
        self.target.hooks_mut().start_run(self.config.key, plaintext);
        self.target.reset()?;
        self.target.run_to_completion()?;

        let harness = self.target.hooks_mut();
        harness.finish_run();
        let record = harness.record();
        let path = self.writer.write(&record)?;
        info!("{}", path.display());
        debug!(
            "Run {trace_no}: {} samples over {} steps",
            record.trace_len(),
            harness.measured_steps()
        );
        self.summary
            .accumulate(record.trace_len(), harness.diagnostics());
        Ok(path)
    }

    pub fn summary(&self) -> &DatasetSummary {
        &self.summary
    }

    pub fn target(&self) -> &T {
        &self.target
    }
}
