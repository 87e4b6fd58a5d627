use super::io_bridge::{Block, IoBridge};
use super::power_model::{MachineSnapshot, PowerModel};
use super::record::{ProtocolViolation, RunDiagnostics, RunRecord};
use super::trace_buffer::{Append, TraceBuffer};
use super::window::{MarkerEvent, MeasurementWindow};
use super::HarnessHooks;
use log::{debug, trace, warn};

/// Leakage trace harness.
///
/// Owns all per-run state: I/O bridge, measurement window, power model
/// history and the trace buffer. Buffers are allocated once and reset
/// between runs.
#[derive(Debug)]
pub struct TraceHarness {
    io: IoBridge,
    window: MeasurementWindow,
    power_model: PowerModel,
    trace: TraceBuffer,
    diagnostics: RunDiagnostics,
    steps: usize,
}

impl TraceHarness {
    /// Creates a harness for `memory_size` bytes of working memory and
    /// traces of at most `trace_capacity` samples.
    pub fn new(memory_size: usize, trace_capacity: usize) -> Self {
        Self {
            io: IoBridge::new(),
            window: MeasurementWindow::new(),
            power_model: PowerModel::new(memory_size),
            trace: TraceBuffer::new(trace_capacity),
            diagnostics: RunDiagnostics::default(),
            steps: 0,
        }
    }

    /// Reset all run state and load the inputs of the next run
    pub fn start_run(&mut self, key: Block, plaintext: Block) {
        self.io.start_run(key, plaintext);
        self.window.reset();
        self.power_model.reset();
        self.trace.reset();
        self.diagnostics.clear();
        self.steps = 0;
    }

    /// Close the run after the target stopped.
    ///
    /// Finalizes the trace if the window never closed and reports windows
    /// that were left open or never opened.
    pub fn finish_run(&mut self) {
        if self.window.is_armed() {
            self.violation(ProtocolViolation::WindowNotClosed);
        } else if !self.window.is_closed() {
            self.violation(ProtocolViolation::WindowNeverArmed);
        }
        self.trace.finalize();
    }

    /// Labeled result of the current run
    pub fn record(&self) -> RunRecord<'_> {
        RunRecord {
            key: self.io.key(),
            plaintext: self.io.plaintext(),
            ciphertext: self.io.ciphertext(),
            trace: self.trace.samples(),
        }
    }

    pub fn diagnostics(&self) -> &RunDiagnostics {
        &self.diagnostics
    }

    pub fn is_finished(&self) -> bool {
        self.io.is_finished()
    }

    /// Per-step calls received while the window was armed
    pub fn measured_steps(&self) -> usize {
        self.steps
    }

    pub fn trace(&self) -> &TraceBuffer {
        &self.trace
    }

    fn violation(&mut self, violation: ProtocolViolation) {
        warn!("{violation}");
        self.diagnostics.violations.push(violation);
    }
}

impl HarnessHooks for TraceHarness {
    fn is_measuring(&self) -> bool {
        self.window.is_armed()
    }

    fn on_step(&mut self, state: &MachineSnapshot) {
        if !self.window.is_armed() {
            return;
        }
        self.steps += 1;
        let sample = self.power_model.step(state);
        match self.trace.append(sample.value()) {
            // Only samples that end up in the trace count as clipped
            Append::Stored if sample.is_saturated() => {
                warn!(
                    "Register hamming weight clipped from {}",
                    sample.transitions()
                );
                self.diagnostics.saturated_samples += 1;
            }
            Append::Stored => (),
            Append::Truncated => {
                warn!("Trace truncated at {} samples", self.trace.capacity());
                self.diagnostics.truncated = true;
            }
            Append::Dropped => trace!("Sample dropped"),
        }
    }

    fn on_marker(&mut self, marker: u32, state: &MachineSnapshot) {
        match self.window.on_marker(marker) {
            MarkerEvent::Armed => {
                debug!("Measurement window armed");
                self.power_model.rearm(state);
            }
            MarkerEvent::Disarmed => {
                debug!("Measurement window closed after {} steps", self.steps);
                self.trace.finalize();
            }
            MarkerEvent::Ignored => (),
            MarkerEvent::Unknown(marker) => {
                warn!("Unexpected marker {marker}.");
                self.diagnostics.unknown_markers.push(marker);
            }
            MarkerEvent::RearmedWhileArmed => {
                self.violation(ProtocolViolation::RearmedWhileArmed)
            }
            MarkerEvent::WindowAlreadyClosed => {
                self.violation(ProtocolViolation::WindowAlreadyClosed)
            }
            MarkerEvent::DisarmedWhileDisarmed => {
                self.violation(ProtocolViolation::DisarmedWhileDisarmed)
            }
        }
    }

    fn on_read(&mut self, buffer: &mut [u8]) {
        if let Err(violation) = self.io.read(buffer) {
            self.violation(violation);
        }
    }

    fn on_write(&mut self, data: &[u8]) {
        if let Err(violation) = self.io.write(data) {
            self.violation(violation);
        }
    }

    fn on_exit(&mut self, status: u32) {
        debug!("Target exit with status {status}");
        if let Err(violation) = self.io.exit(status) {
            self.violation(violation);
        }
    }
}
