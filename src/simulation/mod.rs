pub mod cpu;
pub mod harness;
pub mod io_bridge;
pub mod power_model;
pub mod record;
pub mod trace_buffer;
pub mod window;

use crate::error::Result;
pub use harness::TraceHarness;
pub use io_bridge::{Block, BLOCK_SIZE};
pub use power_model::{MachineSnapshot, PowerSample};
pub use record::{ProtocolViolation, RunDiagnostics, RunRecord};

/// Hook points the harness exposes to the emulated target.
///
/// Registered once with the target at setup. The target calls them inline
/// while it executes; none of them may fail, problems are recorded by the
/// implementation and surfaced after the run.
pub trait HarnessHooks {
    /// True while per-step snapshots are wanted. Lets the target skip the
    /// snapshot capture outside of the measurement window.
    fn is_measuring(&self) -> bool;

    /// Called for every executed instruction with the resulting machine state
    fn on_step(&mut self, state: &MachineSnapshot);

    /// Called when the firmware emits a synchronization marker
    fn on_marker(&mut self, marker: u32, state: &MachineSnapshot);

    /// Firmware requests input, `buffer` has the requested length
    fn on_read(&mut self, buffer: &mut [u8]);

    /// Firmware emits output
    fn on_write(&mut self, data: &[u8]);

    /// Firmware terminates the run
    fn on_exit(&mut self, status: u32);
}

/// Execution control of an emulated target.
///
/// This is the only interface the dataset generator needs from the
/// emulator. The hooks `H` are owned by the target for its whole lifetime.
pub trait Target<H: HarnessHooks> {
    /// Bring memory and registers back to the power-on state
    fn reset(&mut self) -> Result<()>;

    /// Execute until the firmware issues its exit
    fn run_to_completion(&mut self) -> Result<()>;

    fn hooks(&self) -> &H;

    fn hooks_mut(&mut self) -> &mut H;
}
