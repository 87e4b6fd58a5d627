pub mod config;
pub mod dataset;
pub mod error;
pub mod firmware;
pub mod persistence;
pub mod simulation;
pub mod tracefile;

pub mod prelude {
    pub use crate::config::{parse_hex_key, Args, Config, MemoryLayout};
    pub use crate::dataset::{emulated_target, DatasetGenerator, DatasetSummary, PlaintextSource};
    pub use crate::error::{KeyError, Result, SimulatorError};
    pub use crate::firmware::FirmwareImage;
    pub use crate::persistence::{parse_trace_filename, trace_filename, TraceWriter};
    pub use crate::simulation::cpu::Cpu;
    pub use crate::simulation::{
        Block, HarnessHooks, MachineSnapshot, ProtocolViolation, RunDiagnostics, RunRecord,
        Target, TraceHarness, BLOCK_SIZE,
    };
    pub use crate::tracefile::{CipherMode, TraceEntry, Tracefile};
}
