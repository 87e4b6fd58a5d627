//! Error types of the trace simulator.
//!
//! Only fatal conditions are errors. Protocol violations, saturated samples
//! and truncated traces are reported through [`crate::simulation::RunDiagnostics`]
//! and never abort a dataset.

use std::path::PathBuf;
use thiserror::Error;
use unicorn_engine::unicorn_const::uc_error;

/// Reasons a hex key string is rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("length not divisible by 2")]
    OddLength,
    #[error("too long, can only handle up to {max} bytes")]
    TooLong { max: usize },
    #[error("digit at offset {offset} invalid")]
    InvalidDigit { offset: usize },
}

/// Fatal errors of the simulator
#[derive(Debug, Error)]
pub enum SimulatorError {
    /// Invalid option value or configuration file
    #[error("Configuration error: {0}")]
    Config(String),

    /// Key given on the command line or in the configuration file is malformed
    #[error("Could not parse \"{input}\" as a hex string: {reason}")]
    InvalidKey { input: String, reason: KeyError },

    /// Firmware image cannot be loaded
    #[error("Firmware error: {0}")]
    Firmware(String),

    /// Emulator setup failed
    #[error("Emulator error: {0:?}")]
    Emulator(uc_error),

    /// Emulation of a run stopped with a fault
    #[error("Simulation failed during {context}: {error:?} at PC 0x{pc:08X}")]
    Emulation {
        context: &'static str,
        error: uc_error,
        pc: u64,
    },

    /// Instruction cap reached before the firmware issued its exit
    #[error("Target did not exit within {limit} instructions")]
    NoExit { limit: usize },

    /// Emulation ended without the firmware issuing its exit
    #[error("Emulation stopped before the target issued its exit")]
    StoppedWithoutExit,

    /// Plaintext source could not deliver random bytes
    #[error("Random source unavailable: {0}")]
    RandomSource(String),

    /// Output directory or trace file could not be created or written
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Output path exceeds the file system limit
    #[error("Output path {path} exceeds {max} bytes")]
    PathTooLong { path: String, max: usize },

    /// Combined tracefile could not be encoded or decoded
    #[error("{}: {source}", .path.display())]
    Tracefile {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl From<uc_error> for SimulatorError {
    fn from(error: uc_error) -> Self {
        SimulatorError::Emulator(error)
    }
}

/// Result type of the simulator
pub type Result<T> = std::result::Result<T, SimulatorError>;
