use std::fmt;

use super::io_bridge::{Block, BLOCK_SIZE, SEQUENCE_LENGTH};

/// Firmware and harness disagree on the transfer protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolViolation {
    /// Read at a position where a write or nothing was expected
    UnexpectedRead { position: u32 },
    /// Write at a position where a read or nothing was expected
    UnexpectedWrite { position: u32 },
    /// Ciphertext write shorter than one block
    ShortCiphertext { length: usize },
    /// Exit before all transfers were done
    IncompleteSequence { position: u32 },
    /// Start marker while the window was armed
    RearmedWhileArmed,
    /// Start marker after the window of this run was closed
    WindowAlreadyClosed,
    /// End marker without an open window
    DisarmedWhileDisarmed,
    /// Run ended while the window was still armed
    WindowNotClosed,
    /// Run ended without ever arming the window
    WindowNeverArmed,
}

impl fmt::Display for ProtocolViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolViolation::UnexpectedRead { position } => write!(f, "Unexpected read {position}"),
            ProtocolViolation::UnexpectedWrite { position } => {
                write!(f, "Unexpected write {position}")
            }
            ProtocolViolation::ShortCiphertext { length } => {
                write!(f, "Ciphertext write of {length} bytes, expected {BLOCK_SIZE}")
            }
            ProtocolViolation::IncompleteSequence { position } => write!(
                f,
                "Exit after {position} of {SEQUENCE_LENGTH} transfers"
            ),
            ProtocolViolation::RearmedWhileArmed => write!(f, "Start marker while window armed"),
            ProtocolViolation::WindowAlreadyClosed => {
                write!(f, "Start marker after window was closed")
            }
            ProtocolViolation::DisarmedWhileDisarmed => {
                write!(f, "End marker without open window")
            }
            ProtocolViolation::WindowNotClosed => write!(f, "Run ended with window still armed"),
            ProtocolViolation::WindowNeverArmed => write!(f, "Run ended without measurement window"),
        }
    }
}

/// Non-fatal conditions observed during one run
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunDiagnostics {
    /// Protocol violations in order of occurrence
    pub violations: Vec<ProtocolViolation>,
    /// Marker ids the harness does not know
    pub unknown_markers: Vec<u32>,
    /// Samples clipped to 255
    pub saturated_samples: usize,
    /// Window produced more samples than the trace can hold
    pub truncated: bool,
}

impl RunDiagnostics {
    pub fn clear(&mut self) {
        self.violations.clear();
        self.unknown_markers.clear();
        self.saturated_samples = 0;
        self.truncated = false;
    }

    /// True if the run finished without any reportable condition
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
            && self.unknown_markers.is_empty()
            && self.saturated_samples == 0
            && !self.truncated
    }
}

/// Labeled result of one run, borrowed from the harness until persisted
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunRecord<'a> {
    pub key: &'a Block,
    pub plaintext: &'a Block,
    pub ciphertext: &'a Block,
    pub trace: &'a [u8],
}

impl RunRecord<'_> {
    /// Number of samples collected in the window
    pub fn trace_len(&self) -> usize {
        self.trace.len()
    }
}
