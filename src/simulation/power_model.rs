//! # Power Model
//!
//! Bit-transition leakage: one sample is the number of bit positions that
//! changed between two consecutive machine snapshots, over the register
//! file and the complete working memory.

/// Number of processor registers captured per snapshot (R0..R12, SP, LR, PC)
pub const SNAPSHOT_REGISTERS: usize = 16;

/// Largest value a power sample can hold
pub const MAX_SAMPLE: u8 = u8::MAX;

/// Register file and working memory image at one point in simulated time.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MachineSnapshot {
    pub registers: [u32; SNAPSHOT_REGISTERS],
    pub memory: Vec<u8>,
}

impl MachineSnapshot {
    /// Creates a zeroed snapshot covering `memory_size` bytes of working memory
    pub fn new(memory_size: usize) -> Self {
        Self {
            registers: [0; SNAPSHOT_REGISTERS],
            memory: vec![0; memory_size],
        }
    }

    /// Overwrite this snapshot with `other` without reallocating
    ///
    /// The memory image is resized only if the geometry differs.
    pub fn copy_from(&mut self, other: &MachineSnapshot) {
        self.registers = other.registers;
        if self.memory.len() == other.memory.len() {
            self.memory.copy_from_slice(&other.memory);
        } else {
            self.memory.clone_from(&other.memory);
        }
    }

    /// Clear registers and memory, keeping the allocation
    pub fn clear(&mut self) {
        self.registers = [0; SNAPSHOT_REGISTERS];
        self.memory.fill(0);
    }
}

/// One leakage sample, saturated to the `u8` range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PowerSample {
    value: u8,
    transitions: u32,
}

impl PowerSample {
    /// Build a sample from a raw transition count, clipping at 255
    pub fn from_transitions(transitions: u32) -> Self {
        Self {
            value: transitions.min(MAX_SAMPLE as u32) as u8,
            transitions,
        }
    }

    /// Value stored in the trace
    pub fn value(&self) -> u8 {
        self.value
    }

    /// Unclipped number of flipped bits
    pub fn transitions(&self) -> u32 {
        self.transitions
    }

    /// True if the transition count did not fit into a sample
    pub fn is_saturated(&self) -> bool {
        self.transitions > MAX_SAMPLE as u32
    }
}

/// Count bit positions that differ between `previous` and `current`.
///
/// Memory images are compared in 64 bit words, a trailing remainder byte
/// by byte. Both snapshots must have the same memory geometry.
pub fn transition_count(previous: &MachineSnapshot, current: &MachineSnapshot) -> u32 {
    debug_assert_eq!(previous.memory.len(), current.memory.len());

    let registers: u32 = previous
        .registers
        .iter()
        .zip(current.registers.iter())
        .map(|(before, after)| (before ^ after).count_ones())
        .sum();

    let before = previous.memory.chunks_exact(8);
    let after = current.memory.chunks_exact(8);
    let remainder: u32 = before
        .remainder()
        .iter()
        .zip(after.remainder())
        .map(|(before, after)| (before ^ after).count_ones())
        .sum();
    let memory: u32 = before
        .zip(after)
        .map(|(before, after)| {
            let before = u64::from_le_bytes(before.try_into().unwrap_or_default());
            let after = u64::from_le_bytes(after.try_into().unwrap_or_default());
            (before ^ after).count_ones()
        })
        .sum();

    registers + memory + remainder
}

/// Stateful leakage model holding the one-step history.
///
/// The previous snapshot is owned here and overwritten on every step.
#[derive(Debug)]
pub struct PowerModel {
    previous: MachineSnapshot,
}

impl PowerModel {
    pub fn new(memory_size: usize) -> Self {
        Self {
            previous: MachineSnapshot::new(memory_size),
        }
    }

    /// Use `snapshot` as the reference for the next sample
    pub fn rearm(&mut self, snapshot: &MachineSnapshot) {
        self.previous.copy_from(snapshot);
    }

    /// Drop the history so nothing leaks into the next window or run
    pub fn reset(&mut self) {
        self.previous.clear();
    }

    /// Compute the sample for the step that led to `current` and advance
    pub fn step(&mut self, current: &MachineSnapshot) -> PowerSample {
        let sample = PowerSample::from_transitions(transition_count(&self.previous, current));
        self.previous.copy_from(current);
        sample
    }

    pub fn previous(&self) -> &MachineSnapshot {
        &self.previous
    }
}
