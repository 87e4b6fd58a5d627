/// Default number of samples a trace may hold
pub const DEFAULT_TRACE_CAPACITY: usize = 32 * 1024;

/// Result of appending one sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Append {
    /// Sample stored
    Stored,
    /// Buffer became full with this append, sample dropped. Reported once per run.
    Truncated,
    /// Buffer already full or finalized, sample dropped silently
    Dropped,
}

/// Fixed capacity, append-only sample buffer reused across runs.
#[derive(Debug)]
pub struct TraceBuffer {
    samples: Vec<u8>,
    capacity: usize,
    truncated: bool,
    finalized: bool,
}

impl TraceBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
            capacity,
            truncated: false,
            finalized: false,
        }
    }

    /// Add a sample if there is room left
    pub fn append(&mut self, sample: u8) -> Append {
        if self.finalized {
            return Append::Dropped;
        }
        if self.samples.len() < self.capacity {
            self.samples.push(sample);
            return Append::Stored;
        }
        if self.truncated {
            Append::Dropped
        } else {
            self.truncated = true;
            Append::Truncated
        }
    }

    /// Freeze the trace. Returns false if it was already finalized.
    pub fn finalize(&mut self) -> bool {
        !std::mem::replace(&mut self.finalized, true)
    }

    /// Empty the buffer for the next run, keeping the allocation
    pub fn reset(&mut self) {
        self.samples.clear();
        self.truncated = false;
        self.finalized = false;
    }

    pub fn samples(&self) -> &[u8] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }
}
