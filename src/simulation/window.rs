//! Measurement window: the armed/disarmed gate driven by synchronization markers.

/// Marker that arms the window
pub const START_MARKER: u32 = 1;
/// Marker that disarms the window
pub const END_MARKER: u32 = 2;
/// Marker emitted by the guest runtime outside of any measurement
pub const IDLE_MARKER: u32 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WindowState {
    #[default]
    Disarmed,
    Armed,
}

/// Outcome of a marker delivered to the window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerEvent {
    /// Window opened, snapshot the machine as power model reference
    Armed,
    /// Window closed, trace can be finalized
    Disarmed,
    /// Idle marker, nothing to do
    Ignored,
    /// Marker id without meaning for the harness
    Unknown(u32),
    /// Start marker while the window was already armed
    RearmedWhileArmed,
    /// Start marker after this run's window was closed
    WindowAlreadyClosed,
    /// End marker without an open window
    DisarmedWhileDisarmed,
}

/// Two-state gate, exactly one window per run.
#[derive(Debug, Default)]
pub struct MeasurementWindow {
    state: WindowState,
    closed: bool,
}

impl MeasurementWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a marker. Protocol violations leave the state unchanged.
    pub fn on_marker(&mut self, marker: u32) -> MarkerEvent {
        match (marker, self.state) {
            (START_MARKER, WindowState::Disarmed) if self.closed => MarkerEvent::WindowAlreadyClosed,
            (START_MARKER, WindowState::Disarmed) => {
                self.state = WindowState::Armed;
                MarkerEvent::Armed
            }
            (START_MARKER, WindowState::Armed) => MarkerEvent::RearmedWhileArmed,
            (END_MARKER, WindowState::Armed) => {
                self.state = WindowState::Disarmed;
                self.closed = true;
                MarkerEvent::Disarmed
            }
            (END_MARKER, WindowState::Disarmed) => MarkerEvent::DisarmedWhileDisarmed,
            (IDLE_MARKER, _) => MarkerEvent::Ignored,
            (other, _) => MarkerEvent::Unknown(other),
        }
    }

    pub fn is_armed(&self) -> bool {
        self.state == WindowState::Armed
    }

    /// True once the window of this run was armed and closed again
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn state(&self) -> WindowState {
        self.state
    }

    pub fn reset(&mut self) {
        self.state = WindowState::Disarmed;
        self.closed = false;
    }
}
