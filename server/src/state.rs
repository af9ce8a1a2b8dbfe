//! Worker state definitions.

/// Worker operational state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Constructed, loop not started.
    Starting,
    /// Loop is running ticks.
    Running,
    /// Shutdown requested; the current tick finishes first.
    ShuttingDown,
    /// Loop has exited.
    Stopped,
}
