//! Hardware collaborators consumed by the player.
//!
//! Board code implements these for its filesystem, PWM channel and periodic timer.
//! [`crate::host`] has std-backed versions.

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

/// Outcome of one sample clock tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClockTick {
    Continue,
    /// Stream drained; the timer should stop itself.
    Finished,
}

/// Callback run by a [`PeriodicTimer`] once per period.
pub type TickHandler = Arc<dyn Fn() -> ClockTick + Send + Sync>;

/// Read-only file storage (e.g. a mounted flash filesystem).
pub trait Storage: Send + Sync {
    /// Closing a file is dropping it.
    type File: io::Read + Send + 'static;

    fn is_dir(&self, path: &Path) -> bool;

    fn open(&self, path: &Path) -> io::Result<Self::File>;
}

/// A PWM channel used as a DAC.
pub trait PwmOutput: Send + Sync + 'static {
    /// Set carrier frequency and resolution and attach the channel to `pin`.
    fn configure(&self, pin: u32, base_freq_hz: u32, resolution_bits: u8) -> Result<()>;

    /// Write the duty register. Called from the timer context; must not block.
    fn write_duty(&self, duty: u32);
}

/// A periodic timer hosting the sample clock.
pub trait PeriodicTimer: Send {
    /// Start invoking `handler` every `period`. Stops on its own when the handler returns
    /// [`ClockTick::Finished`].
    fn start_periodic(&mut self, period: Duration, handler: TickHandler) -> Result<()>;

    /// Stop the timer. No handler invocation is in flight or pending once this returns.
    fn stop(&mut self);

    fn is_running(&self) -> bool;
}
