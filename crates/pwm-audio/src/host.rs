//! std-backed collaborators for running the player on a desktop host.

use std::fs::File;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::hal::{ClockTick, PeriodicTimer, PwmOutput, Storage, TickHandler};

/// Directory mounted as the player's filesystem root.
///
/// Absolute paths resolve under the mount root; `..` components are dropped so a path cannot
/// leave it.
#[derive(Clone, Debug)]
pub struct StdStorage {
    root: PathBuf,
}

impl StdStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, path: &Path) -> PathBuf {
        let mut out = self.root.clone();
        for part in path.components() {
            if let Component::Normal(p) = part {
                out.push(p);
            }
        }
        out
    }
}

impl Storage for StdStorage {
    type File = File;

    fn is_dir(&self, path: &Path) -> bool {
        self.resolve(path).is_dir()
    }

    fn open(&self, path: &Path) -> io::Result<File> {
        File::open(self.resolve(path))
    }
}

/// Periodic timer backed by a dedicated thread.
///
/// Ticks are scheduled against absolute deadlines so sleep overshoot does not accumulate into
/// a slower rate. If the thread falls far behind it resynchronizes instead of bursting.
#[derive(Default)]
pub struct ThreadTimer {
    run: Option<TimerRun>,
}

struct TimerRun {
    stop: Arc<AtomicBool>,
    exited: Arc<AtomicBool>,
    join: thread::JoinHandle<()>,
}

const MAX_LAG_PERIODS: u32 = 64;

impl ThreadTimer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PeriodicTimer for ThreadTimer {
    fn start_periodic(&mut self, period: Duration, handler: TickHandler) -> Result<()> {
        self.stop();

        let stop = Arc::new(AtomicBool::new(false));
        let exited = Arc::new(AtomicBool::new(false));
        let stop_for_thread = stop.clone();
        let exited_for_thread = exited.clone();

        let join = thread::Builder::new()
            .name("pwm-audio-clock".to_string())
            .spawn(move || {
                run_ticks(period, &handler, &stop_for_thread);
                exited_for_thread.store(true, Ordering::Release);
            })
            .context("spawn sample clock thread")?;

        self.run = Some(TimerRun { stop, exited, join });
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(run) = self.run.take() {
            run.stop.store(true, Ordering::Release);
            let _ = run.join.join();
        }
    }

    fn is_running(&self) -> bool {
        self.run
            .as_ref()
            .is_some_and(|r| !r.exited.load(Ordering::Acquire))
    }
}

impl Drop for ThreadTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_ticks(period: Duration, handler: &TickHandler, stop: &AtomicBool) {
    let mut next = Instant::now() + period;
    loop {
        let now = Instant::now();
        if next > now {
            thread::sleep(next - now);
        }
        if stop.load(Ordering::Acquire) {
            return;
        }
        if handler() == ClockTick::Finished {
            return;
        }
        next += period;
        let now = Instant::now();
        if now > next + period * MAX_LAG_PERIODS {
            next = now;
        }
    }
}

/// PWM that latches the last duty value for other threads to read.
#[derive(Debug, Default)]
pub struct LatchedPwm {
    pin: AtomicU32,
    base_freq_hz: AtomicU32,
    resolution_bits: AtomicU8,
    duty: AtomicU32,
    writes: AtomicU64,
}

impl LatchedPwm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn duty(&self) -> u32 {
        self.duty.load(Ordering::Relaxed)
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn pin(&self) -> u32 {
        self.pin.load(Ordering::Relaxed)
    }

    pub fn base_freq_hz(&self) -> u32 {
        self.base_freq_hz.load(Ordering::Relaxed)
    }

    /// `0` until configured.
    pub fn resolution_bits(&self) -> u8 {
        self.resolution_bits.load(Ordering::Relaxed)
    }

    /// Latched duty as a level around the PWM midpoint: `0.0` is silence, `-1.0` is duty 0.
    pub fn level(&self) -> f32 {
        let bits = self.resolution_bits();
        if bits == 0 {
            return 0.0;
        }
        let mid = (1u32 << (bits - 1)) as f32;
        (self.duty() as f32 - mid) / mid
    }
}

impl PwmOutput for LatchedPwm {
    fn configure(&self, pin: u32, base_freq_hz: u32, resolution_bits: u8) -> Result<()> {
        self.pin.store(pin, Ordering::Relaxed);
        self.base_freq_hz.store(base_freq_hz, Ordering::Relaxed);
        self.resolution_bits.store(resolution_bits, Ordering::Relaxed);
        Ok(())
    }

    #[inline]
    fn write_duty(&self, duty: u32) {
        self.duty.store(duty, Ordering::Relaxed);
        self.writes.fetch_add(1, Ordering::Relaxed);
    }
}
