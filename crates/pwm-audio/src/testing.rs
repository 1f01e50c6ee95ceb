//! In-memory collaborators for unit tests.

use std::collections::{HashMap, HashSet};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};

use crate::hal::{ClockTick, PeriodicTimer, PwmOutput, Storage, TickHandler};

/// Poll `cond` every millisecond for up to five seconds.
pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    cond()
}

/// PWM that records every duty write.
#[derive(Default)]
pub struct RecordingPwm {
    duties: Mutex<Vec<u32>>,
    configured: Mutex<Option<(u32, u32, u8)>>,
    fail_configure: AtomicBool,
}

impl RecordingPwm {
    pub fn duties(&self) -> Vec<u32> {
        self.duties.lock().unwrap().clone()
    }

    pub fn last_duty(&self) -> Option<u32> {
        self.duties.lock().unwrap().last().copied()
    }

    pub fn configured(&self) -> Option<(u32, u32, u8)> {
        *self.configured.lock().unwrap()
    }

    pub fn fail_configure(&self, fail: bool) {
        self.fail_configure.store(fail, Ordering::SeqCst);
    }
}

impl PwmOutput for RecordingPwm {
    fn configure(&self, pin: u32, base_freq_hz: u32, resolution_bits: u8) -> Result<()> {
        if self.fail_configure.load(Ordering::SeqCst) {
            bail!("ledc channel unavailable");
        }
        *self.configured.lock().unwrap() = Some((pin, base_freq_hz, resolution_bits));
        Ok(())
    }

    fn write_duty(&self, duty: u32) {
        self.duties.lock().unwrap().push(duty);
    }
}

#[derive(Default)]
struct ManualState {
    handler: Option<TickHandler>,
    period: Option<Duration>,
    starts: usize,
    fail_next_start: bool,
}

/// Timer whose ticks are fired by the test through a [`ManualTimerHandle`].
pub struct ManualTimer {
    state: Arc<Mutex<ManualState>>,
}

#[derive(Clone)]
pub struct ManualTimerHandle {
    state: Arc<Mutex<ManualState>>,
}

impl ManualTimer {
    pub fn new() -> (Self, ManualTimerHandle) {
        let state = Arc::new(Mutex::new(ManualState::default()));
        (
            Self {
                state: state.clone(),
            },
            ManualTimerHandle { state },
        )
    }
}

impl PeriodicTimer for ManualTimer {
    fn start_periodic(&mut self, period: Duration, handler: TickHandler) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if std::mem::take(&mut state.fail_next_start) {
            bail!("timer alarm unavailable");
        }
        state.handler = Some(handler);
        state.period = Some(period);
        state.starts += 1;
        Ok(())
    }

    fn stop(&mut self) {
        self.state.lock().unwrap().handler = None;
    }

    fn is_running(&self) -> bool {
        self.state.lock().unwrap().handler.is_some()
    }
}

impl ManualTimerHandle {
    /// Run up to `n` ticks. Returns how many ran; a `Finished` tick stops the timer.
    pub fn fire(&self, n: usize) -> usize {
        let mut fired = 0;
        for _ in 0..n {
            let Some(handler) = self.state.lock().unwrap().handler.clone() else {
                break;
            };
            fired += 1;
            if handler() == ClockTick::Finished {
                self.state.lock().unwrap().handler = None;
                break;
            }
        }
        fired
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().unwrap().handler.is_some()
    }

    pub fn period(&self) -> Option<Duration> {
        self.state.lock().unwrap().period
    }

    pub fn starts(&self) -> usize {
        self.state.lock().unwrap().starts
    }

    pub fn fail_next_start(&self) {
        self.state.lock().unwrap().fail_next_start = true;
    }
}

#[derive(Default)]
struct MemShared {
    open_files: AtomicUsize,
    opens: AtomicUsize,
    max_read: AtomicUsize,
    blocked_reads: AtomicUsize,
    gate_closed: Mutex<bool>,
    gate_cv: Condvar,
}

impl MemShared {
    fn wait_gate(&self) {
        let mut closed = self.gate_closed.lock().unwrap();
        if !*closed {
            return;
        }
        self.blocked_reads.fetch_add(1, Ordering::SeqCst);
        while *closed {
            closed = self.gate_cv.wait(closed).unwrap();
        }
        self.blocked_reads.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-memory filesystem. Clones share files and counters.
#[derive(Clone, Default)]
pub struct MemStorage {
    files: Arc<Mutex<HashMap<PathBuf, Arc<[u8]>>>>,
    dirs: Arc<Mutex<HashSet<PathBuf>>>,
    shared: Arc<MemShared>,
}

impl MemStorage {
    pub fn add_file(&self, path: impl Into<PathBuf>, data: Vec<u8>) {
        self.files.lock().unwrap().insert(path.into(), data.into());
    }

    pub fn add_dir(&self, path: impl Into<PathBuf>) {
        self.dirs.lock().unwrap().insert(path.into());
    }

    /// Files currently open (not yet dropped).
    pub fn open_files(&self) -> usize {
        self.shared.open_files.load(Ordering::SeqCst)
    }

    pub fn opens(&self) -> usize {
        self.shared.opens.load(Ordering::SeqCst)
    }

    /// Cap every read at `n` bytes; `0` removes the cap.
    pub fn set_max_read(&self, n: usize) {
        self.shared.max_read.store(n, Ordering::SeqCst);
    }

    /// While closed, reads block until the gate opens.
    pub fn set_gate(&self, open: bool) {
        *self.shared.gate_closed.lock().unwrap() = !open;
        self.shared.gate_cv.notify_all();
    }

    pub fn blocked_reads(&self) -> usize {
        self.shared.blocked_reads.load(Ordering::SeqCst)
    }
}

impl Storage for MemStorage {
    type File = MemFile;

    fn is_dir(&self, path: &Path) -> bool {
        self.dirs.lock().unwrap().contains(path)
    }

    fn open(&self, path: &Path) -> io::Result<MemFile> {
        if self.is_dir(path) {
            return Err(io::Error::other("is a directory"));
        }
        let data = self
            .files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;
        self.shared.opens.fetch_add(1, Ordering::SeqCst);
        self.shared.open_files.fetch_add(1, Ordering::SeqCst);
        Ok(MemFile {
            data,
            pos: 0,
            shared: Some(self.shared.clone()),
            fail_after: None,
        })
    }
}

/// Open in-memory file. Dropping it closes it.
pub struct MemFile {
    data: Arc<[u8]>,
    pos: usize,
    shared: Option<Arc<MemShared>>,
    fail_after: Option<usize>,
}

impl MemFile {
    /// Detached file, not tracked by any [`MemStorage`].
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: data.into(),
            pos: 0,
            shared: None,
            fail_after: None,
        }
    }

    /// Fail every read once `n` bytes have been returned.
    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }
}

impl Read for MemFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut cap = buf.len();
        if let Some(shared) = &self.shared {
            shared.wait_gate();
            let max = shared.max_read.load(Ordering::SeqCst);
            if max > 0 {
                cap = cap.min(max);
            }
        }
        if let Some(limit) = self.fail_after {
            if self.pos >= limit {
                return Err(io::Error::other("flash read failed"));
            }
        }
        let n = cap.min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl Drop for MemFile {
    fn drop(&mut self) {
        if let Some(shared) = &self.shared {
            shared.open_files.fetch_sub(1, Ordering::SeqCst);
        }
    }
}
