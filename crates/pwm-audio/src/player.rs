//! Playback controller.
//!
//! [`PwmAudioPlayer`] owns one output (a PWM channel plus its periodic timer) and at most one
//! playback session. A session is:
//! - an open file, handed to the storage reader thread
//! - the ring, primed before the clock starts
//! - the sample clock, ticking on the timer
//!
//! Sessions never overlap: every entry point that starts or reconfigures playback fully tears
//! down the previous session first. Natural end-of-stream is raised by the clock (which also
//! stops its timer) and completed lazily by the next call into the player, or by [`poll`].
//!
//! [`poll`]: PwmAudioPlayer::poll

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};

use crate::clock::{ClockCounters, SampleClock};
use crate::config::{PlayerConfig, StreamConfig, sample_period_us};
use crate::duty::{DutyMapper, clamp_gain};
use crate::format::SampleFormat;
use crate::hal::{PeriodicTimer, PwmOutput, Storage, TickHandler};
use crate::reader::{self, ReaderHandle};
use crate::ring::{FillOutcome, Producer, RingBuffer};
use crate::status::PlayerStatus;

/// Controller state. See the module docs for transitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayerState {
    /// No file open, clock and reader stopped, duty at silence.
    Idle,
    /// Opening and priming a file.
    Starting,
    Playing,
    /// Tearing down, or the stream ended and teardown is pending.
    Stopping,
}

/// Configured output, present after a successful `begin`.
struct Output<P: PwmOutput> {
    clock: Arc<SampleClock<P>>,
    tick: TickHandler,
    pin: u32,
}

struct Session {
    path: PathBuf,
    format: SampleFormat,
    active: Arc<AtomicBool>,
    reader: ReaderHandle,
    started: Instant,
}

/// PWM PCM player over a storage, a PWM channel and a periodic timer.
pub struct PwmAudioPlayer<S: Storage, P: PwmOutput, T: PeriodicTimer> {
    storage: S,
    pwm: Arc<P>,
    timer: T,
    stream: StreamConfig,
    ring: Arc<RingBuffer>,
    output: Option<Output<P>>,
    session: Option<Session>,
    state: PlayerState,
    sample_rate_hz: u32,
    period: Duration,
    volume: f32,
    format: SampleFormat,
}

impl<S: Storage, P: PwmOutput, T: PeriodicTimer> PwmAudioPlayer<S, P, T> {
    /// Construct an uninitialized player: 8 kHz, full volume, unsigned 8-bit.
    ///
    /// `stream` is normalized; the ring is allocated here and reused by every session.
    pub fn new(storage: S, pwm: Arc<P>, timer: T, stream: StreamConfig) -> Self {
        let defaults = PlayerConfig::default();
        let stream = stream.normalized();
        let ring = Arc::new(RingBuffer::new(stream.ring_capacity()));
        Self {
            storage,
            pwm,
            timer,
            stream,
            ring,
            output: None,
            session: None,
            state: PlayerState::Idle,
            sample_rate_hz: defaults.sample_rate_hz,
            period: Duration::from_micros(u64::from(1_000_000 / defaults.sample_rate_hz)),
            volume: defaults.volume,
            format: defaults.format,
        }
    }

    /// Apply a whole [`PlayerConfig`]: format, volume and sample rate, then `begin`.
    pub fn configure(&mut self, cfg: &PlayerConfig) -> Result<()> {
        self.set_format(cfg.format);
        self.set_volume(cfg.volume);
        self.set_sample_rate(cfg.sample_rate_hz)?;
        self.begin(cfg.pin, cfg.pwm_base_freq_hz, cfg.pwm_resolution_bits)
    }

    /// Configure the PWM channel and attach it to `pin`. Leaves the duty at silence.
    ///
    /// Can be called again to re-target the output; any active session is stopped first.
    /// On failure the player is left uninitialized.
    pub fn begin(&mut self, pin: u32, base_freq_hz: u32, resolution_bits: u8) -> Result<()> {
        let mapper = DutyMapper::new(resolution_bits).context("invalid PWM resolution")?;
        if base_freq_hz == 0 {
            bail!("PWM base frequency must be > 0");
        }

        self.stop();
        self.output = None;
        self.pwm
            .configure(pin, base_freq_hz, resolution_bits)
            .with_context(|| format!("configure PWM on pin {pin}"))?;

        let clock = Arc::new(SampleClock::new(self.ring.clone(), self.pwm.clone(), mapper));
        clock.set_gain(self.volume);
        let tick: TickHandler = {
            let clock = clock.clone();
            Arc::new(move || clock.tick())
        };
        self.pwm.write_duty(mapper.silence());
        self.output = Some(Output { clock, tick, pin });

        tracing::info!(
            pin,
            base_freq_hz,
            resolution_bits,
            max_duty = mapper.max_duty(),
            "pwm output ready"
        );
        Ok(())
    }

    /// Change the sample clock rate. A running clock is restarted at the new period without
    /// touching buffered audio.
    pub fn set_sample_rate(&mut self, hz: u32) -> Result<()> {
        let period_us = sample_period_us(hz)?;
        self.reap_finished();

        self.sample_rate_hz = hz;
        self.period = Duration::from_micros(u64::from(period_us));

        if self.session.is_some() && self.timer.is_running() {
            let Some(tick) = self.output.as_ref().map(|o| o.tick.clone()) else {
                return Ok(());
            };
            self.timer.stop();
            if let Err(e) = self.timer.start_periodic(self.period, tick) {
                self.stop();
                return Err(e).with_context(|| format!("restart sample clock at {hz} Hz"));
            }
            tracing::info!(rate_hz = hz, period_us, "sample clock retimed");
        }
        Ok(())
    }

    /// Set the linear gain, clamped to [0, 1]. NaN mutes. Applies from the next sample.
    pub fn set_volume(&mut self, gain: f32) {
        self.reap_finished();
        self.volume = clamp_gain(gain);
        if let Some(output) = &self.output {
            output.clock.set_gain(self.volume);
        }
    }

    /// Set the format used by [`play_file`](Self::play_file).
    pub fn set_format(&mut self, format: SampleFormat) {
        self.reap_finished();
        self.format = format;
    }

    /// Play `path` in the default format.
    pub fn play_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let format = self.format;
        self.play_file_as(path, format)
    }

    /// Play `path` as `format`, replacing any current session.
    pub fn play_file_as(&mut self, path: impl AsRef<Path>, format: SampleFormat) -> Result<()> {
        let path = path.as_ref();
        self.stop();

        let Some((clock, tick)) = self.output.as_ref().map(|o| (o.clock.clone(), o.tick.clone()))
        else {
            bail!("player not initialized: call begin() first");
        };
        if self.storage.is_dir(path) {
            bail!("{} is a directory", path.display());
        }
        let mut file = self
            .storage
            .open(path)
            .with_context(|| format!("open {}", path.display()))?;

        self.state = PlayerState::Starting;
        self.ring.reset();
        let Some(mut producer) = self.ring.producer() else {
            self.state = PlayerState::Idle;
            bail!("ring write side still claimed by a previous reader");
        };

        let primed = match prime(&mut producer, &mut file, self.stream.chunk_bytes) {
            Ok(n) => n,
            Err(e) => {
                self.ring.reset();
                self.state = PlayerState::Idle;
                return Err(e).with_context(|| format!("prime {}", path.display()));
            }
        };
        if primed < format.bytes_per_sample() {
            self.ring.reset();
            self.state = PlayerState::Idle;
            bail!("{}: no whole {format} sample", path.display());
        }

        clock.arm(format);
        let active = Arc::new(AtomicBool::new(true));
        let reader = match reader::spawn(file, producer, active.clone(), &self.stream) {
            Ok(r) => r,
            Err(e) => {
                clock.disarm();
                self.ring.reset();
                self.state = PlayerState::Idle;
                return Err(e);
            }
        };
        self.session = Some(Session {
            path: path.to_path_buf(),
            format,
            active,
            reader,
            started: Instant::now(),
        });

        if let Err(e) = self.timer.start_periodic(self.period, tick) {
            self.stop();
            return Err(e).context("start sample clock");
        }
        self.state = PlayerState::Playing;

        tracing::info!(
            path = %path.display(),
            format = %format,
            rate_hz = self.sample_rate_hz,
            primed,
            "playback started"
        );
        Ok(())
    }

    /// Audio is still being emitted or about to be.
    pub fn is_playing(&self) -> bool {
        let live = matches!(self.state, PlayerState::Starting | PlayerState::Playing)
            && !self.clock_finished();
        live || self.ring.available_to_read() > 0
    }

    /// Stop playback and wait for the reader to exit. Idempotent.
    ///
    /// Once this returns the file is closed, the ring is empty and the duty register holds
    /// silence.
    pub fn stop(&mut self) {
        let Some(session) = self.session.take() else {
            self.state = PlayerState::Idle;
            return;
        };
        self.state = PlayerState::Stopping;

        self.timer.stop();
        if let Some(output) = &self.output {
            output.clock.disarm();
        }
        session.active.store(false, Ordering::Release);
        let exit = session.reader.wait(self.stream.stop_poll);

        self.ring.reset();
        let counters = self.counters();
        if let Some(output) = &self.output {
            self.pwm.write_duty(output.clock.silence());
        }
        self.state = PlayerState::Idle;

        tracing::info!(
            path = %session.path.display(),
            reason = ?exit.map(|e| e.reason),
            bytes_read = exit.map(|e| e.bytes_read).unwrap_or(0),
            played_samples = counters.played_samples,
            underrun_events = counters.underrun_events,
            elapsed_ms = session.started.elapsed().as_millis() as u64,
            "playback stopped"
        );
    }

    /// Complete a natural end-of-stream if one is pending. Returns the resulting state.
    pub fn poll(&mut self) -> PlayerState {
        self.reap_finished();
        self.state()
    }

    pub fn state(&self) -> PlayerState {
        if self.session.is_some() && self.clock_finished() {
            PlayerState::Stopping
        } else {
            self.state
        }
    }

    pub fn status(&self) -> PlayerStatus {
        let counters = self.counters();
        PlayerStatus {
            state: self.state(),
            path: self.session.as_ref().map(|s| s.path.clone()),
            format: self.session.as_ref().map_or(self.format, |s| s.format),
            sample_rate_hz: self.sample_rate_hz,
            volume: self.volume,
            resolution_bits: self.resolution_bits(),
            buffered_bytes: self.ring.available_to_read(),
            buffer_capacity: self.ring.capacity(),
            played_samples: counters.played_samples,
            underrun_samples: counters.underrun_samples,
            underrun_events: counters.underrun_events,
            reader_running: self
                .session
                .as_ref()
                .is_some_and(|s| s.reader.is_running()),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate_hz
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Default format for `play_file`.
    pub fn format(&self) -> SampleFormat {
        self.format
    }

    pub fn resolution_bits(&self) -> Option<u8> {
        self.output
            .as_ref()
            .map(|o| o.clock.mapper().resolution_bits())
    }

    pub fn pin(&self) -> Option<u32> {
        self.output.as_ref().map(|o| o.pin)
    }

    fn clock_finished(&self) -> bool {
        self.output.as_ref().is_some_and(|o| o.clock.is_finished())
    }

    fn counters(&self) -> ClockCounters {
        self.output
            .as_ref()
            .map(|o| o.clock.counters())
            .unwrap_or_default()
    }

    fn reap_finished(&mut self) {
        if self.session.is_some() && self.clock_finished() {
            tracing::debug!("end of stream reached");
            self.stop();
        }
    }
}

impl<S: Storage, P: PwmOutput, T: PeriodicTimer> Drop for PwmAudioPlayer<S, P, T> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Fill the ring from `file` until it is full or the file ends. Returns bytes primed.
fn prime<R: Read>(producer: &mut Producer, file: &mut R, chunk: usize) -> Result<usize> {
    let mut primed = 0;
    loop {
        match producer.fill_from(file, chunk) {
            Ok(FillOutcome::Filled(n)) => primed += n,
            Ok(FillOutcome::Full | FillOutcome::EndOfStream) => return Ok(primed),
            Ok(FillOutcome::Stale) => bail!("ring reset while priming"),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(anyhow!(e)),
        }
    }
}
