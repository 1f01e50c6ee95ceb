//! Sample clock: the periodic real-time callback.
//!
//! Each tick pops one sample from the ring, applies the current gain, maps it to a duty value
//! and writes the PWM register. When the ring is empty the tick emits silence; if the reader
//! has also reached end-of-stream the tick raises the finish trigger for the controller.
//!
//! ## Real-time constraints
//! `tick` is O(1), allocation-free and never logs. Its only lock is the ring cursor, held for
//! a 1–2 byte copy.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};

use crate::duty::DutyMapper;
use crate::format::SampleFormat;
use crate::hal::{ClockTick, PwmOutput};
use crate::ring::{Pop, RingBuffer};

/// Counters accumulated by the clock over one session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClockCounters {
    /// Samples taken from the ring and emitted.
    pub played_samples: u64,
    /// Ticks that emitted silence because the reader was behind.
    pub underrun_samples: u64,
    /// Distinct underrun stretches.
    pub underrun_events: u64,
}

pub struct SampleClock<P: PwmOutput> {
    ring: Arc<RingBuffer>,
    pwm: Arc<P>,
    mapper: DutyMapper,
    armed: AtomicBool,
    finished: AtomicBool,
    gain_bits: AtomicU32,
    format: AtomicU8,
    in_underrun: AtomicBool,
    played_samples: AtomicU64,
    underrun_samples: AtomicU64,
    underrun_events: AtomicU64,
}

impl<P: PwmOutput> SampleClock<P> {
    pub fn new(ring: Arc<RingBuffer>, pwm: Arc<P>, mapper: DutyMapper) -> Self {
        Self {
            ring,
            pwm,
            mapper,
            armed: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            gain_bits: AtomicU32::new(1.0f32.to_bits()),
            format: AtomicU8::new(SampleFormat::U8.to_bits()),
            in_underrun: AtomicBool::new(false),
            played_samples: AtomicU64::new(0),
            underrun_samples: AtomicU64::new(0),
            underrun_events: AtomicU64::new(0),
        }
    }

    pub fn mapper(&self) -> DutyMapper {
        self.mapper
    }

    pub fn silence(&self) -> u32 {
        self.mapper.silence()
    }

    /// Gain used from the next tick on. Callers clamp beforehand.
    pub fn set_gain(&self, gain: f32) {
        self.gain_bits.store(gain.to_bits(), Ordering::Relaxed);
    }

    pub fn gain(&self) -> f32 {
        f32::from_bits(self.gain_bits.load(Ordering::Relaxed))
    }

    pub fn format(&self) -> SampleFormat {
        SampleFormat::from_bits(self.format.load(Ordering::Relaxed))
    }

    /// Prepare for a new session: set its format, clear the finish trigger and counters.
    pub fn arm(&self, format: SampleFormat) {
        self.format.store(format.to_bits(), Ordering::Relaxed);
        self.finished.store(false, Ordering::Relaxed);
        self.in_underrun.store(false, Ordering::Relaxed);
        self.played_samples.store(0, Ordering::Relaxed);
        self.underrun_samples.store(0, Ordering::Relaxed);
        self.underrun_events.store(0, Ordering::Relaxed);
        self.armed.store(true, Ordering::Release);
    }

    /// Make further ticks no-ops.
    pub fn disarm(&self) {
        self.armed.store(false, Ordering::Release);
    }

    /// Finish trigger: the stream ended and the ring drained.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub fn counters(&self) -> ClockCounters {
        ClockCounters {
            played_samples: self.played_samples.load(Ordering::Relaxed),
            underrun_samples: self.underrun_samples.load(Ordering::Relaxed),
            underrun_events: self.underrun_events.load(Ordering::Relaxed),
        }
    }

    /// Emit one sample.
    #[inline]
    pub fn tick(&self) -> ClockTick {
        if !self.armed.load(Ordering::Acquire) {
            return ClockTick::Finished;
        }

        let format = self.format();
        let width = format.bytes_per_sample();
        let mut raw = [0u8; 2];

        let outcome = match self.ring.pop_sample(&mut raw[..width]) {
            Pop::Sample => {
                self.in_underrun.store(false, Ordering::Relaxed);
                self.played_samples.fetch_add(1, Ordering::Relaxed);
                ClockTick::Continue
            }
            Pop::Underrun => {
                raw = format.silence();
                if !self.in_underrun.swap(true, Ordering::Relaxed) {
                    self.underrun_events.fetch_add(1, Ordering::Relaxed);
                }
                self.underrun_samples.fetch_add(1, Ordering::Relaxed);
                ClockTick::Continue
            }
            Pop::Ended => {
                raw = format.silence();
                self.finished.store(true, Ordering::Release);
                ClockTick::Finished
            }
        };

        self.pwm
            .write_duty(self.mapper.map(&raw[..width], format, self.gain()));
        outcome
    }
}
