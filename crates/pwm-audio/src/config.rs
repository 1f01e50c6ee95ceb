use std::time::Duration;

use anyhow::{Result, bail};
use serde::Deserialize;

use crate::format::SampleFormat;

/// Output and playback settings applied by [`begin`](crate::player::PwmAudioPlayer::begin),
/// [`set_sample_rate`](crate::player::PwmAudioPlayer::set_sample_rate) and
/// [`set_volume`](crate::player::PwmAudioPlayer::set_volume).
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlayerConfig {
    /// Output pin the PWM channel is attached to.
    pub pin: u32,
    /// PWM carrier frequency in Hz. Should sit well above the RC filter corner.
    pub pwm_base_freq_hz: u32,
    /// PWM duty resolution in bits, 2..=15.
    pub pwm_resolution_bits: u8,
    /// Sample clock rate in Hz. Not stored in the file.
    pub sample_rate_hz: u32,
    /// Linear gain, clamped to [0, 1].
    pub volume: f32,
    /// Format used by `play_file` unless overridden per session.
    pub format: SampleFormat,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            pin: 2,
            pwm_base_freq_hz: 20_000,
            pwm_resolution_bits: 8,
            sample_rate_hz: 8_000,
            volume: 1.0,
            format: SampleFormat::U8,
        }
    }
}

/// Streaming tuning parameters shared by the reader and the controller.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamConfig {
    /// Maximum bytes requested per storage read.
    pub chunk_bytes: usize,
    /// Ring capacity in chunks.
    pub ring_chunks: usize,
    /// Reader sleep when the ring is full.
    #[serde(with = "millis")]
    pub reader_backoff: Duration,
    /// Poll interval while `stop()` waits for the reader to exit.
    #[serde(with = "millis")]
    pub stop_poll: Duration,
}

impl Default for StreamConfig {
    /// Two 1 KiB chunks: a quarter second of 8 kHz u8 audio.
    fn default() -> Self {
        Self {
            chunk_bytes: 1024,
            ring_chunks: 2,
            reader_backoff: Duration::from_millis(1),
            stop_poll: Duration::from_millis(1),
        }
    }
}

impl StreamConfig {
    const MIN_CHUNK_BYTES: usize = 128;
    const MIN_RING_CHUNKS: usize = 2;

    /// Chunk at least 128 bytes and a whole number of 16-bit samples; ring at least two chunks;
    /// non-zero waits.
    pub fn normalized(&self) -> Self {
        let mut chunk = self.chunk_bytes.max(Self::MIN_CHUNK_BYTES);
        chunk += chunk % 2;
        Self {
            chunk_bytes: chunk,
            ring_chunks: self.ring_chunks.max(Self::MIN_RING_CHUNKS),
            reader_backoff: self.reader_backoff.max(Duration::from_micros(100)),
            stop_poll: self.stop_poll.max(Duration::from_micros(100)),
        }
    }

    pub fn ring_capacity(&self) -> usize {
        self.chunk_bytes.saturating_mul(self.ring_chunks)
    }
}

/// Sample clock period in whole microseconds for `hz`.
///
/// Fails for `hz == 0` and for rates above 1 MHz, where the period truncates to zero.
pub fn sample_period_us(hz: u32) -> Result<u32> {
    if hz == 0 {
        bail!("sample rate must be > 0");
    }
    let period = 1_000_000 / hz;
    if period == 0 {
        bail!("sample rate {hz} Hz too high: period rounds to 0 us");
    }
    Ok(period)
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
