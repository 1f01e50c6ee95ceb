use std::fmt;
use std::path::PathBuf;

use crate::format::SampleFormat;
use crate::player::PlayerState;

/// Point-in-time snapshot of a player, returned by
/// [`PwmAudioPlayer::status`](crate::player::PwmAudioPlayer::status).
#[derive(Clone, Debug, PartialEq)]
pub struct PlayerStatus {
    pub state: PlayerState,
    /// File of the current session.
    pub path: Option<PathBuf>,
    /// Format of the current session, or the default format when idle.
    pub format: SampleFormat,
    pub sample_rate_hz: u32,
    pub volume: f32,
    /// `None` until `begin` succeeds.
    pub resolution_bits: Option<u8>,
    /// Bytes waiting in the ring.
    pub buffered_bytes: usize,
    pub buffer_capacity: usize,
    /// Samples emitted from the ring this session.
    pub played_samples: u64,
    /// Silent ticks caused by the reader falling behind.
    pub underrun_samples: u64,
    pub underrun_events: u64,
    pub reader_running: bool,
}

impl PlayerStatus {
    /// Playback position derived from emitted samples.
    pub fn elapsed_ms(&self) -> u64 {
        if self.sample_rate_hz == 0 {
            return 0;
        }
        self.played_samples.saturating_mul(1000) / self.sample_rate_hz as u64
    }

    pub fn buffer_fill_percent(&self) -> u8 {
        if self.buffer_capacity == 0 {
            return 0;
        }
        (self.buffered_bytes.min(self.buffer_capacity) * 100 / self.buffer_capacity) as u8
    }
}

impl fmt::Display for PlayerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} {} @ {} Hz, t={}ms, buf {}% ({}/{}), underruns {} ({} samples)",
            self.state,
            self.format,
            self.sample_rate_hz,
            self.elapsed_ms(),
            self.buffer_fill_percent(),
            self.buffered_bytes,
            self.buffer_capacity,
            self.underrun_events,
            self.underrun_samples,
        )
    }
}
