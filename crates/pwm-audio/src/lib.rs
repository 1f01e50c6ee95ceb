//! Streams headerless mono PCM files to a PWM channel used as a DAC.

pub mod clock;
pub mod config;
pub mod duty;
pub mod format;
pub mod hal;
pub mod host;
pub mod player;
pub mod reader;
pub mod ring;
pub mod status;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{PlayerConfig, StreamConfig};
pub use format::{SampleFormat, SampleWidth};
pub use hal::{ClockTick, PeriodicTimer, PwmOutput, Storage, TickHandler};
pub use player::{PlayerState, PwmAudioPlayer};
pub use status::PlayerStatus;
