//! Headerless PCM sample formats.
//!
//! A [`SampleFormat`] describes how raw mono bytes decode into a signed deviation from the
//! format's silence midpoint. Everything downstream (volume, duty mapping) works on that
//! deviation, so silence is `0` for every format.

use std::fmt;
use std::str::FromStr;

use anyhow::{Result, bail};
use serde::{Deserialize, Deserializer};

/// Sample container width.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleWidth {
    Eight,
    Sixteen,
}

impl SampleWidth {
    pub const fn bits(self) -> u32 {
        match self {
            SampleWidth::Eight => 8,
            SampleWidth::Sixteen => 16,
        }
    }

    pub const fn bytes(self) -> usize {
        match self {
            SampleWidth::Eight => 1,
            SampleWidth::Sixteen => 2,
        }
    }
}

/// Mono PCM format descriptor. Immutable for the duration of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SampleFormat {
    pub width: SampleWidth,
    pub signed: bool,
    /// Only meaningful for 16-bit samples.
    pub little_endian: bool,
}

impl SampleFormat {
    /// 8-bit unsigned, silence at 128.
    pub const U8: SampleFormat = SampleFormat {
        width: SampleWidth::Eight,
        signed: false,
        little_endian: true,
    };

    /// 16-bit signed little-endian, silence at 0.
    pub const S16_LE: SampleFormat = SampleFormat {
        width: SampleWidth::Sixteen,
        signed: true,
        little_endian: true,
    };

    pub const fn bytes_per_sample(self) -> usize {
        self.width.bytes()
    }

    /// Half of the representable range: 128 for 8-bit, 32768 for 16-bit.
    pub const fn half_scale(self) -> i32 {
        1 << (self.width.bits() - 1)
    }

    /// Decode one raw sample into a signed deviation in `[-half_scale, half_scale - 1]`.
    ///
    /// `raw` must hold at least [`bytes_per_sample`](Self::bytes_per_sample) bytes.
    #[inline]
    pub fn deviation(self, raw: &[u8]) -> i32 {
        match self.width {
            SampleWidth::Eight => {
                if self.signed {
                    raw[0] as i8 as i32
                } else {
                    raw[0] as i32 - 128
                }
            }
            SampleWidth::Sixteen => {
                let bytes = [raw[0], raw[1]];
                if self.signed {
                    let v = if self.little_endian {
                        i16::from_le_bytes(bytes)
                    } else {
                        i16::from_be_bytes(bytes)
                    };
                    v as i32
                } else {
                    let v = if self.little_endian {
                        u16::from_le_bytes(bytes)
                    } else {
                        u16::from_be_bytes(bytes)
                    };
                    v as i32 - 32768
                }
            }
        }
    }

    /// Raw bytes of the silence sample (the format's midpoint).
    pub fn silence(self) -> [u8; 2] {
        match (self.width, self.signed) {
            (SampleWidth::Eight, false) => [128, 0],
            (SampleWidth::Eight, true) => [0, 0],
            (SampleWidth::Sixteen, true) => [0, 0],
            (SampleWidth::Sixteen, false) => {
                if self.little_endian {
                    32768u16.to_le_bytes()
                } else {
                    32768u16.to_be_bytes()
                }
            }
        }
    }

    /// Compact encoding used to share the active format with the sample clock.
    pub(crate) fn to_bits(self) -> u8 {
        let width = match self.width {
            SampleWidth::Eight => 0,
            SampleWidth::Sixteen => 1,
        };
        width | (self.signed as u8) << 1 | (self.little_endian as u8) << 2
    }

    pub(crate) fn from_bits(bits: u8) -> Self {
        Self {
            width: if bits & 1 == 0 {
                SampleWidth::Eight
            } else {
                SampleWidth::Sixteen
            },
            signed: bits & 0b10 != 0,
            little_endian: bits & 0b100 != 0,
        }
    }
}

impl Default for SampleFormat {
    fn default() -> Self {
        Self::U8
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.signed { 's' } else { 'u' };
        match self.width {
            SampleWidth::Eight => write!(f, "{sign}8"),
            SampleWidth::Sixteen => {
                let order = if self.little_endian { "le" } else { "be" };
                write!(f, "{sign}16{order}")
            }
        }
    }
}

impl FromStr for SampleFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let format = match s.trim().to_ascii_lowercase().as_str() {
            "u8" => Self::U8,
            "s8" => Self {
                signed: true,
                ..Self::U8
            },
            "s16" | "s16le" => Self::S16_LE,
            "s16be" => Self {
                little_endian: false,
                ..Self::S16_LE
            },
            "u16" | "u16le" => Self {
                signed: false,
                ..Self::S16_LE
            },
            "u16be" => Self {
                signed: false,
                little_endian: false,
                ..Self::S16_LE
            },
            other => bail!("unknown sample format: {other} (expected u8, s8, s16le, s16be, u16le, u16be)"),
        };
        Ok(format)
    }
}

impl<'de> Deserialize<'de> for SampleFormat {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
