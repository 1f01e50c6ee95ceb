//! Volume scaling and sample → PWM duty conversion.
//!
//! Pure and allocation-free; called once per tick from the sample clock.

use anyhow::{Result, bail};

use crate::format::SampleFormat;

/// Lowest PWM resolution accepted by [`DutyMapper::new`].
pub const MIN_RESOLUTION_BITS: u8 = 2;
/// Highest PWM resolution accepted by [`DutyMapper::new`].
pub const MAX_RESOLUTION_BITS: u8 = 15;

/// Clamp a user-supplied gain into `[0, 1]`. NaN is treated as silence.
pub fn clamp_gain(gain: f32) -> f32 {
    if gain.is_nan() { 0.0 } else { gain.clamp(0.0, 1.0) }
}

/// Apply `gain` to a signed deviation, rounding half away from zero and clamping back into the
/// format's representable range.
#[inline]
pub fn scale_volume(deviation: i32, gain: f32, format: SampleFormat) -> i32 {
    let half = format.half_scale();
    let scaled = deviation as f32 * gain;
    let rounded = if scaled >= 0.0 {
        (scaled + 0.5) as i32
    } else {
        (scaled - 0.5) as i32
    };
    rounded.clamp(-half, half - 1)
}

/// Linear mapping from signed sample deviation to a PWM duty value.
///
/// The scale pivots on `mid = 2^(bits-1)`: silence lands exactly on `mid` for every format,
/// the most negative sample on `0`, and the most positive on `2^bits - 1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DutyMapper {
    resolution_bits: u8,
    max_duty: u32,
    mid_duty: u32,
}

impl DutyMapper {
    /// Build a mapper for a PWM resolution in `[2, 15]` bits.
    pub fn new(resolution_bits: u8) -> Result<Self> {
        if !(MIN_RESOLUTION_BITS..=MAX_RESOLUTION_BITS).contains(&resolution_bits) {
            bail!(
                "PWM resolution {resolution_bits} bits outside [{MIN_RESOLUTION_BITS}, {MAX_RESOLUTION_BITS}]"
            );
        }
        Ok(Self {
            resolution_bits,
            max_duty: (1u32 << resolution_bits) - 1,
            mid_duty: 1u32 << (resolution_bits - 1),
        })
    }

    pub fn resolution_bits(&self) -> u8 {
        self.resolution_bits
    }

    pub fn max_duty(&self) -> u32 {
        self.max_duty
    }

    /// Duty value written while nothing is playing.
    pub fn silence(&self) -> u32 {
        self.mid_duty
    }

    /// Map a deviation in `[-half, half - 1]` to `[0, max_duty]`.
    #[inline]
    pub fn duty_for(&self, deviation: i32, half: i32) -> u32 {
        let half = half as u64;
        let mid = self.mid_duty as u64;
        if deviation >= 0 {
            let span = (self.max_duty - self.mid_duty) as u64;
            let full = half - 1;
            let up = (deviation as u64 * span + full / 2) / full;
            (mid + up.min(span)) as u32
        } else {
            let down = ((-deviation) as u64 * mid + half / 2) / half;
            (mid - down.min(mid)) as u32
        }
    }

    /// Decode, scale by `gain`, and map one raw sample.
    #[inline]
    pub fn map(&self, raw: &[u8], format: SampleFormat, gain: f32) -> u32 {
        let deviation = scale_volume(format.deviation(raw), gain, format);
        self.duty_for(deviation, format.half_scale())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_resolution() {
        assert!(DutyMapper::new(0).is_err());
        assert!(DutyMapper::new(1).is_err());
        assert!(DutyMapper::new(16).is_err());
        assert!(DutyMapper::new(2).is_ok());
        assert!(DutyMapper::new(15).is_ok());
    }

    #[test]
    fn unsigned_8_bit_extremes_hit_duty_range_ends() {
        for bits in MIN_RESOLUTION_BITS..=MAX_RESOLUTION_BITS {
            let m = DutyMapper::new(bits).unwrap();
            let max = (1u32 << bits) - 1;
            assert_eq!(m.map(&[0], SampleFormat::U8, 1.0), 0, "bits={bits}");
            assert_eq!(m.map(&[255], SampleFormat::U8, 1.0), max, "bits={bits}");
            let mid = m.map(&[128], SampleFormat::U8, 1.0);
            assert!(mid == max / 2 || mid == max / 2 + 1, "bits={bits} mid={mid}");
        }
    }

    #[test]
    fn eight_bit_resolution_is_identity_for_u8() {
        let m = DutyMapper::new(8).unwrap();
        for s in 0..=255u8 {
            assert_eq!(m.map(&[s], SampleFormat::U8, 1.0), s as u32);
        }
    }

    #[test]
    fn silence_is_identical_across_formats() {
        for bits in MIN_RESOLUTION_BITS..=MAX_RESOLUTION_BITS {
            let m = DutyMapper::new(bits).unwrap();
            for gain in [0.0, 0.25, 1.0] {
                let u8_silence = m.map(&[128], SampleFormat::U8, gain);
                let s16_silence = m.map(&[0, 0], SampleFormat::S16_LE, gain);
                assert_eq!(u8_silence, s16_silence);
                assert_eq!(u8_silence, m.silence());
            }
        }
    }

    #[test]
    fn zero_volume_is_constant_silence() {
        let m = DutyMapper::new(10).unwrap();
        for s in [0u8, 1, 64, 127, 128, 200, 255] {
            assert_eq!(m.map(&[s], SampleFormat::U8, 0.0), m.silence());
        }
        for s in [i16::MIN, -1, 1, i16::MAX] {
            assert_eq!(m.map(&s.to_le_bytes(), SampleFormat::S16_LE, 0.0), m.silence());
        }
    }

    #[test]
    fn sixteen_bit_extremes_hit_duty_range_ends() {
        let m = DutyMapper::new(10).unwrap();
        assert_eq!(m.map(&i16::MIN.to_le_bytes(), SampleFormat::S16_LE, 1.0), 0);
        assert_eq!(m.map(&i16::MAX.to_le_bytes(), SampleFormat::S16_LE, 1.0), 1023);
    }

    #[test]
    fn mapping_is_monotonic() {
        let m = DutyMapper::new(12).unwrap();
        let mut last = 0;
        for s in (i16::MIN as i32..=i16::MAX as i32).step_by(97) {
            let duty = m.map(&(s as i16).to_le_bytes(), SampleFormat::S16_LE, 1.0);
            assert!(duty >= last);
            last = duty;
        }
    }

    #[test]
    fn volume_rounds_half_away_from_zero() {
        let f = SampleFormat::U8;
        assert_eq!(scale_volume(3, 0.5, f), 2);
        assert_eq!(scale_volume(-3, 0.5, f), -2);
        assert_eq!(scale_volume(-128, 1.0, f), -128);
        assert_eq!(scale_volume(127, 1.0, f), 127);
    }

    #[test]
    fn half_volume_halves_the_swing() {
        let m = DutyMapper::new(8).unwrap();
        assert_eq!(m.map(&[0], SampleFormat::U8, 0.5), 64);
        assert_eq!(m.map(&[255], SampleFormat::U8, 0.5), 192);
    }

    #[test]
    fn clamp_gain_bounds_input() {
        assert_eq!(clamp_gain(-1.0), 0.0);
        assert_eq!(clamp_gain(2.5), 1.0);
        assert_eq!(clamp_gain(0.3), 0.3);
        assert_eq!(clamp_gain(f32::NAN), 0.0);
    }
}
