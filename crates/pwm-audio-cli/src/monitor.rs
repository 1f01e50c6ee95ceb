//! Audio monitor: renders the latched PWM duty on a sound card.
//!
//! The CPAL callback samples [`LatchedPwm::level`] once per output frame and runs it through a
//! one-pole low-pass standing in for the RC filter a board would have on the PWM pin.
//!
//! ## Real-time constraints
//! The callback only reads atomics; it never locks or allocates.

use std::sync::Arc;

use anyhow::{Result, anyhow};
use cpal::traits::{DeviceTrait, StreamTrait};
use pwm_audio::host::LatchedPwm;

use crate::config::MonitorConfig;
use crate::device;

/// One-pole RC low-pass: `y += alpha * (x - y)` with `alpha = dt / (RC + dt)`.
#[derive(Clone, Copy, Debug)]
pub struct RcFilter {
    alpha: f32,
    y: f32,
}

impl RcFilter {
    /// `cutoff_hz <= 0` passes the input through.
    pub fn new(cutoff_hz: f32, sample_rate: u32) -> Self {
        let alpha = if cutoff_hz > 0.0 && sample_rate > 0 {
            let rc = 1.0 / (2.0 * std::f32::consts::PI * cutoff_hz);
            let dt = 1.0 / sample_rate as f32;
            dt / (rc + dt)
        } else {
            1.0
        };
        Self { alpha, y: 0.0 }
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    #[inline]
    pub fn step(&mut self, x: f32) -> f32 {
        self.y += self.alpha * (x - self.y);
        self.y
    }
}

/// Open the configured output device and start rendering `pwm`. Keep the stream alive for as
/// long as audio should be heard.
pub fn start(cfg: &MonitorConfig, pwm: Arc<LatchedPwm>) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = device::pick_device(&host, cfg.device.as_deref())?;
    let supported = device.default_output_config()?;
    let config: cpal::StreamConfig = supported.clone().into();

    tracing::info!(
        device = %device.description()?,
        rate_hz = config.sample_rate,
        channels = config.channels,
        rc_cutoff_hz = cfg.rc_cutoff_hz,
        "monitor output"
    );

    let stream = build_monitor_stream(
        &device,
        &config,
        supported.sample_format(),
        pwm,
        cfg.rc_cutoff_hz,
    )?;
    stream.play()?;
    Ok(stream)
}

/// Build a CPAL output stream that plays the latched PWM level on every channel.
pub fn build_monitor_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    pwm: Arc<LatchedPwm>,
    rc_cutoff_hz: f32,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, pwm, rc_cutoff_hz),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, pwm, rc_cutoff_hz),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, pwm, rc_cutoff_hz),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, pwm, rc_cutoff_hz),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    pwm: Arc<LatchedPwm>,
    rc_cutoff_hz: f32,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels = (config.channels as usize).max(1);
    let mut filter = RcFilter::new(rc_cutoff_hz, config.sample_rate);
    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            for frame in data.chunks_mut(channels) {
                let y = filter.step(pwm.level());
                let sample = <T as cpal::Sample>::from_sample::<f32>(y);
                frame.fill(sample);
            }
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}
