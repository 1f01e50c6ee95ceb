use std::path::Path;

use anyhow::{Context, Result};
use pwm_audio::{PlayerConfig, StreamConfig};
use serde::Deserialize;

use crate::cli::Args;

/// `pwm-play` configuration file. Every table and field is optional.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct CliConfig {
    pub player: PlayerConfig,
    pub stream: StreamConfig,
    pub monitor: MonitorConfig,
}

/// Sound card rendering of the PWM output.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitorConfig {
    pub enabled: bool,
    /// Output device substring; default device when unset.
    pub device: Option<String>,
    /// Corner of the emulated RC low-pass. `0` disables filtering.
    pub rc_cutoff_hz: f32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            device: None,
            rc_cutoff_hz: 4_000.0,
        }
    }
}

impl CliConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg = toml::from_str::<CliConfig>(&raw)
            .with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }

    /// Command-line flags win over file values.
    pub fn apply_args(&mut self, args: &Args) {
        let player = &mut self.player;
        if let Some(rate) = args.rate {
            player.sample_rate_hz = rate;
        }
        if let Some(format) = args.format {
            player.format = format;
        }
        if let Some(volume) = args.volume {
            player.volume = volume;
        }
        if let Some(pin) = args.pin {
            player.pin = pin;
        }
        if let Some(freq) = args.pwm_freq {
            player.pwm_base_freq_hz = freq;
        }
        if let Some(bits) = args.resolution {
            player.pwm_resolution_bits = bits;
        }

        if let Some(chunk) = args.chunk_bytes {
            self.stream.chunk_bytes = chunk;
        }
        if let Some(chunks) = args.ring_chunks {
            self.stream.ring_chunks = chunks;
        }

        if let Some(device) = normalize_device_name(args.device.clone()) {
            self.monitor.device = Some(device);
        }
        if let Some(cutoff) = args.rc_cutoff_hz {
            self.monitor.rc_cutoff_hz = cutoff;
        }
        if args.no_monitor {
            self.monitor.enabled = false;
        }
    }
}

fn normalize_device_name(device: Option<String>) -> Option<String> {
    device.and_then(|name| {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use pwm_audio::SampleFormat;
    use std::time::Duration;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg: CliConfig = toml::from_str("").unwrap();
        assert_eq!(cfg, CliConfig::default());
        assert_eq!(cfg.player.sample_rate_hz, 8_000);
        assert_eq!(cfg.stream.chunk_bytes, 1024);
        assert!(cfg.monitor.enabled);
    }

    #[test]
    fn parses_partial_tables() {
        let cfg: CliConfig = toml::from_str(
            r#"
            [player]
            pin = 25
            format = "s16le"
            volume = 0.25

            [stream]
            ring_chunks = 4
            reader_backoff = 5

            [monitor]
            rc_cutoff_hz = 3000.0
            "#,
        )
        .unwrap();
        assert_eq!(cfg.player.pin, 25);
        assert_eq!(cfg.player.format, SampleFormat::S16_LE);
        assert_eq!(cfg.player.pwm_resolution_bits, 8);
        assert_eq!(cfg.stream.ring_chunks, 4);
        assert_eq!(cfg.stream.reader_backoff, Duration::from_millis(5));
        assert_eq!(cfg.stream.stop_poll, Duration::from_millis(1));
        assert_eq!(cfg.monitor.rc_cutoff_hz, 3000.0);
    }

    #[test]
    fn rejects_unknown_format() {
        assert!(toml::from_str::<CliConfig>("[player]\nformat = \"f32\"").is_err());
    }

    #[test]
    fn flags_override_file_values() {
        let mut cfg: CliConfig = toml::from_str("[player]\nsample_rate_hz = 11025\npin = 4").unwrap();
        let args = Args::try_parse_from([
            "pwm-play",
            "--rate",
            "16000",
            "--device",
            "  USB DAC ",
            "--no-monitor",
            "a.raw",
        ])
        .unwrap();
        cfg.apply_args(&args);

        assert_eq!(cfg.player.sample_rate_hz, 16_000);
        assert_eq!(cfg.player.pin, 4);
        assert_eq!(cfg.monitor.device.as_deref(), Some("USB DAC"));
        assert!(!cfg.monitor.enabled);
    }

    #[test]
    fn normalize_device_name_trims_and_drops_empty() {
        assert_eq!(normalize_device_name(None), None);
        assert_eq!(normalize_device_name(Some("  ".to_string())), None);
        assert_eq!(
            normalize_device_name(Some("  USB  DAC ".to_string())),
            Some("USB  DAC".to_string())
        );
    }
}
