//! pwm-play: plays a headerless mono PCM file through the PWM audio engine on a desktop host.
//!
//! The engine drives a [`LatchedPwm`] at the sample rate; the monitor renders that duty value
//! on a sound card through an emulated RC filter, so what you hear is roughly what the RC stage
//! on a board would output.

mod cli;
mod config;
mod device;
mod monitor;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use pwm_audio::PwmAudioPlayer;
use pwm_audio::host::{LatchedPwm, StdStorage, ThreadTimer};
use tracing_subscriber::EnvFilter;

use crate::config::CliConfig;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const STATUS_INTERVAL: Duration = Duration::from_secs(1);

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,pwm_audio=info,pwm_play=info")
        }))
        .init();

    if args.list_devices {
        let host = cpal::default_host();
        device::list_devices(&host)?;
        return Ok(());
    }

    let mut cfg = match &args.config {
        Some(path) => CliConfig::load(path)?,
        None => CliConfig::default(),
    };
    cfg.apply_args(&args);

    let Some(path) = args.path.as_deref() else {
        anyhow::bail!("no file to play");
    };
    let (root, file) = cli::storage_paths(path, args.root.as_deref());

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = interrupted.clone();
        ctrlc::set_handler(move || interrupted.store(true, Ordering::Relaxed))
            .context("install Ctrl-C handler")?;
    }

    let pwm = Arc::new(LatchedPwm::new());
    let _monitor = if cfg.monitor.enabled {
        Some(monitor::start(&cfg.monitor, pwm.clone())?)
    } else {
        None
    };

    let storage = StdStorage::new(&root);
    tracing::info!(root = %storage.root().display(), "storage mounted");
    let mut player = PwmAudioPlayer::new(storage, pwm.clone(), ThreadTimer::new(), cfg.stream.clone());
    player.configure(&cfg.player)?;
    tracing::info!(
        pin = pwm.pin(),
        base_freq_hz = pwm.base_freq_hz(),
        resolution_bits = pwm.resolution_bits(),
        "output latched"
    );
    player
        .play_file(&file)
        .with_context(|| format!("play {}", path.display()))?;

    let mut last_status = Instant::now();
    while player.is_playing() {
        if interrupted.load(Ordering::Relaxed) {
            tracing::info!("interrupted");
            break;
        }
        std::thread::sleep(POLL_INTERVAL);
        if last_status.elapsed() >= STATUS_INTERVAL {
            tracing::info!(status = %player.status(), "playing");
            last_status = Instant::now();
        }
    }
    player.stop();

    let status = player.status();
    tracing::info!(
        elapsed_ms = status.elapsed_ms(),
        played_samples = status.played_samples,
        underrun_events = status.underrun_events,
        underrun_samples = status.underrun_samples,
        duty_writes = pwm.writes(),
        "playback finished"
    );
    Ok(())
}
