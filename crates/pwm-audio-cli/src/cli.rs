use std::path::{Path, PathBuf};

use clap::Parser;
use pwm_audio::SampleFormat;

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("PWM_PLAY_REVISION"),
    ", ",
    env!("PWM_PLAY_BUILD_DAY"),
    ")"
);

/// Play a headerless mono PCM file through an emulated PWM DAC.
#[derive(Parser, Debug)]
#[command(name = "pwm-play", version = VERSION)]
pub struct Args {
    /// Raw PCM file. Relative to `--root` when one is given.
    #[arg(required_unless_present = "list_devices")]
    pub path: Option<PathBuf>,

    /// TOML config with [player], [stream] and [monitor] tables
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory mounted as the player's filesystem (default: the file's directory)
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Sample rate in Hz (not stored in the file)
    #[arg(long)]
    pub rate: Option<u32>,

    /// Sample format: u8, s8, s16le, s16be, u16le, u16be
    #[arg(long)]
    pub format: Option<SampleFormat>,

    /// Linear volume, clamped to 0.0..=1.0
    #[arg(long)]
    pub volume: Option<f32>,

    /// Output pin id
    #[arg(long)]
    pub pin: Option<u32>,

    /// PWM carrier frequency in Hz
    #[arg(long)]
    pub pwm_freq: Option<u32>,

    /// PWM resolution in bits (2-15)
    #[arg(long)]
    pub resolution: Option<u8>,

    /// Storage read size in bytes
    #[arg(long)]
    pub chunk_bytes: Option<usize>,

    /// Ring capacity in chunks
    #[arg(long)]
    pub ring_chunks: Option<usize>,

    /// Monitor on a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Corner frequency of the emulated RC output filter
    #[arg(long)]
    pub rc_cutoff_hz: Option<f32>,

    /// Do not open a sound card; the duty register is only latched
    #[arg(long)]
    pub no_monitor: bool,
}

/// Split the command-line path into a storage root and the path inside it.
pub fn storage_paths(path: &Path, root: Option<&Path>) -> (PathBuf, PathBuf) {
    if let Some(root) = root {
        return (root.to_path_buf(), Path::new("/").join(path));
    }
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let name = path.file_name().map(PathBuf::from).unwrap_or_default();
    (dir, Path::new("/").join(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_paths_mounts_the_parent_directory() {
        let (root, inner) = storage_paths(Path::new("/data/clips/beep.raw"), None);
        assert_eq!(root, PathBuf::from("/data/clips"));
        assert_eq!(inner, PathBuf::from("/beep.raw"));

        let (root, inner) = storage_paths(Path::new("beep.raw"), None);
        assert_eq!(root, PathBuf::from("."));
        assert_eq!(inner, PathBuf::from("/beep.raw"));
    }

    #[test]
    fn storage_paths_uses_explicit_root() {
        let (root, inner) = storage_paths(Path::new("clips/beep.raw"), Some(Path::new("/mnt/flash")));
        assert_eq!(root, PathBuf::from("/mnt/flash"));
        assert_eq!(inner, PathBuf::from("/clips/beep.raw"));
    }

    #[test]
    fn parses_format_and_overrides() {
        let args = Args::try_parse_from([
            "pwm-play",
            "--format",
            "s16le",
            "--rate",
            "16000",
            "--no-monitor",
            "tone.raw",
        ])
        .unwrap();
        assert_eq!(args.format, Some(SampleFormat::S16_LE));
        assert_eq!(args.rate, Some(16_000));
        assert!(args.no_monitor);
        assert_eq!(args.path, Some(PathBuf::from("tone.raw")));
    }

    #[test]
    fn path_is_optional_only_for_list_devices() {
        assert!(Args::try_parse_from(["pwm-play"]).is_err());
        assert!(Args::try_parse_from(["pwm-play", "--list-devices"]).is_ok());
    }
}
