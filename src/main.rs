//! Main application entry point.
//!
//! This module handles:
//! * Command line argument parsing
//! * Logging configuration
//! * Core engine construction and playback
//!
//! # Runtime Behavior
//!
//! The application:
//! 1. Initializes logging from `-q`/`-v` flags and `RUST_LOG`
//! 2. Builds the core engine (settings, plugins, playback)
//! 3. Runs the requested action: play a file, emit a test tone, or
//!    list plugins/devices
//! 4. Shuts down gracefully
//!
//! Exits with status code 0 on success and 1 on any fatal error.

use std::{io::Write, path::PathBuf, process, thread, time::Duration};

use clap::{command, Parser, ValueHint};
use log::{error, info, LevelFilter};

use crescendo::{
    core::{CoreEngine, CoreOptions, DEFAULT_SETTINGS_FILE},
    engine::PlaybackState,
    error::{Error, Result},
    output::{cpal::CpalOutput, AudioOutput},
};

/// Build profile indicator for logging.
#[cfg(debug_assertions)]
const BUILD_PROFILE: &str = "debug";

/// Build profile indicator for logging.
#[cfg(not(debug_assertions))]
const BUILD_PROFILE: &str = "release";

/// Group name for mutually exclusive logging options.
const ARGS_GROUP_LOGGING: &str = "logging";

/// Test tone frequency in Hz.
const TEST_TONE_HZ: f32 = 440.0;

/// Test tone length in seconds.
const TEST_TONE_SECS: u32 = 2;

/// Command line arguments as parsed by `clap`.
///
/// All options can be set via environment variables with the
/// `CRESCENDO_` prefix.
#[derive(Clone, Debug, Default, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Audio file to play
    #[arg(value_hint = ValueHint::FilePath)]
    file: Option<PathBuf>,

    /// Play a 2-second 440 Hz test tone through the default device
    #[arg(long, default_value_t = false)]
    test: bool,

    /// List loaded plugins and exit
    #[arg(long, default_value_t = false)]
    list_plugins: bool,

    /// List audio output devices and exit
    #[arg(long, default_value_t = false)]
    list_devices: bool,

    /// Directory to scan for plugin libraries
    #[arg(long, value_hint = ValueHint::DirPath, env = "CRESCENDO_PLUGIN_DIR")]
    plugin_dir: Option<PathBuf>,

    /// Settings file path
    #[arg(long, value_hint = ValueHint::FilePath, default_value = DEFAULT_SETTINGS_FILE, env = "CRESCENDO_SETTINGS")]
    settings: PathBuf,

    /// Suppress all output except warnings and errors
    #[arg(short, long, default_value_t = false, group = ARGS_GROUP_LOGGING, env = "CRESCENDO_QUIET")]
    quiet: bool,

    /// Enable verbose logging
    ///
    /// Use -v for debug logging
    /// Use -vv for trace logging
    #[arg(short, long, action = clap::ArgAction::Count, group = ARGS_GROUP_LOGGING, env = "CRESCENDO_VERBOSE")]
    verbose: u8,
}

/// Initialize logging system.
///
/// Configures logging based on command line arguments and environment:
/// * `-q` sets Warning level
/// * `-v` sets Debug level
/// * `-vv` sets Trace level
/// * `RUST_LOG` environment variable provides defaults
/// * External crates are limited to Error level unless tracing
fn init_logger(args: &Args) {
    let mut logger = env_logger::Builder::from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    let mut external_level = LevelFilter::Error;
    if args.quiet || args.verbose > 0 {
        let level = match args.verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Debug,
            _ => LevelFilter::max(),
        };

        logger.filter_module(module_path!(), level);
        logger.filter_module("crescendo", level);

        if level == LevelFilter::Trace {
            external_level = LevelFilter::max();
        }
    }

    for external_module in [
        "symphonia",
        "symphonia_bundle_flac",
        "symphonia_bundle_mp3",
        "symphonia_codec_pcm",
        "symphonia_core",
        "symphonia_format_riff",
        "symphonia_metadata",
        "cpal",
    ] {
        logger.filter_module(external_module, external_level);
    }

    logger.init();
}

/// Writes a 16-bit PCM WAV with a sine tone and returns its path.
fn write_test_tone() -> Result<PathBuf> {
    let sample_rate: u32 = 48_000;
    let channels: u16 = 2;
    let frames = sample_rate * TEST_TONE_SECS;
    let data_len = frames * u32::from(channels) * 2;

    let mut bytes = Vec::with_capacity(44 + data_len as usize);
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
    bytes.extend_from_slice(b"WAVE");
    bytes.extend_from_slice(b"fmt ");
    bytes.extend_from_slice(&16_u32.to_le_bytes());
    bytes.extend_from_slice(&1_u16.to_le_bytes()); // PCM
    bytes.extend_from_slice(&channels.to_le_bytes());
    bytes.extend_from_slice(&sample_rate.to_le_bytes());
    bytes.extend_from_slice(&(sample_rate * u32::from(channels) * 2).to_le_bytes());
    bytes.extend_from_slice(&(channels * 2).to_le_bytes());
    bytes.extend_from_slice(&16_u16.to_le_bytes());
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_len.to_le_bytes());

    #[expect(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    for i in 0..frames {
        let t = i as f32 / sample_rate as f32;
        let value = (2.0 * std::f32::consts::PI * TEST_TONE_HZ * t).sin() * 0.5;
        let sample = (value * f32::from(i16::MAX)) as i16;
        for _ in 0..channels {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
    }

    let mut path = std::env::temp_dir();
    path.push("crescendo-test-tone.wav");
    let mut file = std::fs::File::create(&path)?;
    file.write_all(&bytes)?;
    Ok(path)
}

/// Blocks until the engine leaves `Playing`, polling the position.
fn wait_for_completion(core: &CoreEngine) {
    loop {
        thread::sleep(Duration::from_millis(100));
        if core.playback().state() != PlaybackState::Playing {
            break;
        }
    }
}

/// Main application run.
///
/// # Errors
///
/// Returns the first fatal error; the caller maps it to exit code 1.
fn run(args: &Args) -> Result<()> {
    if args.list_devices {
        let output = CpalOutput::new();
        let devices = output.enumerate_devices()?;
        if devices.is_empty() {
            return Err(Error::file_not_found("no audio output devices found"));
        }
        info!("available audio output devices:");
        for device in devices {
            info!(
                "- {} ({} channels, {}){}",
                device.name,
                device.max_channels,
                crescendo::audio::describe_rate(device.default_sample_rate),
                if device.is_default { " (default)" } else { "" }
            );
        }
        return Ok(());
    }

    let mut core = CoreEngine::initialize(CoreOptions {
        settings_path: args.settings.clone(),
        plugin_dir: args.plugin_dir.clone(),
        output: None,
    })?;

    let result = (|| {
        if args.list_plugins {
            info!("loaded plugins:");
            for info in core
                .plugin_host()
                .lock()
                .map_err(|_| Error::invalid_state("plugin host poisoned"))?
                .plugin_infos()
            {
                info!("- {} v{} ({})", info.name, info.version, info.uuid);
            }
            return Ok(());
        }

        if args.test {
            info!("playing {TEST_TONE_SECS} s {TEST_TONE_HZ} Hz test tone");
            let path = write_test_tone()?;
            core.play_file(&path)?;
            wait_for_completion(&core);
            return Ok(());
        }

        if let Some(file) = &args.file {
            core.play_file(file)?;
            info!(
                "playing {} ({} ms)",
                file.display(),
                core.playback().get_duration()
            );
            wait_for_completion(&core);
            return Ok(());
        }

        Err(Error::invalid_parameter(
            "nothing to do; pass a file or see --help",
        ))
    })();

    core.shutdown();
    result
}

/// Application entry point.
///
/// Exits with status code:
/// - 0 for clean shutdown
/// - 1 if an error occurs
fn main() {
    let args = Args::parse();
    init_logger(&args);

    let cmd = command!();
    info!(
        "starting {}/{}; {BUILD_PROFILE}",
        cmd.get_name(),
        cmd.get_version().unwrap_or("UNKNOWN")
    );

    match run(&args) {
        Ok(()) => process::exit(0),
        Err(e) => {
            error!("{e}");
            process::exit(1);
        }
    }
}
