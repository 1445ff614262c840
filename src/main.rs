use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};

mod audio;
mod config;
mod display;

use audio::{SourceMode, WindowKind};
use config::Config;
use display::DisplayMode;

#[derive(Parser, Debug)]
#[command(name = "spectrascope")]
#[command(author, version, about = "Real-time audio spectrum and equalizer display")]
pub struct Args {
    /// Config file path (defaults to ~/.config/spectrascope/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write a commented default config file and exit
    #[arg(long)]
    init_config: bool,

    /// Sample source: capture (microphone) or playback (file)
    #[arg(short, long)]
    source: Option<SourceMode>,

    /// Audio file to play in playback mode
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// PulseAudio device name
    #[arg(short, long)]
    device: Option<String>,

    /// Samples per analyzed frame (power of two)
    #[arg(long)]
    buffer_size: Option<usize>,

    /// Number of equalizer bands
    #[arg(short, long)]
    bands: Option<usize>,

    /// Analysis ticks per second
    #[arg(long)]
    fps: Option<f64>,

    /// Window applied before the FFT
    #[arg(long)]
    window: Option<WindowKind>,

    /// Graph refreshes per second
    #[arg(long)]
    refresh: Option<f64>,

    /// Playback gain
    #[arg(short, long)]
    volume: Option<f32>,

    /// Display mode: terminal or headless
    #[arg(short, long)]
    mode: Option<DisplayMode>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // The log level depends on the display mode, which the file may set
    let (mut config, config_error) = match &args.config {
        Some(path) => (
            Config::load(path).with_context(|| format!("Failed to load config {}", path.display()))?,
            None,
        ),
        None => match Config::load_from_default_path() {
            Ok(config) => (config.unwrap_or_default(), None),
            Err(e) => (Config::default(), Some(e)),
        },
    };
    config.merge_args(&args);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(config.display.mode.default_log_filter().parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Some(e) = config_error {
        warn!("{:#}. Using defaults.", e);
    }

    if args.init_config {
        let path = Config::init_default_config()?;
        println!("Wrote default config to {}", path.display());
        return Ok(());
    }

    config.validate().context("Invalid configuration")?;

    info!(
        "Starting Spectrascope: {:?} source, {:?} display",
        config.audio.source, config.display.mode
    );

    match config.display.mode {
        DisplayMode::Terminal => display::terminal::run(config).await?,
        DisplayMode::Headless => display::headless::run(config).await?,
    }

    Ok(())
}
