use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::audio::{SourceMode, WindowKind};
use crate::display::DisplayMode;

/// Configuration values that cannot drive a pipeline
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("buffer_size must be a power of two of at least 2, got {0}")]
    BufferSize(usize),

    #[error("equalizer_size must be positive")]
    EqualizerSize,

    #[error("ring_capacity ({capacity}) must be at least buffer_size ({buffer_size})")]
    RingCapacity { capacity: usize, buffer_size: usize },

    #[error("{name} must be a positive number per second, got {value}")]
    Rate { name: &'static str, value: f64 },

    #[error("volume must be a non-negative number, got {0}")]
    Volume(f32),

    #[error("sample_rate and channels must be positive")]
    Format,

    #[error("playback source selected but no file configured")]
    MissingFile,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub display: DisplayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub source: SourceMode,
    pub device: Option<String>,
    pub sample_rate: u32,
    pub channels: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub buffer_size: usize,
    pub equalizer_size: usize,
    pub ring_capacity: Option<usize>,
    /// Analysis ticks per second
    pub tick_rate: f64,
    pub window: WindowKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub file: Option<PathBuf>,
    pub volume: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub mode: DisplayMode,
    /// Graph refreshes per second
    pub refresh_rate: f64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            source: SourceMode::Playback,
            device: None,
            sample_rate: 44100,
            channels: 2,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            buffer_size: 4096,
            equalizer_size: 20,
            ring_capacity: None,
            tick_rate: 20.0,
            window: WindowKind::Hann,
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            file: None,
            volume: 5.0,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            mode: DisplayMode::Terminal,
            refresh_rate: 20.0,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Get the default XDG config path (~/.config/spectrascope/config.toml)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("spectrascope").join("config.toml"))
    }

    /// Load config from the default XDG path if it exists.
    /// Returns `Ok(None)` when there is no file there.
    pub fn load_from_default_path() -> Result<Option<Self>> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path)
                .map(Some)
                .with_context(|| format!("Failed to parse config at {}", path.display())),
            _ => Ok(None),
        }
    }

    /// Initialize default config file at XDG path, returns the path
    pub fn init_default_config() -> Result<PathBuf> {
        let path = Self::default_path()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(&path, Self::generate_config_template())?;

        Ok(path)
    }

    /// Generate a commented TOML config template
    pub fn generate_config_template() -> String {
        r#"# Spectrascope Configuration
# This file is auto-generated. Edit as needed.

[audio]
# Sample source: "playback" (decode and play a file) or "capture" (microphone)
source = "playback"
# PulseAudio device (omit for the default device)
# device = "alsa_input.pci-0000_00_1f.3.analog-stereo"
# Device sample rate in Hz
sample_rate = 44100
# Device channel count
channels = 2

[analysis]
# Samples per analyzed frame (power of two)
buffer_size = 4096
# Number of equalizer bands
equalizer_size = 20
# Ring buffer capacity in samples (defaults to twice buffer_size)
# ring_capacity = 8192
# Analysis ticks per second
tick_rate = 20.0
# Window applied before the FFT: "hann" or "rectangular"
window = "hann"

[playback]
# Media file to play in playback mode (mp3, flac, wav, ogg, ...)
# file = "/path/to/song.mp3"
# Gain applied to played samples
volume = 5.0

[display]
# Display mode: "terminal" or "headless"
mode = "terminal"
# Graph refreshes per second
refresh_rate = 20.0
"#
        .to_string()
    }

    /// Check every value a pipeline depends on
    pub fn validate(&self) -> Result<(), ConfigError> {
        let analysis = &self.analysis;
        if analysis.buffer_size < 2 || !analysis.buffer_size.is_power_of_two() {
            return Err(ConfigError::BufferSize(analysis.buffer_size));
        }
        if analysis.equalizer_size == 0 {
            return Err(ConfigError::EqualizerSize);
        }
        if let Some(capacity) = analysis.ring_capacity {
            if capacity < analysis.buffer_size {
                return Err(ConfigError::RingCapacity {
                    capacity,
                    buffer_size: analysis.buffer_size,
                });
            }
        }
        check_rate("tick_rate", analysis.tick_rate)?;
        check_rate("refresh_rate", self.display.refresh_rate)?;

        if !self.playback.volume.is_finite() || self.playback.volume < 0.0 {
            return Err(ConfigError::Volume(self.playback.volume));
        }
        if self.audio.sample_rate == 0 || self.audio.channels == 0 {
            return Err(ConfigError::Format);
        }
        if self.audio.source == SourceMode::Playback && self.playback.file.is_none() {
            return Err(ConfigError::MissingFile);
        }
        Ok(())
    }

    /// Merge CLI arguments into config (CLI takes priority)
    pub fn merge_args(&mut self, args: &crate::Args) {
        if let Some(source) = args.source {
            self.audio.source = source;
        }
        if let Some(ref device) = args.device {
            self.audio.device = Some(device.clone());
        }
        if let Some(ref file) = args.file {
            self.playback.file = Some(file.clone());
        }
        if let Some(size) = args.buffer_size {
            self.analysis.buffer_size = size;
        }
        if let Some(bands) = args.bands {
            self.analysis.equalizer_size = bands;
        }
        if let Some(fps) = args.fps {
            self.analysis.tick_rate = fps;
        }
        if let Some(window) = args.window {
            self.analysis.window = window;
        }
        if let Some(volume) = args.volume {
            self.playback.volume = volume;
        }
        if let Some(mode) = args.mode {
            self.display.mode = mode;
        }
        if let Some(refresh) = args.refresh {
            self.display.refresh_rate = refresh;
        }
    }
}

fn check_rate(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Rate { name, value })
    }
}
