mod backend;
mod bands;
mod error;
mod fft;
mod file;
mod pipeline;
mod ring;

pub use bands::reduce_to_bands;
pub use fft::WindowKind;
pub use pipeline::{AudioPipeline, PipelineSettings, PipelineState, SourceMode};

use backend::PulseBackend;
use file::AudioFileReader;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::Config;

/// Decibel value reported for bins (and empty bands) with no energy
pub const DB_FLOOR: f32 = -160.0;

/// One analysis tick's output, published as a unit
#[derive(Debug, Clone)]
pub struct Spectra {
    /// Raw samples of the analyzed frame, oldest first
    pub time: Vec<f32>,
    /// One-sided dB magnitude spectrum, `time.len() / 2` bins
    pub fft: Vec<f32>,
    /// Maximum of each equalizer band
    pub fft_max: Vec<f32>,
    /// Tick counter; 0 before the first tick
    pub sequence: u64,
}

impl Spectra {
    pub fn silent(buffer_size: usize, equalizer_size: usize) -> Self {
        Self {
            time: vec![0.0; buffer_size],
            fft: vec![DB_FLOOR; buffer_size / 2],
            fft_max: vec![DB_FLOOR; equalizer_size],
            sequence: 0,
        }
    }
}

/// Create an audio processing pipeline on the PulseAudio backend
pub fn create_audio_pipeline(config: &Config) -> Result<AudioPipeline> {
    let backend = PulseBackend::new(
        config.audio.sample_rate,
        config.audio.channels,
        config.audio.device.clone(),
    )?;

    let mut settings =
        PipelineSettings::new(config.analysis.buffer_size, config.analysis.equalizer_size);
    settings.ring_capacity = config.analysis.ring_capacity;
    settings.window = config.analysis.window;

    let mut pipeline = AudioPipeline::new(settings, Box::new(backend))?;
    pipeline.set_volume(config.playback.volume);

    if config.audio.source == SourceMode::Playback {
        let path = config
            .playback
            .file
            .as_ref()
            .context("Playback mode needs an audio file")?;
        let reader = AudioFileReader::open(path, config.audio.sample_rate)
            .with_context(|| format!("Could not initialize audio input file {}", path.display()))?;
        pipeline = pipeline.with_playback_source(Box::new(reader));
    }

    info!("Audio pipeline ready ({:?} mode)", config.audio.source);
    Ok(pipeline)
}

/// Start the configured source at the configured tick rate
pub fn start(pipeline: &mut AudioPipeline, config: &Config) -> Result<()> {
    match config.audio.source {
        SourceMode::Capture => pipeline.start_capture(config.analysis.tick_rate)?,
        SourceMode::Playback => pipeline.start_playback(config.analysis.tick_rate)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silent_snapshot_lengths() {
        let spectra = Spectra::silent(4096, 20);
        assert_eq!(spectra.time.len(), 4096);
        assert_eq!(spectra.fft.len(), 2048);
        assert_eq!(spectra.fft_max.len(), 20);
        assert!(spectra.fft.iter().all(|&db| db == DB_FLOOR));
    }
}
