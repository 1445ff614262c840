use anyhow::Result;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use super::{push_spectra, RenderSink, FFT_KEY, FFT_MAX_KEY, TIME_KEY};
use crate::audio::{self, DB_FLOOR};
use crate::config::Config;

/// Render sink that reports the spectrum through the log instead of drawing it
pub struct LogSink {
    bin_hz: f32,
    report_every: u64,
    frames: u64,
    rms: f32,
    peak_bin: usize,
    peak_db: f32,
    loudest_band: usize,
    loudest_band_db: f32,
}

impl LogSink {
    /// `bin_hz` is the width of one spectrum bin; a summary is logged every
    /// `report_every` refreshes
    pub fn new(bin_hz: f32, report_every: u64) -> Self {
        Self {
            bin_hz,
            report_every: report_every.max(1),
            frames: 0,
            rms: 0.0,
            peak_bin: 0,
            peak_db: DB_FLOOR,
            loudest_band: 0,
            loudest_band_db: DB_FLOOR,
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "rms {:.3} | peak {:.0} Hz at {:.1} dB | loudest band {} at {:.1} dB",
            self.rms,
            self.peak_bin as f32 * self.bin_hz,
            self.peak_db,
            self.loudest_band,
            self.loudest_band_db
        )
    }
}

fn argmax(data: &[f32]) -> Option<(usize, f32)> {
    data.iter()
        .copied()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
}

impl RenderSink for LogSink {
    fn update_graph(&mut self, data: &[f32], key: &str) {
        match key {
            TIME_KEY => {
                let energy: f32 = data.iter().map(|s| s * s).sum();
                self.rms = (energy / data.len().max(1) as f32).sqrt();
            }
            FFT_KEY => {
                let (bin, db) = argmax(data).unwrap_or((0, DB_FLOOR));
                self.peak_bin = bin;
                self.peak_db = db;
            }
            FFT_MAX_KEY => {
                let (band, db) = argmax(data).unwrap_or((0, DB_FLOOR));
                self.loudest_band = band;
                self.loudest_band_db = db;

                self.frames += 1;
                if self.frames % self.report_every == 0 {
                    info!("{}", self.summary());
                }
            }
            other => debug!("Ignoring unknown graph key {}", other),
        }
    }
}

/// Run the pipeline without a UI until interrupted
pub async fn run(config: Config) -> Result<()> {
    let mut pipeline = audio::create_audio_pipeline(&config)?;
    audio::start(&mut pipeline, &config)?;

    let refresh_rate = config.display.refresh_rate;
    let mut sink = LogSink::new(pipeline.bin_frequency(1), refresh_rate.ceil() as u64);

    let mut refresh = interval(Duration::from_secs_f64(1.0 / refresh_rate));
    refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!("Running headless, press Ctrl-C to stop");
    loop {
        tokio::select! {
            _ = refresh.tick() => {
                let spectra = pipeline.latest();
                push_spectra(&mut sink, &spectra);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    pipeline.stop();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::Spectra;

    #[test]
    fn tracks_peaks_from_pushed_graphs() {
        let mut sink = LogSink::new(10.0, 100);
        let mut spectra = Spectra::silent(16, 4);
        spectra.time = vec![0.5; 16];
        spectra.fft[3] = -12.0;
        spectra.fft_max[1] = -12.0;

        push_spectra(&mut sink, &spectra);
        assert_eq!(sink.frames, 1);
        assert_eq!(sink.peak_bin, 3);
        assert_eq!(sink.loudest_band, 1);
        assert!((sink.rms - 0.5).abs() < 1e-6);
        assert_eq!(
            sink.summary(),
            "rms 0.500 | peak 30 Hz at -12.0 dB | loudest band 1 at -12.0 dB"
        );
    }

    #[test]
    fn empty_graphs_report_floor() {
        let mut sink = LogSink::new(1.0, 1);
        sink.update_graph(&[], FFT_KEY);
        sink.update_graph(&[], FFT_MAX_KEY);
        assert_eq!(sink.peak_db, DB_FLOOR);
        assert_eq!(sink.loudest_band_db, DB_FLOOR);
    }
}
