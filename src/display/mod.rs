pub mod headless;
pub mod terminal;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::audio::Spectra;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    #[default]
    Terminal,
    Headless,
}

impl DisplayMode {
    /// Default tracing directive. Logs would corrupt the alternate screen,
    /// so the terminal UI only reports warnings.
    pub fn default_log_filter(self) -> &'static str {
        match self {
            DisplayMode::Terminal => "spectrascope=warn",
            DisplayMode::Headless => "spectrascope=info",
        }
    }
}

/// Graph key for the raw sample frame
pub const TIME_KEY: &str = "time";
/// Graph key for the dB spectrum
pub const FFT_KEY: &str = "fft";
/// Graph key for the equalizer band maxima
pub const FFT_MAX_KEY: &str = "fftMax";

/// Consumer of published analysis arrays, refreshed at its own cadence
pub trait RenderSink {
    fn update_graph(&mut self, data: &[f32], key: &str);
}

/// Hand every array of a snapshot to `sink` under its graph key
pub fn push_spectra(sink: &mut dyn RenderSink, spectra: &Spectra) {
    sink.update_graph(&spectra.time, TIME_KEY);
    sink.update_graph(&spectra.fft, FFT_KEY);
    sink.update_graph(&spectra.fft_max, FFT_MAX_KEY);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        updates: Vec<(String, usize)>,
    }

    impl RenderSink for RecordingSink {
        fn update_graph(&mut self, data: &[f32], key: &str) {
            self.updates.push((key.to_string(), data.len()));
        }
    }

    #[test]
    fn pushes_all_three_graphs_in_order() {
        let mut sink = RecordingSink::default();
        push_spectra(&mut sink, &Spectra::silent(4096, 20));
        assert_eq!(
            sink.updates,
            vec![
                ("time".to_string(), 4096),
                ("fft".to_string(), 2048),
                ("fftMax".to_string(), 20),
            ]
        );
    }

    #[test]
    fn headless_mode_from_config_logs_summaries() {
        let config: crate::config::Config = toml::from_str("[display]\nmode = \"headless\"").unwrap();
        assert_eq!(config.display.mode, DisplayMode::Headless);
        assert_eq!(config.display.mode.default_log_filter(), "spectrascope=info");
        assert_eq!(DisplayMode::Terminal.default_log_filter(), "spectrascope=warn");

        let directive: tracing_subscriber::filter::Directive =
            config.display.mode.default_log_filter().parse().unwrap();
        assert_eq!(directive.to_string(), "spectrascope=info");
    }
}
