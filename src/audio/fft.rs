use rustfft::{num_complex::Complex, Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::error::PipelineError;
use super::DB_FLOOR;

/// Window applied to a frame before the transform
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    #[default]
    Hann,
    Rectangular,
}

impl WindowKind {
    fn coefficients(self, size: usize) -> Vec<f32> {
        match self {
            WindowKind::Hann => (0..size)
                .map(|i| {
                    0.5 * (1.0
                        - (2.0 * std::f32::consts::PI * i as f32 / (size - 1) as f32).cos())
                })
                .collect(),
            WindowKind::Rectangular => vec![1.0; size],
        }
    }
}

/// Forward FFT of a fixed-size real frame into a one-sided dB spectrum.
///
/// The plan, window and scratch space are built once; `forward_transform`
/// otherwise keeps no state between calls.
pub struct SpectralAnalyzer {
    fft_size: usize,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl SpectralAnalyzer {
    pub fn new(fft_size: usize, window: WindowKind) -> Result<Self, PipelineError> {
        if fft_size < 2 || !fft_size.is_power_of_two() {
            return Err(PipelineError::InvalidBufferSize(fft_size));
        }

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);
        let scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];

        Ok(Self {
            fft_size,
            fft,
            window: window.coefficients(fft_size),
            buffer: vec![Complex::new(0.0, 0.0); fft_size],
            scratch,
        })
    }

    /// Number of bins produced per frame
    pub fn spectrum_len(&self) -> usize {
        self.fft_size / 2
    }

    /// Transform `frame` and write `fft_size / 2` dB magnitudes into `spectrum`.
    ///
    /// A short frame is zero-padded; extra samples are ignored. Magnitudes are
    /// scaled by `2 / N` so a full-scale sine reads about 0 dB unwindowed, and
    /// anything quieter than [`DB_FLOOR`] is clamped to it.
    pub fn forward_transform(&mut self, frame: &[f32], spectrum: &mut [f32]) {
        for (i, slot) in self.buffer.iter_mut().enumerate() {
            let sample = frame.get(i).copied().unwrap_or(0.0);
            *slot = Complex::new(sample * self.window[i], 0.0);
        }

        self.fft
            .process_with_scratch(&mut self.buffer, &mut self.scratch);

        let scale = 2.0 / self.fft_size as f32;
        for (out, bin) in spectrum
            .iter_mut()
            .zip(self.buffer.iter().take(self.spectrum_len()))
        {
            *out = to_decibels(bin.norm() * scale);
        }
    }
}

/// `20 * log10(magnitude)`, clamped to [`DB_FLOOR`]
pub fn to_decibels(magnitude: f32) -> f32 {
    let db = 20.0 * magnitude.log10();
    if db.is_nan() || db < DB_FLOOR {
        DB_FLOOR
    } else {
        db
    }
}
