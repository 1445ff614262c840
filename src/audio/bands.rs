use std::ops::Range;

use super::error::PipelineError;
use super::DB_FLOOR;

/// Reduces a spectrum to equalizer bands by taking the maximum of each
/// contiguous chunk.
///
/// Chunks are `ceil(len / bands)` bins wide and the last non-empty chunk is
/// truncated to what remains. When there are fewer bins than bands the
/// trailing chunks are empty and report [`DB_FLOOR`].
pub struct BandReducer {
    ranges: Vec<Range<usize>>,
}

impl BandReducer {
    pub fn new(spectrum_len: usize, num_bands: usize) -> Result<Self, PipelineError> {
        if num_bands == 0 {
            return Err(PipelineError::InvalidBandCount(num_bands));
        }

        Ok(Self {
            ranges: chunk_ranges(spectrum_len, num_bands),
        })
    }

    /// Write one maximum per band into `bands`.
    pub fn reduce(&self, spectrum: &[f32], bands: &mut [f32]) {
        for (out, range) in bands.iter_mut().zip(self.ranges.iter()) {
            let end = range.end.min(spectrum.len());
            let start = range.start.min(end);
            *out = spectrum[start..end]
                .iter()
                .copied()
                .reduce(f32::max)
                .unwrap_or(DB_FLOOR);
        }
    }
}

/// One-shot reduction for callers without a cached [`BandReducer`].
pub fn reduce_to_bands(spectrum: &[f32], num_bands: usize) -> Vec<f32> {
    let mut bands = vec![DB_FLOOR; num_bands];
    for (out, range) in bands
        .iter_mut()
        .zip(chunk_ranges(spectrum.len(), num_bands))
    {
        if let Some(max) = spectrum[range].iter().copied().reduce(f32::max) {
            *out = max;
        }
    }
    bands
}

fn chunk_ranges(len: usize, num_bands: usize) -> Vec<Range<usize>> {
    if num_bands == 0 {
        return Vec::new();
    }
    let chunk = len.div_ceil(num_bands);

    (0..num_bands)
        .map(|band| {
            let start = (band * chunk).min(len);
            let end = (start + chunk).min(len);
            start..end
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_bands() {
        assert!(matches!(
            BandReducer::new(128, 0),
            Err(PipelineError::InvalidBandCount(0))
        ));
    }

    #[test]
    fn default_layout_chunks() {
        let reducer = BandReducer::new(2048, 20).unwrap();
        let ranges = &reducer.ranges;
        assert_eq!(ranges.len(), 20);
        assert_eq!(ranges[0], 0..103);
        assert_eq!(ranges[18], 1854..1957);
        assert_eq!(ranges[19].len(), 2048 - 19 * 103);
        assert_eq!(ranges[19].len(), 91);
    }

    #[test]
    fn takes_maximum_per_chunk() {
        let spectrum = [-10.0, -3.0, -7.0, -1.0, -50.0, -2.0, -9.0];
        let reducer = BandReducer::new(spectrum.len(), 3).unwrap();

        let mut bands = [0.0; 3];
        reducer.reduce(&spectrum, &mut bands);
        assert_eq!(bands, [-3.0, -1.0, -9.0]);
        assert_eq!(reduce_to_bands(&spectrum, 3), bands.to_vec());
    }

    #[test]
    fn short_spectrum_pads_with_floor() {
        let spectrum = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0];
        let bands = reduce_to_bands(&spectrum, 20);
        assert_eq!(bands.len(), 20);
        assert_eq!(&bands[..7], &spectrum);
        assert!(bands[7..].iter().all(|&b| b == DB_FLOOR));

        let reducer = BandReducer::new(spectrum.len(), 20).unwrap();
        let mut cached = [0.0; 20];
        reducer.reduce(&spectrum, &mut cached);
        assert_eq!(cached.to_vec(), bands);
    }

    #[test]
    fn ceil_chunking_can_leave_trailing_band_empty() {
        // 9 bins over 6 bands: chunk of 2 covers everything in 5 bands
        let spectrum = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        assert_eq!(
            reduce_to_bands(&spectrum, 6),
            vec![1.0, 3.0, 5.0, 7.0, 8.0, DB_FLOOR]
        );
    }

    #[test]
    fn silent_spectrum_reduces_to_floor() {
        let spectrum = vec![DB_FLOOR; 2048];
        let bands = reduce_to_bands(&spectrum, 20);
        assert!(bands.iter().all(|&b| b == DB_FLOOR));
    }

    #[test]
    fn empty_spectrum() {
        assert_eq!(reduce_to_bands(&[], 4), vec![DB_FLOOR; 4]);
        assert!(reduce_to_bands(&[1.0], 0).is_empty());
    }
}
