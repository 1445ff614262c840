use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;
use tracing::{info, warn};

/// Media file loading errors
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Failed to open {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },

    #[error("Unsupported media format: {0}")]
    Unsupported(String),

    #[error("No decodable audio track found")]
    NoAudioTrack,

    #[error("Decoding failed: {0}")]
    Decode(String),
}

/// Playback state a source publishes after every change, readable without
/// taking the lock that guards the source itself.
#[derive(Debug, Default)]
pub struct PlaybackStatus {
    position: AtomicU64,
    duration: AtomicU64,
    playing: AtomicBool,
}

impl PlaybackStatus {
    /// Playback position in seconds
    pub fn position(&self) -> f64 {
        f64::from_bits(self.position.load(Ordering::Relaxed))
    }

    /// Total length in seconds
    pub fn duration(&self) -> f64 {
        f64::from_bits(self.duration.load(Ordering::Relaxed))
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Relaxed)
    }

    fn store(&self, position: f64, duration: f64, playing: bool) {
        self.position.store(position.to_bits(), Ordering::Relaxed);
        self.duration.store(duration.to_bits(), Ordering::Relaxed);
        self.playing.store(playing, Ordering::Relaxed);
    }
}

/// Pull-based source of decoded PCM for the playback path.
///
/// `retrieve_fresh_audio` has the same shape as the backend output callback
/// and is called from the real-time thread, so it must not block or allocate.
pub trait PlaybackSource: Send {
    fn play(&mut self);

    fn pause(&mut self);

    fn is_playing(&self) -> bool;

    /// Move to `seconds`, clamped to the length of the source
    fn set_current_time(&mut self, seconds: f64);

    /// Shared handle to the position, length and play state
    fn status(&self) -> Arc<PlaybackStatus>;

    /// Fill `frames` interleaved frames of `channels` channels into `buffer`
    fn retrieve_fresh_audio(&mut self, buffer: &mut [f32], frames: usize, channels: usize);
}

/// Fully decoded media file served at the output device's rate and layout.
pub struct AudioFileReader {
    samples: Vec<f32>,
    channels: usize,
    file_rate: u32,
    output_rate: u32,
    position: f64,
    playing: bool,
    status: Arc<PlaybackStatus>,
}

impl AudioFileReader {
    /// Decode `path` completely, failing fast on a missing or unreadable file.
    pub fn open(path: &Path, output_rate: u32) -> Result<Self, DecodeError> {
        let file = File::open(path).map_err(|source| DecodeError::Open {
            path: path.display().to_string(),
            source,
        })?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| DecodeError::Unsupported(e.to_string()))?;
        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecodeError::NoAudioTrack)?;
        let track_id = track.id;
        let mut file_rate = track.codec_params.sample_rate.unwrap_or(0);
        let mut channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(0);

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| DecodeError::Unsupported(e.to_string()))?;

        let mut samples = Vec::new();
        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => return Err(DecodeError::Decode(e.to_string())),
            };

            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    file_rate = spec.rate;
                    channels = spec.channels.count();

                    let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                    buffer.copy_interleaved_ref(decoded);
                    samples.extend_from_slice(buffer.samples());
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!("Skipping corrupt packet: {}", e);
                }
                Err(e) => return Err(DecodeError::Decode(e.to_string())),
            }
        }

        if channels == 0 || file_rate == 0 {
            return Err(DecodeError::NoAudioTrack);
        }

        let reader = Self::from_pcm(samples, channels, file_rate, output_rate);
        info!(
            "Audio file successfully loaded: {} ({:.1}s, {} Hz, {} channels)",
            path.display(),
            reader.duration(),
            file_rate,
            channels
        );
        Ok(reader)
    }

    /// Wrap already decoded interleaved samples.
    pub fn from_pcm(samples: Vec<f32>, channels: usize, file_rate: u32, output_rate: u32) -> Self {
        let reader = Self {
            samples,
            channels: channels.max(1),
            file_rate: file_rate.max(1),
            output_rate: output_rate.max(1),
            position: 0.0,
            playing: false,
            status: Arc::new(PlaybackStatus::default()),
        };
        reader.publish();
        reader
    }

    /// Playback position in seconds
    pub fn current_time(&self) -> f64 {
        self.position / self.file_rate as f64
    }

    /// Total length in seconds
    pub fn duration(&self) -> f64 {
        self.frame_count() as f64 / self.file_rate as f64
    }

    fn publish(&self) {
        self.status
            .store(self.current_time(), self.duration(), self.playing);
    }

    fn frame_count(&self) -> usize {
        self.samples.len() / self.channels
    }

    /// Sample of `channel` at fractional frame `position`, linearly interpolated
    fn sample_at(&self, position: f64, channel: usize) -> f32 {
        let index = position.floor() as usize;
        let frac = (position - index as f64) as f32;
        let current = self.samples[index * self.channels + channel];
        let next = if index + 1 < self.frame_count() {
            self.samples[(index + 1) * self.channels + channel]
        } else {
            current
        };
        current + (next - current) * frac
    }
}

impl PlaybackSource for AudioFileReader {
    fn play(&mut self) {
        self.playing = true;
        self.publish();
    }

    fn pause(&mut self) {
        self.playing = false;
        self.publish();
    }

    fn is_playing(&self) -> bool {
        self.playing
    }

    fn set_current_time(&mut self, seconds: f64) {
        let frame = (seconds.max(0.0) * self.file_rate as f64).min(self.frame_count() as f64);
        self.position = frame;
        self.publish();
    }

    fn status(&self) -> Arc<PlaybackStatus> {
        self.status.clone()
    }

    fn retrieve_fresh_audio(&mut self, buffer: &mut [f32], frames: usize, channels: usize) {
        if channels == 0 {
            return;
        }
        let frames = frames.min(buffer.len() / channels);
        let step = self.file_rate as f64 / self.output_rate as f64;
        let total = self.frame_count();

        for frame in buffer.chunks_exact_mut(channels).take(frames) {
            if !self.playing || self.position >= total as f64 {
                frame.fill(0.0);
                continue;
            }

            if channels == 1 && self.channels > 1 {
                let sum: f32 = (0..self.channels)
                    .map(|ch| self.sample_at(self.position, ch))
                    .sum();
                frame[0] = sum / self.channels as f32;
            } else {
                for (ch, out) in frame.iter_mut().enumerate() {
                    *out = self.sample_at(self.position, ch % self.channels);
                }
            }

            self.position += step;
        }

        if self.position >= total as f64 {
            self.playing = false;
        }
        self.publish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn ramp(frames: usize) -> Vec<f32> {
        (0..frames).map(|i| i as f32).collect()
    }

    #[test]
    fn missing_file_fails_fast() {
        let result = AudioFileReader::open(Path::new("/nonexistent/song.mp3"), 44100);
        assert!(matches!(result, Err(DecodeError::Open { .. })));
    }

    #[test]
    fn silent_until_played() {
        let mut reader = AudioFileReader::from_pcm(ramp(16), 1, 8000, 8000);
        let mut buffer = [1.0; 4];
        reader.retrieve_fresh_audio(&mut buffer, 4, 1);
        assert_eq!(buffer, [0.0; 4]);
        assert_eq!(reader.current_time(), 0.0);

        reader.play();
        reader.retrieve_fresh_audio(&mut buffer, 4, 1);
        assert_eq!(buffer, [0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn mono_file_is_duplicated_to_stereo() {
        let mut reader = AudioFileReader::from_pcm(ramp(4), 1, 100, 100);
        reader.play();
        let mut buffer = [0.0; 6];
        reader.retrieve_fresh_audio(&mut buffer, 3, 2);
        assert_eq!(buffer, [0.0, 0.0, 1.0, 1.0, 2.0, 2.0]);
    }

    #[test]
    fn stereo_file_is_downmixed_to_mono() {
        let mut reader = AudioFileReader::from_pcm(vec![1.0, 3.0, -1.0, -3.0], 2, 100, 100);
        reader.play();
        let mut buffer = [0.0; 2];
        reader.retrieve_fresh_audio(&mut buffer, 2, 1);
        assert_eq!(buffer, [2.0, -2.0]);
    }

    #[test]
    fn rate_conversion_interpolates() {
        // File at half the device rate: every other output frame is a midpoint
        let mut reader = AudioFileReader::from_pcm(ramp(8), 1, 22050, 44100);
        reader.play();
        let mut buffer = [0.0; 5];
        reader.retrieve_fresh_audio(&mut buffer, 5, 1);
        for (got, want) in buffer.iter().zip([0.0, 0.5, 1.0, 1.5, 2.0]) {
            assert_abs_diff_eq!(*got, want, epsilon = 1e-6);
        }
    }

    #[test]
    fn end_of_file_emits_silence_and_stops() {
        let mut reader = AudioFileReader::from_pcm(vec![0.5; 3], 1, 100, 100);
        reader.play();
        let mut buffer = [9.0; 5];
        reader.retrieve_fresh_audio(&mut buffer, 5, 1);
        assert_eq!(buffer, [0.5, 0.5, 0.5, 0.0, 0.0]);
        assert!(!reader.is_playing());
        assert!(!reader.status().is_playing());
    }

    #[test]
    fn seeking_moves_position() {
        let mut reader = AudioFileReader::from_pcm(ramp(200), 1, 100, 100);
        assert_abs_diff_eq!(reader.duration(), 2.0);

        reader.set_current_time(1.5);
        assert_abs_diff_eq!(reader.current_time(), 1.5);

        reader.play();
        let mut buffer = [0.0; 1];
        reader.retrieve_fresh_audio(&mut buffer, 1, 1);
        assert_eq!(buffer[0], 150.0);

        reader.set_current_time(10.0);
        assert_abs_diff_eq!(reader.current_time(), 2.0);
        reader.set_current_time(-1.0);
        assert_eq!(reader.current_time(), 0.0);
    }

    #[test]
    fn status_tracks_reader_without_borrowing_it() {
        let mut reader = AudioFileReader::from_pcm(ramp(400), 1, 100, 200);
        let status = reader.status();
        assert_abs_diff_eq!(status.duration(), 4.0);
        assert_eq!(status.position(), 0.0);
        assert!(!status.is_playing());

        reader.play();
        assert!(status.is_playing());

        // 100 output frames at twice the file rate advance half a second
        let mut buffer = [0.0; 100];
        reader.retrieve_fresh_audio(&mut buffer, 100, 1);
        assert_abs_diff_eq!(status.position(), 0.5);

        reader.set_current_time(3.0);
        assert_abs_diff_eq!(status.position(), 3.0);

        reader.pause();
        assert!(!status.is_playing());
    }
}
