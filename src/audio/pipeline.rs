use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

use super::backend::{AudioBackend, InputCallback, OutputCallback};
use super::bands::BandReducer;
use super::error::PipelineError;
use super::fft::{SpectralAnalyzer, WindowKind};
use super::file::{PlaybackSource, PlaybackStatus};
use super::ring::SampleRing;
use super::Spectra;

/// Where samples entering the ring come from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    Capture,
    #[default]
    Playback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
}

/// Sizes fixed for the lifetime of a pipeline
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub buffer_size: usize,
    pub equalizer_size: usize,
    /// Defaults to twice the buffer size
    pub ring_capacity: Option<usize>,
    pub window: WindowKind,
}

impl PipelineSettings {
    pub fn new(buffer_size: usize, equalizer_size: usize) -> Self {
        Self {
            buffer_size,
            equalizer_size,
            ring_capacity: None,
            window: WindowKind::default(),
        }
    }

    pub fn ring_capacity(&self) -> usize {
        self.ring_capacity.unwrap_or(self.buffer_size * 2)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.buffer_size < 2 || !self.buffer_size.is_power_of_two() {
            return Err(PipelineError::InvalidBufferSize(self.buffer_size));
        }
        if self.equalizer_size == 0 {
            return Err(PipelineError::InvalidBandCount(self.equalizer_size));
        }
        if self.ring_capacity() < self.buffer_size {
            return Err(PipelineError::InvalidRingCapacity {
                capacity: self.ring_capacity(),
                buffer_size: self.buffer_size,
            });
        }
        Ok(())
    }
}

/// Playback gain shared with the audio callback as raw `f32` bits
pub struct Volume(AtomicU32);

impl Volume {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

impl Default for Volume {
    fn default() -> Self {
        Self::new(5.0)
    }
}

/// Per-tick work: snapshot the ring, transform, reduce.
/// Owns every working buffer so a tick allocates only the published copy.
struct FrameProcessor {
    ring: Arc<SampleRing>,
    analyzer: SpectralAnalyzer,
    reducer: BandReducer,
    time: Vec<f32>,
    spectrum: Vec<f32>,
    bands: Vec<f32>,
    sequence: u64,
}

impl FrameProcessor {
    fn new(settings: &PipelineSettings, ring: Arc<SampleRing>) -> Result<Self, PipelineError> {
        let analyzer = SpectralAnalyzer::new(settings.buffer_size, settings.window)?;
        let reducer = BandReducer::new(analyzer.spectrum_len(), settings.equalizer_size)?;

        Ok(Self {
            time: vec![0.0; settings.buffer_size],
            spectrum: vec![0.0; analyzer.spectrum_len()],
            bands: vec![0.0; settings.equalizer_size],
            ring,
            analyzer,
            reducer,
            sequence: 0,
        })
    }

    fn process(&mut self) -> Spectra {
        self.ring.fetch_latest(&mut self.time);
        self.analyzer
            .forward_transform(&self.time, &mut self.spectrum);
        self.reducer.reduce(&self.spectrum, &mut self.bands);
        self.sequence += 1;

        Spectra {
            time: self.time.clone(),
            fft: self.spectrum.clone(),
            fft_max: self.bands.clone(),
            sequence: self.sequence,
        }
    }
}

type SharedSource = Arc<Mutex<Box<dyn PlaybackSource>>>;

/// Lock the source for a control operation. A panic in the audio callback
/// poisons the mutex but leaves the reader usable, so recover the guard.
fn lock_source(source: &SharedSource) -> MutexGuard<'_, Box<dyn PlaybackSource>> {
    source.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fixed-rate analysis thread. Hands its processor back when joined.
struct Ticker {
    handle: thread::JoinHandle<FrameProcessor>,
    stop_flag: Arc<AtomicBool>,
}

impl Ticker {
    fn spawn(
        mut processor: FrameProcessor,
        publisher: Arc<watch::Sender<Arc<Spectra>>>,
        tick_rate: f64,
    ) -> Result<Self, PipelineError> {
        let period = Duration::from_secs_f64(1.0 / tick_rate);
        let stop_flag = Arc::new(AtomicBool::new(false));
        let stop_flag_clone = stop_flag.clone();

        let handle = thread::Builder::new()
            .name("spectrum-tick".to_string())
            .spawn(move || {
                let mut next = Instant::now();
                while !stop_flag_clone.load(Ordering::Acquire) {
                    let spectra = processor.process();
                    trace!("Published frame {}", spectra.sequence);
                    publisher.send_replace(Arc::new(spectra));

                    next += period;
                    let now = Instant::now();
                    if next <= now {
                        // Fell behind; don't try to catch up with a burst
                        next = now;
                        continue;
                    }
                    while !stop_flag_clone.load(Ordering::Acquire) {
                        let now = Instant::now();
                        if now >= next {
                            break;
                        }
                        thread::park_timeout(next - now);
                    }
                }
                processor
            })
            .map_err(|e| PipelineError::Thread(e.to_string()))?;

        Ok(Self { handle, stop_flag })
    }

    /// Prevent further ticks and wait for the one in flight to finish
    fn stop(self) -> Option<FrameProcessor> {
        self.stop_flag.store(true, Ordering::Release);
        self.handle.thread().unpark();
        match self.handle.join() {
            Ok(processor) => Some(processor),
            Err(_) => {
                error!("Analysis thread panicked");
                None
            }
        }
    }
}

/// Drives the capture or playback path into the sample ring and publishes a
/// fresh [`Spectra`] snapshot on every tick.
///
/// `Idle -> Running -> Idle`. Starting while running is rejected with
/// [`PipelineError::AlreadyRunning`]; stopping while idle does nothing.
pub struct AudioPipeline {
    settings: PipelineSettings,
    backend: Box<dyn AudioBackend>,
    source: Option<SharedSource>,
    status: Option<Arc<PlaybackStatus>>,
    ring: Arc<SampleRing>,
    volume: Arc<Volume>,
    publisher: Arc<watch::Sender<Arc<Spectra>>>,
    processor: Option<FrameProcessor>,
    ticker: Option<Ticker>,
    state: PipelineState,
}

impl AudioPipeline {
    pub fn new(
        settings: PipelineSettings,
        backend: Box<dyn AudioBackend>,
    ) -> Result<Self, PipelineError> {
        settings.validate()?;

        let ring = Arc::new(SampleRing::new(settings.ring_capacity()));
        let processor = FrameProcessor::new(&settings, ring.clone())?;
        let (publisher, _) = watch::channel(Arc::new(Spectra::silent(
            settings.buffer_size,
            settings.equalizer_size,
        )));

        info!(
            "Pipeline configured: buffer {} samples, {} bands, ring {} samples, {} Hz",
            settings.buffer_size,
            settings.equalizer_size,
            ring.capacity(),
            backend.sample_rate()
        );

        Ok(Self {
            settings,
            backend,
            source: None,
            status: None,
            ring,
            volume: Arc::new(Volume::default()),
            publisher: Arc::new(publisher),
            processor: Some(processor),
            ticker: None,
            state: PipelineState::Idle,
        })
    }

    /// Attach the decoder feeding the playback path
    pub fn with_playback_source(mut self, source: Box<dyn PlaybackSource>) -> Self {
        self.status = Some(source.status());
        self.source = Some(Arc::new(Mutex::new(source)));
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn sample_rate(&self) -> u32 {
        self.backend.sample_rate()
    }

    /// Centre frequency in Hz of a spectrum bin
    pub fn bin_frequency(&self, bin: usize) -> f32 {
        bin as f32 * self.sample_rate() as f32 / self.settings.buffer_size as f32
    }

    /// Receiver for published snapshots; never blocks the tick
    pub fn subscribe(&self) -> watch::Receiver<Arc<Spectra>> {
        self.publisher.subscribe()
    }

    /// Most recently published snapshot
    pub fn latest(&self) -> Arc<Spectra> {
        self.publisher.borrow().clone()
    }

    pub fn volume(&self) -> f32 {
        self.volume.get()
    }

    pub fn set_volume(&self, volume: f32) {
        self.volume.set(volume);
    }

    /// Whether audio is flowing. False once the playback source has run out.
    pub fn is_playing(&self) -> bool {
        self.backend.is_playing() && self.status.as_ref().map_or(true, |s| s.is_playing())
    }

    /// Analyze microphone input `tick_rate` times per second
    pub fn start_capture(&mut self, tick_rate: f64) -> Result<(), PipelineError> {
        self.check_start(tick_rate)?;

        let ring = self.ring.clone();
        let callback: InputCallback = Box::new(move |data: &[f32], frames, channels| {
            // Faults must not unwind into the backend thread
            let _ = panic::catch_unwind(AssertUnwindSafe(|| {
                ring.push_interleaved(data, frames, channels)
            }));
        });
        self.backend.set_input_callback(Some(callback))?;

        if let Err(e) = self.launch(tick_rate) {
            let _ = self.backend.set_input_callback(None);
            return Err(e);
        }

        info!("Capture started at {} ticks/s", tick_rate);
        Ok(())
    }

    /// Play the attached source and analyze what is played `tick_rate` times per second
    pub fn start_playback(&mut self, tick_rate: f64) -> Result<(), PipelineError> {
        self.check_start(tick_rate)?;
        let source = self.source.clone().ok_or(PipelineError::NoPlaybackSource)?;

        let ring = self.ring.clone();
        let volume = self.volume.clone();
        let callback_source = source.clone();
        let callback: OutputCallback = Box::new(move |data: &mut [f32], frames, channels| {
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                // Never wait on a control operation; emit silence instead
                match callback_source.try_lock() {
                    Ok(mut source) => source.retrieve_fresh_audio(data, frames, channels),
                    Err(TryLockError::Poisoned(poisoned)) => {
                        poisoned
                            .into_inner()
                            .retrieve_fresh_audio(data, frames, channels)
                    }
                    Err(TryLockError::WouldBlock) => data.fill(0.0),
                }

                let gain = volume.get();
                for sample in data.iter_mut() {
                    *sample *= gain;
                }
                ring.push_interleaved(data, frames, channels);
            }));
            if result.is_err() {
                data.fill(0.0);
            }
        });
        self.backend.set_output_callback(Some(callback))?;

        lock_source(&source).play();

        if let Err(e) = self.launch(tick_rate) {
            let _ = self.backend.set_output_callback(None);
            lock_source(&source).pause();
            return Err(e);
        }

        info!("Playback started at {} ticks/s", tick_rate);
        Ok(())
    }

    /// Return to idle. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if self.state == PipelineState::Idle {
            return;
        }

        self.backend.pause();
        if let Err(e) = self.backend.set_input_callback(None) {
            warn!("Failed to deregister input callback: {}", e);
        }
        if let Err(e) = self.backend.set_output_callback(None) {
            warn!("Failed to deregister output callback: {}", e);
        }
        if let Some(source) = &self.source {
            lock_source(source).pause();
        }

        if let Some(ticker) = self.ticker.take() {
            self.processor = ticker.stop();
        }

        self.state = PipelineState::Idle;
        info!("Pipeline stopped");
    }

    /// Pause or resume audio while running without leaving the running state.
    /// Returns whether audio is now playing.
    pub fn toggle_playback(&mut self) -> Result<bool, PipelineError> {
        if self.state == PipelineState::Idle {
            return Ok(false);
        }

        let playing = !self.backend.is_playing();
        if playing {
            self.backend.play()?;
        } else {
            self.backend.pause();
        }
        if let Some(source) = &self.source {
            let mut source = lock_source(source);
            if playing {
                source.play();
            } else {
                source.pause();
            }
        }

        debug!("Playback toggled, playing: {}", playing);
        Ok(playing)
    }

    /// Move the playback source to `seconds`; no effect without a source
    pub fn seek(&self, seconds: f64) {
        if let Some(source) = &self.source {
            let mut source = lock_source(source);
            source.set_current_time(seconds);
            if !source.is_playing() && self.backend.is_playing() {
                source.play();
            }
        }
    }

    /// Current playback position and length in seconds. Reads the published
    /// status, so it never contends with the audio callback.
    pub fn playback_position(&self) -> Option<(f64, f64)> {
        let status = self.status.as_ref()?;
        Some((status.position(), status.duration()))
    }

    fn check_start(&self, tick_rate: f64) -> Result<(), PipelineError> {
        if self.state == PipelineState::Running {
            return Err(PipelineError::AlreadyRunning);
        }
        if !tick_rate.is_finite() || tick_rate <= 0.0 {
            return Err(PipelineError::InvalidTickRate(tick_rate));
        }
        Ok(())
    }

    fn launch(&mut self, tick_rate: f64) -> Result<(), PipelineError> {
        let processor = match self.processor.take() {
            Some(processor) => processor,
            None => FrameProcessor::new(&self.settings, self.ring.clone())?,
        };

        self.backend.play()?;
        self.ticker = Some(Ticker::spawn(processor, self.publisher.clone(), tick_rate)?);
        self.state = PipelineState::Running;
        Ok(())
    }
}

impl Drop for AudioPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}
