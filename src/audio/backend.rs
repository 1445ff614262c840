use libpulse_binding as pulse;
use libpulse_simple_binding as psimple;
use pulse::def::BufferAttr;
use pulse::sample::{Format, Spec};
use pulse::stream::Direction;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::error::PipelineError;

/// Invoked with freshly captured interleaved samples: `(samples, frames, channels)`
pub type InputCallback = Box<dyn FnMut(&[f32], usize, usize) + Send + 'static>;

/// Invoked to fill an interleaved output buffer: `(samples, frames, channels)`
pub type OutputCallback = Box<dyn FnMut(&mut [f32], usize, usize) + Send + 'static>;

/// Audio hardware abstraction driving the pipeline's callbacks at device cadence.
///
/// Callbacks run on the backend's own threads and must never block.
pub trait AudioBackend: Send {
    fn sample_rate(&self) -> u32;

    fn input_channels(&self) -> usize;

    fn output_channels(&self) -> usize;

    /// Register (or with `None`, remove) the capture consumer
    fn set_input_callback(&mut self, callback: Option<InputCallback>) -> Result<(), PipelineError>;

    /// Register (or with `None`, remove) the playback producer
    fn set_output_callback(&mut self, callback: Option<OutputCallback>)
        -> Result<(), PipelineError>;

    fn play(&mut self) -> Result<(), PipelineError>;

    fn pause(&mut self);

    fn is_playing(&self) -> bool;
}

/// Frames exchanged with PulseAudio per read/write (~12ms at 44.1kHz)
const PERIOD_FRAMES: usize = 512;

struct StreamThread {
    handle: thread::JoinHandle<()>,
    stop_flag: Arc<AtomicBool>,
}

impl StreamThread {
    fn stop(self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if self.handle.join().is_err() {
            warn!("Audio stream thread panicked");
        }
    }
}

/// PulseAudio/PipeWire backend built on the simple API: one blocking thread per
/// direction, each owning a preallocated period buffer.
pub struct PulseBackend {
    sample_rate: u32,
    channels: u8,
    device: Option<String>,
    playing: Arc<AtomicBool>,
    input: Option<StreamThread>,
    output: Option<StreamThread>,
}

impl PulseBackend {
    pub fn new(
        sample_rate: u32,
        channels: u8,
        device: Option<String>,
    ) -> Result<Self, PipelineError> {
        let backend = Self {
            sample_rate,
            channels,
            device,
            playing: Arc::new(AtomicBool::new(false)),
            input: None,
            output: None,
        };

        if !backend.spec().is_valid() {
            return Err(PipelineError::Backend(format!(
                "Invalid PulseAudio sample spec: {} Hz, {} channels",
                sample_rate, channels
            )));
        }

        Ok(backend)
    }

    fn spec(&self) -> Spec {
        Spec {
            format: Format::F32le,
            channels: self.channels,
            rate: self.sample_rate,
        }
    }

    fn connect(&self, direction: Direction) -> Result<psimple::Simple, PipelineError> {
        let spec = self.spec();
        let period_bytes = (PERIOD_FRAMES * self.channels as usize * std::mem::size_of::<f32>()) as u32;

        // Keep playback latency to a few periods so analysis tracks what is heard
        let attr = BufferAttr {
            maxlength: u32::MAX,
            tlength: period_bytes * 4,
            prebuf: u32::MAX,
            minreq: u32::MAX,
            fragsize: period_bytes,
        };

        let stream_name = match direction {
            Direction::Record => "spectrum-capture",
            _ => "spectrum-playback",
        };

        let simple = psimple::Simple::new(
            None,                     // Use default server
            "spectrascope",           // Application name
            direction,                // Record or playback
            self.device.as_deref(),   // Device name (None = default)
            stream_name,              // Stream description
            &spec,                    // Sample format
            None,                     // Default channel map
            Some(&attr),              // Low-latency buffering
        )
        .map_err(|e| PipelineError::Backend(format!("Failed to connect to PulseAudio: {:?}", e)))?;

        info!(
            "Connected to PulseAudio ({}) on {}",
            stream_name,
            self.device.as_deref().unwrap_or("default device")
        );
        Ok(simple)
    }

    fn capture_loop(
        pulse: psimple::Simple,
        channels: usize,
        mut callback: InputCallback,
        playing: Arc<AtomicBool>,
        stop_flag: Arc<AtomicBool>,
    ) {
        let mut buffer = vec![0.0f32; PERIOD_FRAMES * channels];

        loop {
            if stop_flag.load(Ordering::Relaxed) {
                debug!("Stop flag set, ending capture loop");
                break;
            }

            let byte_slice = unsafe {
                std::slice::from_raw_parts_mut(
                    buffer.as_mut_ptr() as *mut u8,
                    buffer.len() * std::mem::size_of::<f32>(),
                )
            };

            if let Err(e) = pulse.read(byte_slice) {
                warn!("PulseAudio read error: {:?}", e);
                thread::sleep(Duration::from_millis(10));
                continue;
            }

            if playing.load(Ordering::Relaxed) {
                callback(&buffer, PERIOD_FRAMES, channels);
            }
        }
    }

    fn playback_loop(
        pulse: psimple::Simple,
        channels: usize,
        mut callback: OutputCallback,
        playing: Arc<AtomicBool>,
        stop_flag: Arc<AtomicBool>,
    ) {
        let mut buffer = vec![0.0f32; PERIOD_FRAMES * channels];

        loop {
            if stop_flag.load(Ordering::Relaxed) {
                debug!("Stop flag set, ending playback loop");
                break;
            }

            if playing.load(Ordering::Relaxed) {
                callback(&mut buffer, PERIOD_FRAMES, channels);
            } else {
                buffer.fill(0.0);
            }

            let byte_slice = unsafe {
                std::slice::from_raw_parts(
                    buffer.as_ptr() as *const u8,
                    buffer.len() * std::mem::size_of::<f32>(),
                )
            };

            if let Err(e) = pulse.write(byte_slice) {
                warn!("PulseAudio write error: {:?}", e);
                thread::sleep(Duration::from_millis(10));
            }
        }

        if let Err(e) = pulse.drain() {
            debug!("PulseAudio drain failed: {:?}", e);
        }
    }
}

impl AudioBackend for PulseBackend {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn input_channels(&self) -> usize {
        self.channels as usize
    }

    fn output_channels(&self) -> usize {
        self.channels as usize
    }

    fn set_input_callback(&mut self, callback: Option<InputCallback>) -> Result<(), PipelineError> {
        if let Some(previous) = self.input.take() {
            previous.stop();
        }
        let Some(callback) = callback else {
            return Ok(());
        };

        let pulse = self.connect(Direction::Record)?;
        let channels = self.input_channels();
        let playing = self.playing.clone();
        let stop_flag = Arc::new(AtomicBool::new(false));
        let stop_flag_clone = stop_flag.clone();

        let handle = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                Self::capture_loop(pulse, channels, callback, playing, stop_flag_clone);
            })
            .map_err(|e| PipelineError::Thread(e.to_string()))?;

        self.input = Some(StreamThread { handle, stop_flag });
        Ok(())
    }

    fn set_output_callback(
        &mut self,
        callback: Option<OutputCallback>,
    ) -> Result<(), PipelineError> {
        if let Some(previous) = self.output.take() {
            previous.stop();
        }
        let Some(callback) = callback else {
            return Ok(());
        };

        let pulse = self.connect(Direction::Playback)?;
        let channels = self.output_channels();
        let playing = self.playing.clone();
        let stop_flag = Arc::new(AtomicBool::new(false));
        let stop_flag_clone = stop_flag.clone();

        let handle = thread::Builder::new()
            .name("audio-playback".to_string())
            .spawn(move || {
                Self::playback_loop(pulse, channels, callback, playing, stop_flag_clone);
            })
            .map_err(|e| PipelineError::Thread(e.to_string()))?;

        self.output = Some(StreamThread { handle, stop_flag });
        Ok(())
    }

    fn play(&mut self) -> Result<(), PipelineError> {
        self.playing.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn pause(&mut self) {
        self.playing.store(false, Ordering::Relaxed);
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Relaxed)
    }
}

impl Drop for PulseBackend {
    fn drop(&mut self) {
        self.playing.store(false, Ordering::Relaxed);
        if let Some(input) = self.input.take() {
            input.stop();
        }
        if let Some(output) = self.output.take() {
            output.stop();
        }
    }
}
