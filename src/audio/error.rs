use thiserror::Error;

/// Errors raised while configuring or driving the analysis pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Buffer size must be a power of two of at least 2, got {0}")]
    InvalidBufferSize(usize),

    #[error("Equalizer size must be positive, got {0}")]
    InvalidBandCount(usize),

    #[error("Ring capacity {capacity} is smaller than the buffer size {buffer_size}")]
    InvalidRingCapacity { capacity: usize, buffer_size: usize },

    #[error("Tick rate must be a positive number of calls per second, got {0}")]
    InvalidTickRate(f64),

    #[error("Pipeline is already running")]
    AlreadyRunning,

    #[error("No playback source configured")]
    NoPlaybackSource,

    #[error("Audio backend error: {0}")]
    Backend(String),

    #[error("Thread error: {0}")]
    Thread(String),
}
