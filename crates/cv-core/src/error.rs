//! Error types for the convolution engine

use thiserror::Error;

/// Core error type
#[derive(Error, Debug)]
pub enum ConvError {
    #[error("Invalid block size: {0}")]
    InvalidBlockSize(usize),

    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(f64),

    #[error("Invalid FFT size: {0} (must be a power of two >= 2)")]
    InvalidFftSize(usize),

    #[error("FFT error: {0}")]
    Fft(String),

    #[error("Unsupported channel count: {0}")]
    UnsupportedChannels(usize),

    #[error("Impulse response too long: {len} samples (limit {max})")]
    ImpulseTooLong { len: usize, max: usize },

    #[error("Malformed impulse response: {0}")]
    Malformed(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Filter design error: {0}")]
    FilterDesign(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConvError {
    /// True for errors raised by `configure` (block size / sample rate)
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ConvError::InvalidBlockSize(_) | ConvError::InvalidSampleRate(_)
        )
    }
}

/// Result type alias
pub type ConvResult<T> = Result<T, ConvError>;
