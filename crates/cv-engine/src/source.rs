//! Impulse response sources
//!
//! A source produces a decoded `ImpulseResponse` on the loader thread. Files
//! are read with hound (WAV, integer or float samples).

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use cv_core::{ConvError, ConvResult, Sample};
use cv_dsp::ImpulseResponse;

/// Something an IR can be loaded from
pub trait IrSource: Send + Sync + fmt::Debug {
    /// Decode the IR. Called on the loader thread only.
    fn load(&self) -> ConvResult<ImpulseResponse>;

    /// Short human-readable origin for logs
    fn describe(&self) -> String;
}

/// Map a hound failure onto the engine taxonomy
pub fn decode_error(err: hound::Error) -> ConvError {
    match err {
        hound::Error::IoError(e) => ConvError::Io(e),
        other => ConvError::Decode(other.to_string()),
    }
}

/// Decode a WAV stream into a planar IR
pub fn read_wav<R: io::Read>(reader: hound::WavReader<R>) -> ConvResult<ImpulseResponse> {
    let spec = reader.spec();
    let num_channels = spec.channels as usize;
    if num_channels == 0 || num_channels > ImpulseResponse::MAX_CHANNELS {
        return Err(ConvError::UnsupportedChannels(num_channels));
    }

    let samples: Vec<Sample> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .map(|s| s.map(|v| v as Sample))
            .collect::<Result<Vec<_>, _>>()
            .map_err(decode_error)?,
        hound::SampleFormat::Int => {
            let bits = spec.bits_per_sample;
            if bits == 0 || bits > 32 {
                return Err(ConvError::Decode(format!("{bits}-bit integer samples")));
            }
            let max_val = (1i64 << (bits - 1)) as Sample;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as Sample / max_val))
                .collect::<Result<Vec<_>, _>>()
                .map_err(decode_error)?
        }
    };

    ImpulseResponse::from_interleaved(&samples, num_channels, spec.sample_rate as f64)
}

// ============ WAV file ============

#[derive(Debug, Clone)]
pub struct WavFileSource {
    path: PathBuf,
}

impl WavFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl IrSource for WavFileSource {
    fn load(&self) -> ConvResult<ImpulseResponse> {
        let reader = hound::WavReader::open(&self.path).map_err(decode_error)?;
        read_wav(reader)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

// ============ Memory ============

/// An IR already in memory (presets, tests, generated kernels)
#[derive(Debug, Clone)]
pub struct MemorySource {
    name: String,
    ir: ImpulseResponse,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, ir: ImpulseResponse) -> Self {
        Self { name: name.into(), ir }
    }
}

impl IrSource for MemorySource {
    fn load(&self) -> ConvResult<ImpulseResponse> {
        Ok(self.ir.clone())
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}
