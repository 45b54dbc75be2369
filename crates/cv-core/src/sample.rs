//! Sample type and host processing setup

use serde::{Deserialize, Serialize};

use crate::{ConvError, ConvResult};

/// Type alias for audio samples (always f64 for maximum precision)
pub type Sample = f64;

/// Host processing parameters established by `configure`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProcessSetup {
    /// Largest block the host will pass to `process`
    pub max_block_size: usize,
    /// Host sample rate in Hz
    pub sample_rate: f64,
}

impl ProcessSetup {
    pub fn new(max_block_size: usize, sample_rate: f64) -> ConvResult<Self> {
        let setup = Self {
            max_block_size,
            sample_rate,
        };
        setup.validate()?;
        Ok(setup)
    }

    /// Reject zero block sizes and non-positive or non-finite sample rates
    pub fn validate(&self) -> ConvResult<()> {
        if self.max_block_size == 0 {
            return Err(ConvError::InvalidBlockSize(self.max_block_size));
        }
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            return Err(ConvError::InvalidSampleRate(self.sample_rate));
        }
        Ok(())
    }
}

impl Default for ProcessSetup {
    fn default() -> Self {
        Self {
            max_block_size: 512,
            sample_rate: 48000.0,
        }
    }
}
