//! Impulse response container
//!
//! Immutable once built: every tool in `ir_tools` returns a new instance.

use cv_core::{ConvError, ConvResult, MAX_IR_LENGTH, Sample};

/// Impulse Response container (planar, 1 or 2 channels)
#[derive(Debug, Clone, PartialEq)]
pub struct ImpulseResponse {
    channels: Vec<Vec<Sample>>,
    sample_rate: f64,
    /// Gain applied by normalization (1.0 when never normalized)
    gain: Sample,
}

impl ImpulseResponse {
    /// Largest supported channel count
    pub const MAX_CHANNELS: usize = 2;

    /// Build from planar channel data
    pub fn new(channels: Vec<Vec<Sample>>, sample_rate: f64) -> ConvResult<Self> {
        if channels.is_empty() || channels.len() > Self::MAX_CHANNELS {
            return Err(ConvError::UnsupportedChannels(channels.len()));
        }
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            return Err(ConvError::InvalidSampleRate(sample_rate));
        }

        let len = channels[0].len();
        if channels.iter().any(|c| c.len() != len) {
            return Err(ConvError::Malformed(
                "channels have different lengths".to_string(),
            ));
        }
        if len > MAX_IR_LENGTH {
            return Err(ConvError::ImpulseTooLong {
                len,
                max: MAX_IR_LENGTH,
            });
        }
        if channels.iter().flatten().any(|s| !s.is_finite()) {
            return Err(ConvError::Malformed("non-finite sample".to_string()));
        }

        Ok(Self {
            channels,
            sample_rate,
            gain: 1.0,
        })
    }

    pub fn mono(samples: Vec<Sample>, sample_rate: f64) -> ConvResult<Self> {
        Self::new(vec![samples], sample_rate)
    }

    pub fn stereo(left: Vec<Sample>, right: Vec<Sample>, sample_rate: f64) -> ConvResult<Self> {
        Self::new(vec![left, right], sample_rate)
    }

    /// Build from interleaved frames
    pub fn from_interleaved(data: &[Sample], num_channels: usize, sample_rate: f64) -> ConvResult<Self> {
        if num_channels == 0 || num_channels > Self::MAX_CHANNELS {
            return Err(ConvError::UnsupportedChannels(num_channels));
        }
        if data.len() % num_channels != 0 {
            return Err(ConvError::Malformed(format!(
                "{} samples do not divide into {} channels",
                data.len(),
                num_channels
            )));
        }

        let frames = data.len() / num_channels;
        let channels = (0..num_channels)
            .map(|ch| (0..frames).map(|i| data[i * num_channels + ch]).collect())
            .collect();
        Self::new(channels, sample_rate)
    }

    /// Identity kernel
    pub fn dirac(sample_rate: f64) -> ConvResult<Self> {
        Self::mono(vec![1.0], sample_rate)
    }

    /// Same layout and rate, new channel data (tools use this)
    pub(crate) fn derive(&self, channels: Vec<Vec<Sample>>) -> ConvResult<Self> {
        let mut ir = Self::new(channels, self.sample_rate)?;
        ir.gain = self.gain;
        Ok(ir)
    }

    pub(crate) fn with_gain(mut self, gain: Sample) -> Self {
        self.gain = gain;
        self
    }

    /// Length in samples (per channel)
    #[inline]
    pub fn len(&self) -> usize {
        self.channels[0].len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Kernel for output channel `ch`; a mono IR serves every channel
    #[inline]
    pub fn channel(&self, ch: usize) -> &[Sample] {
        &self.channels[ch.min(self.channels.len() - 1)]
    }

    pub fn channels(&self) -> &[Vec<Sample>] {
        &self.channels
    }

    #[inline]
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Duration in seconds
    pub fn duration_secs(&self) -> f64 {
        self.len() as f64 / self.sample_rate
    }

    /// Normalization gain already applied to the samples
    pub fn gain(&self) -> Sample {
        self.gain
    }

    /// Absolute peak over all channels
    pub fn peak(&self) -> Sample {
        self.channels
            .iter()
            .flatten()
            .fold(0.0, |peak: Sample, s| peak.max(s.abs()))
    }

    /// Sum of squares per channel
    pub fn energy(&self) -> Vec<Sample> {
        self.channels
            .iter()
            .map(|c| c.iter().map(|s| s * s).sum())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mono_ir_serves_all_channels() {
        let ir = ImpulseResponse::mono(vec![1.0, 0.5], 48000.0).unwrap();
        assert_eq!(ir.num_channels(), 1);
        assert_eq!(ir.channel(0), ir.channel(1));
        assert_eq!(ir.len(), 2);
        assert_eq!(ir.gain(), 1.0);
    }

    #[test]
    fn test_channel_count_validation() {
        assert!(matches!(
            ImpulseResponse::new(vec![], 48000.0),
            Err(ConvError::UnsupportedChannels(0))
        ));
        assert!(matches!(
            ImpulseResponse::new(vec![vec![0.0]; 3], 48000.0),
            Err(ConvError::UnsupportedChannels(3))
        ));
    }

    #[test]
    fn test_ragged_and_non_finite_rejected() {
        assert!(matches!(
            ImpulseResponse::stereo(vec![1.0, 2.0], vec![1.0], 48000.0),
            Err(ConvError::Malformed(_))
        ));
        assert!(matches!(
            ImpulseResponse::mono(vec![1.0, f64::NAN], 48000.0),
            Err(ConvError::Malformed(_))
        ));
        assert!(ImpulseResponse::mono(vec![1.0], 0.0).is_err());
    }

    #[test]
    fn test_too_long_rejected() {
        let result = ImpulseResponse::mono(vec![0.0; MAX_IR_LENGTH + 1], 48000.0);
        assert!(matches!(result, Err(ConvError::ImpulseTooLong { .. })));
    }

    #[test]
    fn test_zero_length_allowed() {
        let ir = ImpulseResponse::mono(Vec::new(), 44100.0).unwrap();
        assert!(ir.is_empty());
        assert_eq!(ir.peak(), 0.0);
    }

    #[test]
    fn test_from_interleaved() {
        let ir = ImpulseResponse::from_interleaved(&[1.0, -1.0, 0.5, -0.5], 2, 48000.0).unwrap();
        assert_eq!(ir.channel(0), &[1.0, 0.5]);
        assert_eq!(ir.channel(1), &[-1.0, -0.5]);
        assert!(ImpulseResponse::from_interleaved(&[1.0, 2.0, 3.0], 2, 48000.0).is_err());
        assert!((ir.duration_secs() - 2.0 / 48000.0).abs() < 1e-15);
    }
}
