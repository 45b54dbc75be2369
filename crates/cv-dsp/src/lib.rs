//! cv-dsp: Convolution engines
//!
//! Real-time convolution of a live stream against a loadable impulse response.
//!
//! ## Modules
//! - `fourier` - FFT abstraction (realfft / rustfft backends) and factories
//! - `impulse` - Immutable impulse response container
//! - `ir_tools` - IR preparation (mono, truncate, resample, min-phase, smoothing...)
//! - `direct` - Direct time-domain convolution
//! - `partition` - Partition schemes and the uniformly partitioned stage
//! - `uniform` - Uniform partitioned FFT convolution
//! - `non_uniform` - Non-uniform partitioned FFT convolution
//! - `filter_bank` / `filter_design` / `parallel` - Parallel second-order-section approximation
//! - `synced` - Lock-free hand-off of new engines to the audio thread
//! - `convolver` - Engine selection

pub mod buffering;
pub mod convolver;
pub mod direct;
pub mod filter_bank;
pub mod filter_design;
pub mod fourier;
pub mod impulse;
pub mod ir_tools;
pub mod non_uniform;
pub mod parallel;
pub mod partition;
pub mod synced;
pub mod uniform;

pub use convolver::{Convolver, ConvolverOptions, EngineKind};
pub use direct::DirectConvolver;
pub use filter_bank::{FilterBank, SecondOrderSection};
pub use filter_design::ParallelFilterConfig;
pub use fourier::{FourierTransform, FourierTransformFactory, RealFftFactory, default_factory};
pub use impulse::ImpulseResponse;
pub use non_uniform::NonUniformConvolver;
pub use parallel::ParallelFilterConvolver;
pub use partition::{PartitionScheme, PartitionStage};
pub use synced::{EnginePublisher, SyncedEngine};
pub use uniform::UniformConvolver;

use cv_core::{ConvResult, Sample};

/// Most host channels one engine instance serves
pub const MAX_ENGINE_CHANNELS: usize = 8;

/// Host-facing convolution contract
///
/// `process` must not block, allocate or fail. Channel `i` of the output is
/// the convolution of input channel `i`; channels beyond the engine's channel
/// count are passed through unchanged.
pub trait ConvolutionEngine: Send {
    /// Validate and record the host setup. Must be called before `process`
    /// and again whenever the host block size or sample rate changes.
    fn configure(&mut self, max_block_size: usize, sample_rate: f64) -> ConvResult<()>;

    /// Convolve one host block per channel
    fn process(&mut self, inputs: &[&[Sample]], outputs: &mut [&mut [Sample]]);

    /// Delay added by internal block buffering, in samples
    fn latency(&self) -> usize;

    /// Clear all convolution state (history, overlap, queues)
    fn reset(&mut self);

    /// Channels this engine convolves
    fn num_channels(&self) -> usize;

    /// Single-channel convenience
    fn process_mono(&mut self, input: &[Sample], output: &mut [Sample]) {
        let mut outputs = [output];
        self.process(&[input], &mut outputs);
    }
}

/// Copy input to output (identity kernel)
#[inline]
pub fn pass_through(input: &[Sample], output: &mut [Sample]) {
    let n = input.len().min(output.len());
    output[..n].copy_from_slice(&input[..n]);
}
