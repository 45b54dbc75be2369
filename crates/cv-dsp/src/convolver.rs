//! Engine selection
//!
//! `Convolver` wraps the four strategies behind one concrete type so that a
//! single `SyncedEngine<Convolver>` can switch strategy with the same publish
//! that switches IR.

use serde::{Deserialize, Serialize};

use cv_core::{ConvResult, MAX_PARTITION_SIZE, MIN_PARTITION_SIZE, ProcessSetup, Sample};

use crate::direct::DirectConvolver;
use crate::filter_design::ParallelFilterConfig;
use crate::fourier::FourierTransformFactory;
use crate::impulse::ImpulseResponse;
use crate::non_uniform::NonUniformConvolver;
use crate::parallel::ParallelFilterConvolver;
use crate::uniform::UniformConvolver;
use crate::ConvolutionEngine;

/// Convolution strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// Time-domain, zero latency, cost grows with IR length
    Direct,
    /// Equal FFT partitions, latency one block
    Uniform,
    /// Growing FFT partitions, latency one head block
    #[default]
    NonUniform,
    /// Parallel second-order sections fitted to the IR
    ParallelFilter,
}

impl EngineKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Uniform => "uniform",
            Self::NonUniform => "non_uniform",
            Self::ParallelFilter => "parallel_filter",
        }
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Construction parameters for a `Convolver`
#[derive(Debug, Clone, PartialEq)]
pub struct ConvolverOptions {
    pub kind: EngineKind,
    /// Uniform block / non-uniform head partition size (power of two)
    pub block_size: usize,
    /// Largest non-uniform partition
    pub max_partition_size: usize,
    pub parallel: ParallelFilterConfig,
}

impl Default for ConvolverOptions {
    fn default() -> Self {
        Self {
            kind: EngineKind::default(),
            block_size: 256,
            max_partition_size: 4096,
            parallel: ParallelFilterConfig::default(),
        }
    }
}

impl ConvolverOptions {
    /// Partition size matching a host block size: the next power of two,
    /// clamped to the supported partition range
    pub fn block_size_for(setup: &ProcessSetup) -> usize {
        setup
            .max_block_size
            .next_power_of_two()
            .clamp(MIN_PARTITION_SIZE, MAX_PARTITION_SIZE)
    }
}

/// One of the four strategies
pub enum Convolver {
    Direct(DirectConvolver),
    Uniform(UniformConvolver),
    NonUniform(NonUniformConvolver),
    ParallelFilter(ParallelFilterConvolver),
}

impl Convolver {
    /// Build the strategy selected by `options.kind` (all allocation happens here)
    pub fn build(
        ir: &ImpulseResponse,
        options: &ConvolverOptions,
        num_channels: usize,
        factory: &dyn FourierTransformFactory,
    ) -> ConvResult<Self> {
        let engine = match options.kind {
            EngineKind::Direct => Self::Direct(DirectConvolver::new(ir, num_channels)?),
            EngineKind::Uniform => Self::Uniform(UniformConvolver::new(
                ir,
                options.block_size,
                num_channels,
                factory,
            )?),
            EngineKind::NonUniform => Self::NonUniform(NonUniformConvolver::new(
                ir,
                options.block_size,
                options.max_partition_size,
                num_channels,
                factory,
            )?),
            EngineKind::ParallelFilter => Self::ParallelFilter(ParallelFilterConvolver::new(
                ir,
                &options.parallel,
                num_channels,
            )?),
        };
        Ok(engine)
    }

    pub fn kind(&self) -> EngineKind {
        match self {
            Self::Direct(_) => EngineKind::Direct,
            Self::Uniform(_) => EngineKind::Uniform,
            Self::NonUniform(_) => EngineKind::NonUniform,
            Self::ParallelFilter(_) => EngineKind::ParallelFilter,
        }
    }

    pub fn setup(&self) -> Option<ProcessSetup> {
        match self {
            Self::Direct(e) => e.setup(),
            Self::Uniform(e) => e.setup(),
            Self::NonUniform(e) => e.setup(),
            Self::ParallelFilter(e) => e.setup(),
        }
    }

    fn engine_mut(&mut self) -> &mut dyn ConvolutionEngine {
        match self {
            Self::Direct(e) => e,
            Self::Uniform(e) => e,
            Self::NonUniform(e) => e,
            Self::ParallelFilter(e) => e,
        }
    }

    fn engine(&self) -> &dyn ConvolutionEngine {
        match self {
            Self::Direct(e) => e,
            Self::Uniform(e) => e,
            Self::NonUniform(e) => e,
            Self::ParallelFilter(e) => e,
        }
    }
}

impl ConvolutionEngine for Convolver {
    fn configure(&mut self, max_block_size: usize, sample_rate: f64) -> ConvResult<()> {
        self.engine_mut().configure(max_block_size, sample_rate)
    }

    #[inline]
    fn process(&mut self, inputs: &[&[Sample]], outputs: &mut [&mut [Sample]]) {
        match self {
            Self::Direct(e) => e.process(inputs, outputs),
            Self::Uniform(e) => e.process(inputs, outputs),
            Self::NonUniform(e) => e.process(inputs, outputs),
            Self::ParallelFilter(e) => e.process(inputs, outputs),
        }
    }

    fn latency(&self) -> usize {
        self.engine().latency()
    }

    fn reset(&mut self) {
        self.engine_mut().reset();
    }

    fn num_channels(&self) -> usize {
        self.engine().num_channels()
    }
}
