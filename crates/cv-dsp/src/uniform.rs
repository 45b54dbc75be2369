//! Uniform partitioned FFT convolution
//!
//! The whole IR is split into partitions of one block size `B`. Fixed cost per
//! block, latency `B`.

use cv_core::{ConvError, ConvResult, ProcessSetup, Sample};

use crate::buffering::BlockBuffer;
use crate::fourier::FourierTransformFactory;
use crate::impulse::ImpulseResponse;
use crate::partition::{PartitionScheme, UniformStage};
use crate::{ConvolutionEngine, MAX_ENGINE_CHANNELS, pass_through};

pub struct UniformConvolver {
    scheme: PartitionScheme,
    /// `None` for a zero-length IR (pass-through)
    stage: Option<UniformStage>,
    buffers: Vec<BlockBuffer>,
    setup: Option<ProcessSetup>,
}

impl UniformConvolver {
    pub fn new(
        ir: &ImpulseResponse,
        block_size: usize,
        num_channels: usize,
        factory: &dyn FourierTransformFactory,
    ) -> ConvResult<Self> {
        if num_channels == 0 || num_channels > MAX_ENGINE_CHANNELS {
            return Err(ConvError::UnsupportedChannels(num_channels));
        }
        let scheme = PartitionScheme::uniform(ir.len(), block_size)?;

        let stage = match scheme.stages().first() {
            Some(&stage) => Some(UniformStage::new(ir, stage, num_channels, factory)?),
            None => None,
        };
        let buffers = (0..num_channels)
            .map(|_| BlockBuffer::new(block_size))
            .collect::<ConvResult<Vec<_>>>()?;

        log::debug!(
            "Uniform convolver: {} partitions of {} samples, {} channels",
            scheme.partition_count(),
            block_size,
            num_channels
        );

        Ok(Self {
            scheme,
            stage,
            buffers,
            setup: None,
        })
    }

    pub fn scheme(&self) -> &PartitionScheme {
        &self.scheme
    }

    pub fn block_size(&self) -> usize {
        self.scheme.head_size()
    }

    /// Setup recorded by the last successful `configure`
    pub fn setup(&self) -> Option<ProcessSetup> {
        self.setup
    }
}

impl ConvolutionEngine for UniformConvolver {
    fn configure(&mut self, max_block_size: usize, sample_rate: f64) -> ConvResult<()> {
        self.setup = Some(ProcessSetup::new(max_block_size, sample_rate)?);
        Ok(())
    }

    fn process(&mut self, inputs: &[&[Sample]], outputs: &mut [&mut [Sample]]) {
        let Self { stage, buffers, .. } = self;

        for (ch, (input, output)) in inputs.iter().zip(outputs.iter_mut()).enumerate() {
            match (stage.as_mut(), buffers.get_mut(ch)) {
                (Some(stage), Some(buffer)) => {
                    buffer.process(input, output, |block, out| stage.process_block(ch, block, out));
                }
                _ => pass_through(input, output),
            }
        }
    }

    fn latency(&self) -> usize {
        if self.stage.is_some() {
            self.block_size()
        } else {
            0
        }
    }

    fn reset(&mut self) {
        if let Some(stage) = &mut self.stage {
            stage.reset();
        }
        for buffer in &mut self.buffers {
            buffer.reset();
        }
    }

    fn num_channels(&self) -> usize {
        self.buffers.len()
    }
}
