//! Non-uniform partitioned FFT convolution
//!
//! Small partitions at the IR head keep latency at one head block `B`; larger
//! partitions further out cut the per-sample cost for long IRs.
//!
//! Scheduling: each stage of size `S` gathers `S / B` head blocks and starts
//! when its buffer is full, which is always on a head-block boundary. The
//! result covers output times `[t_end - S + offset, t_end + offset)` where
//! `t_end` is the end of the head block that filled it. That window starts
//! `offset + B - S` samples after the block being emitted, so a stage has
//! `(offset + B - S) / B` spare head blocks before its output is due.
//!
//! The work of a stage is spread over those blocks (at most `S / B`): the
//! forward transform runs on the filling block, the partition products are
//! split evenly across the steps, and the inverse transform runs on the last
//! step. Results are scattered into a future-output accumulator and the head
//! block is read out last.

use cv_core::{ConvError, ConvResult, MAX_PARTITION_SIZE, ProcessSetup, Sample};

use crate::buffering::BlockBuffer;
use crate::fourier::FourierTransformFactory;
use crate::impulse::ImpulseResponse;
use crate::partition::{PartitionScheme, UniformStage};
use crate::{ConvolutionEngine, MAX_ENGINE_CHANNELS, pass_through};

/// Future-output ring for one channel
struct Accumulator {
    data: Vec<Sample>,
    mask: usize,
    /// Position of the block currently being emitted
    pos: usize,
}

impl Accumulator {
    fn new(span: usize) -> Self {
        let capacity = span.next_power_of_two();
        Self {
            data: vec![0.0; capacity],
            mask: capacity - 1,
            pos: 0,
        }
    }

    /// Add `values` starting `delay` samples after the current block start
    #[inline]
    fn add(&mut self, delay: usize, values: &[Sample]) {
        let start = self.pos + delay;
        for (i, &v) in values.iter().enumerate() {
            self.data[(start + i) & self.mask] += v;
        }
    }

    /// Move the current block into `out` and advance
    #[inline]
    fn emit(&mut self, out: &mut [Sample]) {
        for (i, y) in out.iter_mut().enumerate() {
            let slot = &mut self.data[(self.pos + i) & self.mask];
            *y = *slot;
            *slot = 0.0;
        }
        self.pos = (self.pos + out.len()) & self.mask;
    }

    fn reset(&mut self) {
        self.data.fill(0.0);
        self.pos = 0;
    }
}

/// Per-channel scheduling state
struct NonUniformChannel {
    buffer: BlockBuffer,
    /// Input gathered for each stage
    stage_inputs: Vec<Vec<Sample>>,
    stage_fill: Vec<usize>,
    /// Step of the block each stage is working on, `None` when idle
    stage_step: Vec<Option<usize>>,
    accumulator: Accumulator,
}

pub struct NonUniformConvolver {
    scheme: PartitionScheme,
    stages: Vec<UniformStage>,
    /// Head blocks each stage's work is spread over
    steps: Vec<usize>,
    channels: Vec<NonUniformChannel>,
    /// Stage output scratch (largest stage size)
    scratch: Vec<Sample>,
    setup: Option<ProcessSetup>,
}

impl NonUniformConvolver {
    pub fn new(
        ir: &ImpulseResponse,
        head_size: usize,
        max_partition_size: usize,
        num_channels: usize,
        factory: &dyn FourierTransformFactory,
    ) -> ConvResult<Self> {
        if num_channels == 0 || num_channels > MAX_ENGINE_CHANNELS {
            return Err(ConvError::UnsupportedChannels(num_channels));
        }
        let scheme = PartitionScheme::non_uniform(ir.len(), head_size, max_partition_size.min(MAX_PARTITION_SIZE))?;

        let stages = scheme
            .stages()
            .iter()
            .map(|&stage| UniformStage::new(ir, stage, num_channels, factory))
            .collect::<ConvResult<Vec<_>>>()?;

        let steps = stages
            .iter()
            .map(|s| ((s.offset() + head_size - s.size()) / head_size + 1).min(s.size() / head_size))
            .collect::<Vec<_>>();

        let largest = stages.iter().map(UniformStage::size).max().unwrap_or(head_size);
        let span = stages
            .iter()
            .map(|s| s.offset() + head_size)
            .max()
            .unwrap_or(head_size)
            + head_size;

        let channels = (0..num_channels)
            .map(|_| {
                Ok(NonUniformChannel {
                    buffer: BlockBuffer::new(head_size)?,
                    stage_inputs: stages.iter().map(|s| vec![0.0; s.size()]).collect(),
                    stage_fill: vec![0; stages.len()],
                    stage_step: vec![None; stages.len()],
                    accumulator: Accumulator::new(span),
                })
            })
            .collect::<ConvResult<Vec<_>>>()?;

        log::debug!(
            "Non-uniform convolver: {} stages, partition sizes {:?}, spread {:?}, {} channels",
            stages.len(),
            scheme.stages().iter().map(|s| (s.size, s.count)).collect::<Vec<_>>(),
            steps,
            num_channels
        );

        Ok(Self {
            scheme,
            stages,
            steps,
            channels,
            scratch: vec![0.0; largest],
            setup: None,
        })
    }

    pub fn scheme(&self) -> &PartitionScheme {
        &self.scheme
    }

    pub fn head_size(&self) -> usize {
        self.scheme.head_size()
    }

    /// Setup recorded by the last successful `configure`
    pub fn setup(&self) -> Option<ProcessSetup> {
        self.setup
    }
}

/// Feed one head block to every stage, advance the stage work in flight,
/// then emit the block
#[allow(clippy::too_many_arguments)]
fn process_head_block(
    ch: usize,
    stages: &mut [UniformStage],
    steps: &[usize],
    stage_inputs: &mut [Vec<Sample>],
    stage_fill: &mut [usize],
    stage_step: &mut [Option<usize>],
    accumulator: &mut Accumulator,
    scratch: &mut [Sample],
    block: &[Sample],
    out: &mut [Sample],
) {
    let head = block.len();

    for (s, stage) in stages.iter_mut().enumerate() {
        let size = stage.size();
        let fill = stage_fill[s];
        stage_inputs[s][fill..fill + head].copy_from_slice(block);
        stage_fill[s] = fill + head;

        if stage_fill[s] == size {
            // Work never spans more head blocks than the stage gathers
            debug_assert!(stage_step[s].is_none());
            stage.begin_block(ch, &stage_inputs[s]);
            stage_fill[s] = 0;
            stage_step[s] = Some(0);
        }

        let Some(step) = stage_step[s] else {
            continue;
        };
        let total = steps[s];
        let count = stage.count();
        stage.accumulate(ch, step * count / total..(step + 1) * count / total);

        if step + 1 == total {
            let result = &mut scratch[..size];
            stage.finish_block(ch, result);
            // steps were chosen so this never reaches into the past
            accumulator.add(stage.offset() + head - size - step * head, result);
            stage_step[s] = None;
        } else {
            stage_step[s] = Some(step + 1);
        }
    }

    accumulator.emit(out);
}

impl ConvolutionEngine for NonUniformConvolver {
    fn configure(&mut self, max_block_size: usize, sample_rate: f64) -> ConvResult<()> {
        self.setup = Some(ProcessSetup::new(max_block_size, sample_rate)?);
        Ok(())
    }

    fn process(&mut self, inputs: &[&[Sample]], outputs: &mut [&mut [Sample]]) {
        let Self {
            stages,
            steps,
            channels,
            scratch,
            ..
        } = self;

        for (ch, (input, output)) in inputs.iter().zip(outputs.iter_mut()).enumerate() {
            let Some(state) = channels.get_mut(ch).filter(|_| !stages.is_empty()) else {
                pass_through(input, output);
                continue;
            };
            let NonUniformChannel {
                buffer,
                stage_inputs,
                stage_fill,
                stage_step,
                accumulator,
            } = state;

            buffer.process(input, output, |block, out| {
                process_head_block(
                    ch,
                    stages,
                    steps,
                    stage_inputs,
                    stage_fill,
                    stage_step,
                    accumulator,
                    scratch,
                    block,
                    out,
                )
            });
        }
    }

    fn latency(&self) -> usize {
        if self.stages.is_empty() {
            0
        } else {
            self.head_size()
        }
    }

    fn reset(&mut self) {
        for stage in &mut self.stages {
            stage.reset();
        }
        for state in &mut self.channels {
            state.buffer.reset();
            state.stage_fill.fill(0);
            state.stage_step.fill(None);
            for input in &mut state.stage_inputs {
                input.fill(0.0);
            }
            state.accumulator.reset();
        }
    }

    fn num_channels(&self) -> usize {
        self.channels.len()
    }
}
