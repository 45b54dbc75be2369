//! Partition schemes and the uniformly partitioned overlap-save stage
//!
//! A stage convolves its input with one contiguous IR segment split into
//! `count` partitions of `size` samples. Each input block is transformed once
//! (window of the previous and current block, FFT size `2 * size`) and kept in
//! a frequency-domain delay line; partition `p` meets the spectrum that is `p`
//! blocks old, and the valid second half of the inverse transform is the
//! output.

use rustfft::num_complex::Complex;

use cv_core::{ConvError, ConvResult, MAX_PARTITION_SIZE, Sample};

use crate::fourier::{FourierTransform, FourierTransformFactory, spectrum_buffer};
use crate::impulse::ImpulseResponse;

/// Partitions per size before the non-uniform scheme doubles the size
pub const PARTITIONS_PER_SIZE: usize = 2;

// ============ Partition Scheme ============

/// Run of equally sized partitions covering `IR[offset .. offset + size * count]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionStage {
    pub size: usize,
    pub offset: usize,
    pub count: usize,
}

impl PartitionStage {
    /// First IR sample after this stage
    #[inline]
    pub fn end(&self) -> usize {
        self.offset + self.size * self.count
    }
}

/// How an IR is split into partitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionScheme {
    stages: Vec<PartitionStage>,
    head_size: usize,
    ir_len: usize,
}

fn check_partition_size(size: usize) -> ConvResult<()> {
    if size == 0 || !size.is_power_of_two() || size > MAX_PARTITION_SIZE {
        return Err(ConvError::InvalidBlockSize(size));
    }
    Ok(())
}

impl PartitionScheme {
    /// Equal partitions of `block_size`
    pub fn uniform(ir_len: usize, block_size: usize) -> ConvResult<Self> {
        check_partition_size(block_size)?;
        let stages = if ir_len == 0 {
            Vec::new()
        } else {
            vec![PartitionStage {
                size: block_size,
                offset: 0,
                count: ir_len.div_ceil(block_size),
            }]
        };
        Ok(Self {
            stages,
            head_size: block_size,
            ir_len,
        })
    }

    /// Sizes double every `PARTITIONS_PER_SIZE` partitions, starting at
    /// `head_size` and capped at `max_size`:
    /// `B, B, 2B, 2B, 4B, 4B, ... M, M, M ...`
    ///
    /// Every stage then starts at least `size - head_size` samples into the
    /// IR, so its output is ready before it is due.
    pub fn non_uniform(ir_len: usize, head_size: usize, max_size: usize) -> ConvResult<Self> {
        check_partition_size(head_size)?;
        check_partition_size(max_size)?;
        let max_size = max_size.max(head_size);

        let mut stages = Vec::new();
        let mut offset = 0;
        let mut size = head_size;

        while offset < ir_len {
            let needed = (ir_len - offset).div_ceil(size);
            let count = if size >= max_size {
                needed
            } else {
                needed.min(PARTITIONS_PER_SIZE)
            };

            stages.push(PartitionStage {
                size,
                offset,
                count,
            });
            offset += size * count;
            size = (size * 2).min(max_size);
        }

        Ok(Self {
            stages,
            head_size,
            ir_len,
        })
    }

    pub fn stages(&self) -> &[PartitionStage] {
        &self.stages
    }

    /// Smallest partition size (determines latency)
    #[inline]
    pub fn head_size(&self) -> usize {
        self.head_size
    }

    /// IR length the scheme was built for
    pub fn ir_len(&self) -> usize {
        self.ir_len
    }

    /// Samples covered including zero padding of the last partition
    pub fn represented_len(&self) -> usize {
        self.stages.last().map_or(0, PartitionStage::end)
    }

    pub fn partition_count(&self) -> usize {
        self.stages.iter().map(|s| s.count).sum()
    }

    /// Size of every partition in IR order
    pub fn sizes(&self) -> Vec<usize> {
        self.stages
            .iter()
            .flat_map(|s| std::iter::repeat_n(s.size, s.count))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

// ============ Uniform Stage ============

/// Per-channel running state of a stage
struct StageChannel {
    /// IR channel this host channel reads
    ir_index: usize,
    /// Previous and current input block
    window: Vec<Sample>,
    /// Frequency delay line; `fdl[fdl_pos]` is the newest spectrum
    fdl: Vec<Vec<Complex<Sample>>>,
    fdl_pos: usize,
    /// Spectrum of the block in progress
    accum: Vec<Complex<Sample>>,
}

/// Uniformly partitioned overlap-save convolution of one IR segment
pub struct UniformStage {
    size: usize,
    offset: usize,
    fft: Box<dyn FourierTransform>,
    /// `[ir channel][partition][bin]`
    spectra: Vec<Vec<Vec<Complex<Sample>>>>,
    channels: Vec<StageChannel>,
    time: Vec<Sample>,
}

impl UniformStage {
    /// Transform `stage` of every IR channel; allocate state for `num_channels` host channels
    pub fn new(
        ir: &ImpulseResponse,
        stage: PartitionStage,
        num_channels: usize,
        factory: &dyn FourierTransformFactory,
    ) -> ConvResult<Self> {
        check_partition_size(stage.size)?;
        let size = stage.size;
        let fft_size = 2 * size;
        let mut fft = factory.create(fft_size)?;
        let mut time = vec![0.0; fft_size];

        let mut spectra = Vec::with_capacity(ir.num_channels());
        for source in ir.channels() {
            let mut partitions = Vec::with_capacity(stage.count);
            for p in 0..stage.count {
                let start = (stage.offset + p * size).min(source.len());
                let end = (start + size).min(source.len());

                time.fill(0.0);
                time[..end - start].copy_from_slice(&source[start..end]);

                let mut spectrum = spectrum_buffer(fft_size);
                fft.forward(&mut time, &mut spectrum)?;
                partitions.push(spectrum);
            }
            spectra.push(partitions);
        }

        let ir_channels = ir.num_channels();
        let channels = (0..num_channels)
            .map(|ch| StageChannel {
                ir_index: ch.min(ir_channels - 1),
                window: vec![0.0; fft_size],
                fdl: vec![spectrum_buffer(fft_size); stage.count],
                fdl_pos: 0,
                accum: spectrum_buffer(fft_size),
            })
            .collect();

        Ok(Self {
            size,
            offset: stage.offset,
            fft,
            spectra,
            channels,
            time,
        })
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Partitions in this stage
    #[inline]
    pub fn count(&self) -> usize {
        self.channels.first().map_or(0, |c| c.fdl.len())
    }

    /// Convolve one block of `size` samples for host channel `ch`
    pub fn process_block(&mut self, ch: usize, input: &[Sample], output: &mut [Sample]) {
        let count = self.count();
        self.begin_block(ch, input);
        self.accumulate(ch, 0..count);
        self.finish_block(ch, output);
    }

    /// First phase of a block: transform the window into the newest FDL slot
    /// and clear the channel's accumulated spectrum
    pub fn begin_block(&mut self, ch: usize, input: &[Sample]) {
        let Self {
            size,
            fft,
            channels,
            time,
            ..
        } = self;
        let size = *size;
        debug_assert_eq!(input.len(), size);

        let state = &mut channels[ch];
        let count = state.fdl.len();

        state.window.copy_within(size.., 0);
        state.window[size..].copy_from_slice(input);
        time.copy_from_slice(&state.window);

        state.fdl_pos = (state.fdl_pos + count - 1) % count;
        let forward = fft.forward(time, &mut state.fdl[state.fdl_pos]);
        debug_assert!(forward.is_ok(), "stage buffers are sized for the transform");

        state.accum.fill(Complex::new(0.0, 0.0));
    }

    /// Multiply-accumulate `partitions` against their delayed input spectra
    pub fn accumulate(&mut self, ch: usize, partitions: std::ops::Range<usize>) {
        let state = &mut self.channels[ch];
        let count = state.fdl.len();
        let spectra = &self.spectra[state.ir_index];

        for p in partitions {
            let x = &state.fdl[(state.fdl_pos + p) % count];
            for ((a, &xk), &hk) in state.accum.iter_mut().zip(x.iter()).zip(spectra[p].iter()) {
                *a += xk * hk;
            }
        }
    }

    /// Last phase of a block: inverse transform, valid half into `output`
    pub fn finish_block(&mut self, ch: usize, output: &mut [Sample]) {
        let Self {
            size,
            fft,
            channels,
            time,
            ..
        } = self;
        debug_assert_eq!(output.len(), *size);

        let inverse = fft.inverse(&mut channels[ch].accum, time);
        debug_assert!(inverse.is_ok(), "stage buffers are sized for the transform");
        output.copy_from_slice(&time[*size..]);
    }

    pub fn reset(&mut self) {
        for state in &mut self.channels {
            state.window.fill(0.0);
            for slot in &mut state.fdl {
                slot.fill(Complex::new(0.0, 0.0));
            }
            state.fdl_pos = 0;
        }
    }
}
