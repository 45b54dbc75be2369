//! Parallel-filter convolution
//!
//! Approximates the IR with a `FilterBank` of second-order sections run in
//! parallel plus a short FIR path. No transform and no added latency; the
//! cost per sample depends on the section count, not the IR length.

use cv_core::{ConvError, ConvResult, ProcessSetup, Sample};

use crate::direct::DirectKernel;
use crate::filter_bank::{FilterBank, SectionState};
use crate::filter_design::{MAX_FIR_TAPS, ParallelFilterConfig, design};
use crate::impulse::ImpulseResponse;
use crate::{ConvolutionEngine, MAX_ENGINE_CHANNELS, pass_through};

struct ParallelChannel {
    /// Bank this host channel runs
    bank_index: usize,
    states: Vec<SectionState>,
    fir: DirectKernel<MAX_FIR_TAPS>,
}

pub struct ParallelFilterConvolver {
    banks: Vec<FilterBank>,
    channels: Vec<ParallelChannel>,
    setup: Option<ProcessSetup>,
}

impl ParallelFilterConvolver {
    /// Fit one bank per IR channel
    pub fn new(ir: &ImpulseResponse, config: &ParallelFilterConfig, num_channels: usize) -> ConvResult<Self> {
        let banks = ir
            .channels()
            .iter()
            .map(|channel| design(channel, config, ir.sample_rate()))
            .collect::<ConvResult<Vec<_>>>()?;
        Self::with_banks(banks, num_channels)
    }

    /// Run precomputed banks; host channel `i` uses bank `min(i, banks - 1)`
    pub fn with_banks(banks: Vec<FilterBank>, num_channels: usize) -> ConvResult<Self> {
        if num_channels == 0 || num_channels > MAX_ENGINE_CHANNELS {
            return Err(ConvError::UnsupportedChannels(num_channels));
        }
        if banks.is_empty() {
            return Err(ConvError::UnsupportedChannels(0));
        }
        if let Some(bank) = banks.iter().find(|b| !b.is_stable()) {
            return Err(ConvError::FilterDesign(format!(
                "unstable section in bank of {}",
                bank.len()
            )));
        }

        let channels = (0..num_channels)
            .map(|ch| {
                let bank_index = ch.min(banks.len() - 1);
                let bank = &banks[bank_index];
                Ok(ParallelChannel {
                    bank_index,
                    states: vec![SectionState::default(); bank.len()],
                    fir: DirectKernel::new(bank.fir())?,
                })
            })
            .collect::<ConvResult<Vec<_>>>()?;

        log::debug!(
            "Parallel filter convolver: {} banks of {} sections, {} channels",
            banks.len(),
            banks[0].len(),
            num_channels
        );

        Ok(Self {
            banks,
            channels,
            setup: None,
        })
    }

    pub fn banks(&self) -> &[FilterBank] {
        &self.banks
    }

    /// Setup recorded by the last successful `configure`
    pub fn setup(&self) -> Option<ProcessSetup> {
        self.setup
    }
}

impl ConvolutionEngine for ParallelFilterConvolver {
    fn configure(&mut self, max_block_size: usize, sample_rate: f64) -> ConvResult<()> {
        self.setup = Some(ProcessSetup::new(max_block_size, sample_rate)?);
        Ok(())
    }

    fn process(&mut self, inputs: &[&[Sample]], outputs: &mut [&mut [Sample]]) {
        let Self { banks, channels, .. } = self;

        for (ch, (input, output)) in inputs.iter().zip(outputs.iter_mut()).enumerate() {
            let Some(state) = channels.get_mut(ch) else {
                pass_through(input, output);
                continue;
            };
            let bank = &banks[state.bank_index];
            if bank.is_empty() {
                pass_through(input, output);
                continue;
            }

            for (y, &x) in output.iter_mut().zip(input.iter()) {
                let mut acc = if state.fir.is_empty() { 0.0 } else { state.fir.tick(x) };
                for (s, section) in state.states.iter_mut().zip(bank.sections()) {
                    acc += s.tick(section, x);
                }
                *y = acc;
            }
        }
    }

    fn latency(&self) -> usize {
        0
    }

    fn reset(&mut self) {
        for state in &mut self.channels {
            state.states.iter_mut().for_each(SectionState::reset);
            state.fir.reset();
        }
    }

    fn num_channels(&self) -> usize {
        self.channels.len()
    }
}
