//! Host-facing convolution processor
//!
//! `ConvolutionProcessor` lives on the audio thread and implements the engine
//! contract on top of a `SyncedEngine<Convolver>`. The matching `IrLoader`
//! stays on a control thread and publishes engines into it.

use std::sync::Arc;

use cv_core::{ConvResult, ProcessSetup, Sample};
use cv_dsp::{ConvolutionEngine, Convolver, SyncedEngine, default_factory};

use crate::config::LoaderConfig;
use crate::listener::UpdateListener;
use crate::loader::{BusyState, IrLoader, LoaderControl};

pub struct ConvolutionProcessor {
    engine: SyncedEngine<Convolver>,
    control: LoaderControl,
}

impl ConvolutionProcessor {
    /// Processor for `num_channels` host channels plus the loader feeding it
    pub fn new(
        num_channels: usize,
        config: LoaderConfig,
        listener: Arc<dyn UpdateListener>,
    ) -> ConvResult<(Self, IrLoader)> {
        let (engine, publisher) = SyncedEngine::new(num_channels);
        let loader = IrLoader::spawn(publisher, config, listener, default_factory(), num_channels)?;
        let control = loader.control();
        Ok((Self { engine, control }, loader))
    }

    /// Loader handle (for use off the audio thread)
    pub fn control(&self) -> &LoaderControl {
        &self.control
    }

    pub fn busy_state(&self) -> BusyState {
        self.control.busy_state()
    }

    pub fn setup(&self) -> Option<ProcessSetup> {
        self.engine.setup()
    }

    /// The engine processing right now, if any
    pub fn active(&self) -> Option<&Convolver> {
        self.engine.active()
    }

    /// True when the engine derived for `previous` differs from one for `next`
    fn needs_rebuild(&self, previous: Option<ProcessSetup>, next: &ProcessSetup) -> bool {
        let Some(previous) = previous else {
            return true;
        };
        if previous.sample_rate != next.sample_rate {
            return true;
        }
        let config = self.control.config();
        config.convolver_options(Some(&previous)).block_size != config.convolver_options(Some(next)).block_size
    }
}

impl ConvolutionEngine for ConvolutionProcessor {
    /// Reconfigures the active engine immediately and, when the rate or the
    /// derived block size changed, asks the loader to rebuild from the last IR.
    fn configure(&mut self, max_block_size: usize, sample_rate: f64) -> ConvResult<()> {
        let previous = self.engine.setup();
        self.engine.configure(max_block_size, sample_rate)?;

        let next = ProcessSetup::new(max_block_size, sample_rate)?;
        if self.control.has_ir() && self.needs_rebuild(previous, &next) {
            log::info!("Host setup changed to {} @ {} Hz, rebuilding engine", max_block_size, sample_rate);
            self.control.reload();
        }
        Ok(())
    }

    #[inline]
    fn process(&mut self, inputs: &[&[Sample]], outputs: &mut [&mut [Sample]]) {
        self.engine.process(inputs, outputs);
    }

    fn latency(&self) -> usize {
        self.engine.latency()
    }

    fn reset(&mut self) {
        self.engine.reset();
    }

    fn num_channels(&self) -> usize {
        self.engine.num_channels()
    }
}
