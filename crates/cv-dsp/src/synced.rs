//! Glitch-free engine replacement
//!
//! `SyncedEngine` is what the audio thread holds. It owns the reader half of
//! a `ThreadSyncable` carrying a complete engine; the loader owns the
//! matching `EnginePublisher`. A new engine is configured off the audio
//! thread with the last host setup, published, and adopted at the start of
//! the next `process` call. One call runs entirely on one engine.

use std::sync::Arc;

use parking_lot::Mutex;

use cv_core::{ConvResult, ProcessSetup, Sample, SyncReader, SyncWriter, ThreadSyncable};

use crate::{ConvolutionEngine, pass_through};

/// Audio-thread side: adopts published engines at block boundaries
pub struct SyncedEngine<E: ConvolutionEngine + 'static> {
    reader: SyncReader<E>,
    /// Host setup shared with the publisher so new engines arrive configured
    shared_setup: Arc<Mutex<Option<ProcessSetup>>>,
    setup: Option<ProcessSetup>,
    num_channels: usize,
}

/// Loader side: hands engines to the audio thread
pub struct EnginePublisher<E: ConvolutionEngine + 'static> {
    writer: SyncWriter<E>,
    shared_setup: Arc<Mutex<Option<ProcessSetup>>>,
}

impl<E: ConvolutionEngine + 'static> Clone for EnginePublisher<E> {
    fn clone(&self) -> Self {
        Self {
            writer: self.writer.clone(),
            shared_setup: Arc::clone(&self.shared_setup),
        }
    }
}

impl<E: ConvolutionEngine + 'static> SyncedEngine<E> {
    /// Create an empty engine slot (passes audio through until the first publish)
    pub fn new(num_channels: usize) -> (Self, EnginePublisher<E>) {
        let (writer, reader) = ThreadSyncable::new(None);
        let shared_setup = Arc::new(Mutex::new(None));
        (
            Self {
                reader,
                shared_setup: Arc::clone(&shared_setup),
                setup: None,
                num_channels,
            },
            EnginePublisher {
                writer,
                shared_setup,
            },
        )
    }

    /// Adopt any pending engine now. Returns true when one was adopted.
    pub fn update(&mut self) -> bool {
        self.reader.update()
    }

    /// Currently active engine
    pub fn active(&self) -> Option<&E> {
        self.reader.get()
    }

    pub fn setup(&self) -> Option<ProcessSetup> {
        self.setup
    }
}

impl<E: ConvolutionEngine + 'static> ConvolutionEngine for SyncedEngine<E> {
    /// Record the setup for future publishes and configure the active engine.
    /// Runs on the host's setup thread, never concurrently with `process`.
    fn configure(&mut self, max_block_size: usize, sample_rate: f64) -> ConvResult<()> {
        let setup = ProcessSetup::new(max_block_size, sample_rate)?;
        *self.shared_setup.lock() = Some(setup);
        self.setup = Some(setup);

        self.reader.update();
        if let Some(engine) = self.reader.get_mut() {
            engine.configure(max_block_size, sample_rate)?;
        }
        Ok(())
    }

    fn process(&mut self, inputs: &[&[Sample]], outputs: &mut [&mut [Sample]]) {
        if self.setup.is_none() {
            for (input, output) in inputs.iter().zip(outputs.iter_mut()) {
                pass_through(input, output);
            }
            return;
        }

        self.reader.update();
        match self.reader.get_mut() {
            Some(engine) => engine.process(inputs, outputs),
            None => {
                for (input, output) in inputs.iter().zip(outputs.iter_mut()) {
                    pass_through(input, output);
                }
            }
        }
    }

    fn latency(&self) -> usize {
        self.reader.get().map_or(0, ConvolutionEngine::latency)
    }

    fn reset(&mut self) {
        if let Some(engine) = self.reader.get_mut() {
            engine.reset();
        }
    }

    fn num_channels(&self) -> usize {
        self.num_channels
    }
}

impl<E: ConvolutionEngine + 'static> EnginePublisher<E> {
    /// Configure `engine` with the current host setup (if any) and queue it
    /// for adoption. Fails without publishing if configuration fails.
    pub fn publish(&self, mut engine: E) -> ConvResult<()> {
        let setup = *self.shared_setup.lock();
        if let Some(setup) = setup {
            engine.configure(setup.max_block_size, setup.sample_rate)?;
        }
        self.writer.publish(engine);
        Ok(())
    }

    /// Drop the engine retired by the last swap. Returns true when one was freed.
    pub fn collect(&self) -> bool {
        self.writer.collect()
    }

    /// True while the audio thread has not adopted the last publish
    pub fn has_pending(&self) -> bool {
        self.writer.has_pending()
    }

    /// Host setup recorded by the last `configure`
    pub fn setup(&self) -> Option<ProcessSetup> {
        *self.shared_setup.lock()
    }

    pub fn published(&self) -> u64 {
        self.writer.published()
    }

    pub fn adopted(&self) -> u64 {
        self.writer.adopted()
    }
}
