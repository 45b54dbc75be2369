//! Background IR loader
//!
//! Decoding, preprocessing and engine construction run on a dedicated thread
//! fed through a crossbeam channel. Every request gets a generation number;
//! when requests pile up only the newest is handled, and a result that was
//! overtaken by a newer request while it was being built is dropped without
//! publishing. Failures leave the active engine untouched and are reported
//! through the `UpdateListener`.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use parking_lot::Mutex;

use cv_core::{ConvError, ConvResult, gain_to_db};
use cv_dsp::{ConvolutionEngine, Convolver, EnginePublisher, FourierTransformFactory, ImpulseResponse};

use crate::config::LoaderConfig;
use crate::listener::{IrInfo, LoadEvent, LoadFailure, UpdateListener};
use crate::preprocess::preprocess;
use crate::source::{IrSource, WavFileSource};

/// How long the worker waits for a request before collecting retired engines
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Sleep between checks in `wait_idle`
const WAIT_STEP: Duration = Duration::from_millis(2);

// ═══════════════════════════════════════════════════════════════════════════
// BUSY STATE
// ═══════════════════════════════════════════════════════════════════════════

/// Whether the loader has unfinished requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BusyState {
    Idle = 0,
    Busy = 1,
}

impl From<u8> for BusyState {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Busy,
            _ => Self::Idle,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// REQUESTS
// ═══════════════════════════════════════════════════════════════════════════

enum JobKind {
    /// Decode a new source
    Load(Arc<dyn IrSource>),
    /// Rebuild the engine from the last decoded IR
    Reload,
}

struct Job {
    generation: u64,
    kind: JobKind,
}

/// State shared between control handles and the worker
struct LoaderShared {
    state: AtomicU8,
    requested: AtomicU64,
    completed: AtomicU64,
    running: AtomicBool,
    /// Set once any source decoded successfully
    has_ir: AtomicBool,
    config: Mutex<LoaderConfig>,
}

impl LoaderShared {
    fn set_state(&self, state: BusyState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Mark `generation` handled; goes idle only if nothing newer was requested
    fn finish(&self, generation: u64) {
        self.completed.fetch_max(generation, Ordering::SeqCst);
        if self.requested.load(Ordering::SeqCst) <= generation {
            self.set_state(BusyState::Idle);
            // A request may have slipped in between the check and the store
            if self.requested.load(Ordering::SeqCst) > generation {
                self.set_state(BusyState::Busy);
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CONTROL HANDLE
// ═══════════════════════════════════════════════════════════════════════════

/// Cloneable handle for issuing requests from any non-audio thread
#[derive(Clone)]
pub struct LoaderControl {
    tx: Sender<Job>,
    shared: Arc<LoaderShared>,
}

impl LoaderControl {
    fn submit(&self, kind: JobKind) -> u64 {
        let generation = self.shared.requested.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.set_state(BusyState::Busy);
        if self.tx.send(Job { generation, kind }).is_err() {
            log::error!("Loader thread is gone, request {} dropped", generation);
            self.shared.finish(generation);
        }
        generation
    }

    /// Queue a load from any source. Returns the request's generation.
    pub fn load(&self, source: Arc<dyn IrSource>) -> u64 {
        log::info!("Requesting IR load from {}", source.describe());
        self.submit(JobKind::Load(source))
    }

    /// Queue a load of a WAV file
    pub fn load_file(&self, path: impl Into<PathBuf>) -> u64 {
        self.load(Arc::new(WavFileSource::new(path)))
    }

    /// Rebuild the engine from the last decoded IR with the current
    /// configuration and host setup. Does nothing if no IR was ever decoded.
    pub fn reload(&self) -> u64 {
        self.submit(JobKind::Reload)
    }

    /// Validate and store a new configuration, then rebuild.
    /// An invalid configuration is rejected here and nothing changes.
    pub fn set_config(&self, config: LoaderConfig) -> ConvResult<u64> {
        config.validate()?;
        *self.shared.config.lock() = config;
        Ok(self.reload())
    }

    pub fn config(&self) -> LoaderConfig {
        self.shared.config.lock().clone()
    }

    pub fn busy_state(&self) -> BusyState {
        BusyState::from(self.shared.state.load(Ordering::SeqCst))
    }

    pub fn is_busy(&self) -> bool {
        self.busy_state() == BusyState::Busy
    }

    /// True once a source has decoded successfully
    pub fn has_ir(&self) -> bool {
        self.shared.has_ir.load(Ordering::SeqCst)
    }

    /// Generation of the newest request
    pub fn latest_generation(&self) -> u64 {
        self.shared.requested.load(Ordering::SeqCst)
    }

    /// Newest generation the worker has finished with (published, failed or dropped)
    pub fn completed_generation(&self) -> u64 {
        self.shared.completed.load(Ordering::SeqCst)
    }

    /// Poll until every request so far is handled. Returns false on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.completed_generation() >= self.latest_generation() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(WAIT_STEP);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// LOADER
// ═══════════════════════════════════════════════════════════════════════════

/// Owns the loader thread; dropping it stops and joins the thread
pub struct IrLoader {
    control: LoaderControl,
    worker: Option<JoinHandle<()>>,
}

impl IrLoader {
    /// Start the loader thread publishing into `publisher`
    pub fn spawn(
        publisher: EnginePublisher<Convolver>,
        config: LoaderConfig,
        listener: Arc<dyn UpdateListener>,
        factory: Arc<dyn FourierTransformFactory>,
        num_channels: usize,
    ) -> ConvResult<Self> {
        config.validate()?;

        let shared = Arc::new(LoaderShared {
            state: AtomicU8::new(BusyState::Idle as u8),
            requested: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            running: AtomicBool::new(true),
            has_ir: AtomicBool::new(false),
            config: Mutex::new(config),
        });
        let (tx, rx) = unbounded();

        let mut worker = Worker {
            publisher,
            listener,
            factory,
            shared: Arc::clone(&shared),
            num_channels,
            source: None,
            raw: None,
        };
        let handle = thread::Builder::new()
            .name("cv-loader".into())
            .spawn(move || worker.run(rx))?;

        log::info!("IR loader started ({} channels)", num_channels);
        Ok(Self {
            control: LoaderControl { tx, shared },
            worker: Some(handle),
        })
    }

    /// Handle for issuing requests from other threads
    pub fn control(&self) -> LoaderControl {
        self.control.clone()
    }

    pub fn load(&self, source: Arc<dyn IrSource>) -> u64 {
        self.control.load(source)
    }

    pub fn load_file(&self, path: impl Into<PathBuf>) -> u64 {
        self.control.load_file(path)
    }

    pub fn reload(&self) -> u64 {
        self.control.reload()
    }

    pub fn set_config(&self, config: LoaderConfig) -> ConvResult<u64> {
        self.control.set_config(config)
    }

    pub fn busy_state(&self) -> BusyState {
        self.control.busy_state()
    }

    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.control.wait_idle(timeout)
    }

    /// Stop the thread after the request in progress. Pending requests are dropped.
    pub fn stop(&mut self) {
        self.control.shared.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for IrLoader {
    fn drop(&mut self) {
        self.stop();
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// WORKER
// ═══════════════════════════════════════════════════════════════════════════

struct Worker {
    publisher: EnginePublisher<Convolver>,
    listener: Arc<dyn UpdateListener>,
    factory: Arc<dyn FourierTransformFactory>,
    shared: Arc<LoaderShared>,
    num_channels: usize,
    /// Last source that decoded successfully, and its decoded IR
    source: Option<Arc<dyn IrSource>>,
    raw: Option<ImpulseResponse>,
}

impl Worker {
    fn run(&mut self, rx: Receiver<Job>) {
        while self.shared.running.load(Ordering::Relaxed) {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(job) => {
                    let job = Self::coalesce(job, &rx);
                    let generation = job.generation;
                    self.handle(job);
                    self.publisher.collect();
                    self.shared.finish(generation);
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.publisher.collect();
                }
                Err(RecvTimeoutError::Disconnected) => {
                    break;
                }
            }
        }
        log::info!("Loader thread exiting");
    }

    /// Fold queued requests into the newest one. A load anywhere in the
    /// batch wins over reloads, using the newest source.
    fn coalesce(mut job: Job, rx: &Receiver<Job>) -> Job {
        while let Ok(next) = rx.try_recv() {
            log::debug!("Request {} superseded by {}", job.generation, next.generation);
            job = match (job.kind, next.kind) {
                (JobKind::Load(source), JobKind::Reload) => Job {
                    generation: next.generation,
                    kind: JobKind::Load(source),
                },
                (_, kind) => Job {
                    generation: next.generation,
                    kind,
                },
            };
        }
        job
    }

    fn handle(&mut self, job: Job) {
        let generation = job.generation;
        let (source, is_load) = match job.kind {
            JobKind::Load(source) => (source, true),
            JobKind::Reload => match &self.source {
                Some(source) => (Arc::clone(source), false),
                None => {
                    log::debug!("Reload {} ignored, nothing loaded yet", generation);
                    return;
                }
            },
        };

        self.listener.on_event(&LoadEvent::Started {
            generation,
            source: source.describe(),
        });

        let result = if is_load {
            self.load_fresh(&source, generation)
        } else {
            self.rebuild(generation)
        };

        match result {
            Ok(Some(info)) => {
                log::info!(
                    "Loaded {} ({} ch, {} samples, {} engine, latency {})",
                    source.describe(),
                    info.channels,
                    info.length,
                    info.engine,
                    info.latency
                );
                self.listener.on_event(&LoadEvent::Succeeded { generation, info });
            }
            Ok(None) => {}
            Err(err) => {
                log::warn!("Loading {} failed: {}", source.describe(), err);
                self.listener.on_event(&LoadEvent::Failed {
                    generation,
                    reason: LoadFailure::from(&err),
                    message: err.to_string(),
                });
            }
        }
    }

    /// Decode `source` and build an engine from it. The decoded IR becomes
    /// the base for later rebuilds only after preprocessing and engine
    /// construction succeeded; a rejected IR leaves the last good one cached.
    fn load_fresh(&mut self, source: &Arc<dyn IrSource>, generation: u64) -> ConvResult<Option<IrInfo>> {
        let ir = source.load()?;
        if ir.num_channels() == 0 {
            return Err(ConvError::Malformed("IR has no channels".into()));
        }
        let info = self.build(&ir, generation)?;

        self.raw = Some(ir);
        self.source = Some(Arc::clone(source));
        self.shared.has_ir.store(true, Ordering::SeqCst);
        Ok(info)
    }

    /// Build again from the last good IR with the current config and setup
    fn rebuild(&self, generation: u64) -> ConvResult<Option<IrInfo>> {
        let Some(raw) = &self.raw else {
            return Err(ConvError::Malformed("no decoded IR".into()));
        };
        self.build(raw, generation)
    }

    /// Preprocess `raw` and publish a new engine. `Ok(None)` means the result
    /// was superseded by a newer request and was dropped.
    fn build(&self, raw: &ImpulseResponse, generation: u64) -> ConvResult<Option<IrInfo>> {
        let config = self.shared.config.lock().clone();
        let setup = self.publisher.setup();
        let ir = preprocess(
            raw,
            &config.preprocess,
            setup.map(|s| s.sample_rate),
            config.max_ir_length,
            self.factory.as_ref(),
        )?;
        let options = config.convolver_options(setup.as_ref());
        let engine = Convolver::build(&ir, &options, self.num_channels, self.factory.as_ref())?;

        if self.shared.requested.load(Ordering::SeqCst) > generation {
            log::warn!("Dropping result of request {}, a newer request is pending", generation);
            return Ok(None);
        }

        let info = IrInfo {
            channels: ir.num_channels(),
            length: ir.len(),
            sample_rate: ir.sample_rate(),
            latency: engine.latency(),
            engine: engine.kind(),
            gain: ir.gain(),
        };
        self.publisher.publish(engine)?;
        log::debug!(
            "Published engine {} (adopted so far: {}, gain {:.1} dB)",
            self.publisher.published(),
            self.publisher.adopted(),
            gain_to_db(info.gain)
        );
        Ok(Some(info))
    }
}
