//! cv-engine: IR loading and the host-facing processor
//!
//! - `source` - where impulse responses come from (WAV files, memory)
//! - `config` - loader configuration (JSON)
//! - `preprocess` - IR preparation before engine construction
//! - `listener` - load progress notifications
//! - `loader` - background loader thread with generation tracking
//! - `processor` - audio-thread processor adopting loaded engines

pub mod config;
pub mod listener;
pub mod loader;
pub mod preprocess;
pub mod processor;
pub mod source;

pub use config::{LoaderConfig, PartitionConfig, PreprocessConfig};
pub use listener::{ChannelListener, IrInfo, LoadEvent, LoadFailure, NullListener, UpdateListener};
pub use loader::{BusyState, IrLoader, LoaderControl};
pub use preprocess::preprocess;
pub use processor::ConvolutionProcessor;
pub use source::{IrSource, MemorySource, WavFileSource, read_wav};
