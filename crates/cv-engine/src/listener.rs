//! Load progress notifications
//!
//! The loader reports every request it handles through an `UpdateListener`.
//! Events are delivered on the loader thread; listeners must not block for
//! long. `ChannelListener` forwards them into a channel for polling consumers
//! such as a UI timer.

use crossbeam_channel::{Receiver, Sender, unbounded};

use cv_core::ConvError;
use cv_dsp::EngineKind;

/// Why a load did not produce a new engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadFailure {
    /// Source could not be read (missing file, I/O error)
    Unreadable,
    /// Source was read but is not a usable IR
    Malformed,
    /// More IR channels than supported
    UnsupportedChannels,
    /// IR exceeds the length limit
    TooLong,
    /// Engine construction or filter fitting failed
    DesignFailed,
}

impl From<&ConvError> for LoadFailure {
    fn from(err: &ConvError) -> Self {
        match err {
            ConvError::Io(_) => Self::Unreadable,
            ConvError::Decode(_) | ConvError::Malformed(_) | ConvError::InvalidSampleRate(_) => Self::Malformed,
            ConvError::UnsupportedChannels(_) => Self::UnsupportedChannels,
            ConvError::ImpulseTooLong { .. } => Self::TooLong,
            ConvError::InvalidBlockSize(_)
            | ConvError::InvalidFftSize(_)
            | ConvError::Fft(_)
            | ConvError::FilterDesign(_)
            | ConvError::Config(_) => Self::DesignFailed,
        }
    }
}

/// Description of a successfully published IR
#[derive(Debug, Clone, PartialEq)]
pub struct IrInfo {
    pub channels: usize,
    /// Length after preprocessing, in samples
    pub length: usize,
    pub sample_rate: f64,
    /// Latency of the published engine, in samples
    pub latency: usize,
    pub engine: EngineKind,
    /// Normalization gain applied (1.0 when not normalized)
    pub gain: f64,
}

/// One loader notification; `generation` identifies the request
#[derive(Debug, Clone, PartialEq)]
pub enum LoadEvent {
    Started {
        generation: u64,
        source: String,
    },
    Succeeded {
        generation: u64,
        info: IrInfo,
    },
    Failed {
        generation: u64,
        reason: LoadFailure,
        message: String,
    },
}

impl LoadEvent {
    pub fn generation(&self) -> u64 {
        match self {
            Self::Started { generation, .. } | Self::Succeeded { generation, .. } | Self::Failed { generation, .. } => {
                *generation
            }
        }
    }

    /// True for `Succeeded` and `Failed`
    pub fn is_final(&self) -> bool {
        !matches!(self, Self::Started { .. })
    }
}

/// Receives loader notifications
pub trait UpdateListener: Send + Sync {
    fn on_event(&self, event: &LoadEvent);
}

/// Listener that ignores everything
pub struct NullListener;

impl UpdateListener for NullListener {
    fn on_event(&self, _event: &LoadEvent) {}
}

/// Forwards events into a channel
pub struct ChannelListener {
    tx: Sender<LoadEvent>,
}

impl ChannelListener {
    /// Listener plus the receiving end to poll
    pub fn new() -> (Self, Receiver<LoadEvent>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }
}

impl UpdateListener for ChannelListener {
    fn on_event(&self, event: &LoadEvent) {
        // A dropped receiver only means nobody is polling any more
        let _ = self.tx.send(event.clone());
    }
}
