//! cv-core: Shared types and real-time primitives for the convolution engine
//!
//! This crate provides the foundational types used across all cv crates:
//! - `Sample` and `ProcessSetup` (host block size / sample rate)
//! - `ConvError` taxonomy
//! - Fixed-capacity `StaticQueue` and `StaticRingBuffer` (no allocation after construction)
//! - `ThreadSyncable` double buffer for handing state to the audio thread

mod error;
mod queue;
mod ring_buffer;
mod sample;
mod sync;

pub use error::*;
pub use queue::*;
pub use ring_buffer::*;
pub use sample::*;
pub use sync::*;

/// Largest impulse response accepted by any engine (10 s at 192 kHz)
pub const MAX_IR_LENGTH: usize = 1_920_000;

/// Smallest internal partition / block size
pub const MIN_PARTITION_SIZE: usize = 32;

/// Largest internal partition / block size
pub const MAX_PARTITION_SIZE: usize = 8192;

/// Convert decibels to linear gain
#[inline]
pub fn db_to_gain(db: f64) -> f64 {
    10.0_f64.powf(db / 20.0)
}

/// Convert linear gain to decibels
#[inline]
pub fn gain_to_db(gain: f64) -> f64 {
    if gain <= 0.0 {
        f64::NEG_INFINITY
    } else {
        20.0 * gain.log10()
    }
}
