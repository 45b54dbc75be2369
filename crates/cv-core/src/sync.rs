//! Lock-free double buffer for handing state to the audio thread
//!
//! `ThreadSyncable<T>` owns two slots. One is active (read by the audio
//! thread), the other holds either a pending value waiting to be adopted or a
//! retired value waiting to be dropped. A single atomic byte selects the active
//! slot and flags a pending swap:
//!
//! - The writer clears the pending flag, fills the inactive slot, then sets the
//!   flag again. While the flag is clear the reader cannot swap, so the inactive
//!   slot is exclusively the writer's.
//! - The reader swaps with one compare-exchange. If the writer got there first
//!   the swap is skipped and the previous active value keeps playing.
//!
//! Values are constructed, replaced and dropped on the writer side only; the
//! audio thread never allocates or frees through this type.

use std::cell::{Cell, UnsafeCell};
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use parking_lot::Mutex;

/// Bit 0: index of the active slot
const ACTIVE: u8 = 0b01;
/// Bit 1: the inactive slot holds a value waiting to be adopted
const PENDING: u8 = 0b10;

/// Shared two-slot arena
pub struct ThreadSyncable<T> {
    slots: [UnsafeCell<Option<T>>; 2],
    state: AtomicU8,
    /// Serializes writers; never touched by the reader
    write_lock: Mutex<()>,
    published: AtomicU64,
    adopted: AtomicU64,
}

// Safe because slot access is partitioned through the atomic state
unsafe impl<T: Send> Send for ThreadSyncable<T> {}
unsafe impl<T: Send> Sync for ThreadSyncable<T> {}

impl<T: Send> ThreadSyncable<T> {
    /// Create the arena and split it into its writer and reader halves
    pub fn new(initial: Option<T>) -> (SyncWriter<T>, SyncReader<T>) {
        let shared = Arc::new(Self {
            slots: [UnsafeCell::new(initial), UnsafeCell::new(None)],
            state: AtomicU8::new(0),
            write_lock: Mutex::new(()),
            published: AtomicU64::new(0),
            adopted: AtomicU64::new(0),
        });

        (
            SyncWriter {
                shared: Arc::clone(&shared),
            },
            SyncReader {
                shared,
                active: 0,
                _not_sync: PhantomData,
            },
        )
    }

    /// Number of `publish` calls so far
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Number of swaps the reader has performed
    pub fn adopted(&self) -> u64 {
        self.adopted.load(Ordering::Relaxed)
    }
}

// ============ Writer ============

/// Producer half, usable from any non-audio thread
pub struct SyncWriter<T> {
    shared: Arc<ThreadSyncable<T>>,
}

impl<T> Clone for SyncWriter<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send> SyncWriter<T> {
    /// Store `value` as the pending state, replacing any pending value not yet adopted
    pub fn publish(&self, value: T) {
        let _guard = self.shared.write_lock.lock();

        // Reclaim the inactive slot; the reader cannot swap while PENDING is clear
        let prev = self.shared.state.fetch_and(!PENDING, Ordering::AcqRel);
        let active = prev & ACTIVE;
        let target = (active ^ ACTIVE) as usize;

        // SAFETY: the inactive slot is only accessed by the writer holding the lock
        // while PENDING is clear. Whatever it held is dropped here.
        unsafe {
            *self.shared.slots[target].get() = Some(value);
        }

        self.shared.state.store(active | PENDING, Ordering::Release);
        self.shared.published.fetch_add(1, Ordering::Relaxed);
    }

    /// Drop the retired value left behind by the last swap, if any.
    /// Returns true when something was freed.
    pub fn collect(&self) -> bool {
        let _guard = self.shared.write_lock.lock();

        let state = self.shared.state.load(Ordering::Acquire);
        if state & PENDING != 0 {
            return false;
        }
        let inactive = ((state & ACTIVE) ^ ACTIVE) as usize;

        // SAFETY: no pending flag means the reader will not swap, and the lock
        // keeps other writers out.
        let retired = unsafe { (*self.shared.slots[inactive].get()).take() };
        retired.is_some()
    }

    /// True while a published value has not been adopted yet
    pub fn has_pending(&self) -> bool {
        self.shared.state.load(Ordering::Acquire) & PENDING != 0
    }

    pub fn published(&self) -> u64 {
        self.shared.published()
    }

    pub fn adopted(&self) -> u64 {
        self.shared.adopted()
    }
}

// ============ Reader ============

/// Consumer half, owned by the audio thread
pub struct SyncReader<T> {
    shared: Arc<ThreadSyncable<T>>,
    /// Cached active slot index (only the reader changes it)
    active: usize,
    /// Shared references must stay on the owning thread
    _not_sync: PhantomData<Cell<()>>,
}

impl<T: Send> SyncReader<T> {
    /// Adopt the pending value if there is one. Never blocks.
    ///
    /// Returns true when a swap happened. A swap that races with a writer is
    /// skipped and retried on the next call.
    #[inline]
    pub fn update(&mut self) -> bool {
        let state = self.shared.state.load(Ordering::Acquire);
        if state & PENDING == 0 {
            return false;
        }

        let next = (state & ACTIVE) ^ ACTIVE;
        if self
            .shared
            .state
            .compare_exchange(state, next, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        self.active = next as usize;
        self.shared.adopted.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Active value
    #[inline]
    pub fn get(&self) -> Option<&T> {
        // SAFETY: the writer never touches the active slot
        unsafe { (*self.shared.slots[self.active].get()).as_ref() }
    }

    /// Active value, mutably (working buffers live inside it)
    #[inline]
    pub fn get_mut(&mut self) -> Option<&mut T> {
        // SAFETY: as above; `&mut self` excludes other reader borrows
        unsafe { (*self.shared.slots[self.active].get()).as_mut() }
    }

    #[inline]
    pub fn has_pending(&self) -> bool {
        self.shared.state.load(Ordering::Acquire) & PENDING != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_publish_then_update() {
        let (writer, mut reader) = ThreadSyncable::new(Some(1));
        assert_eq!(reader.get(), Some(&1));
        assert!(!reader.update());

        writer.publish(2);
        assert!(writer.has_pending());
        // Not visible before the reader swaps
        assert_eq!(reader.get(), Some(&1));

        assert!(reader.update());
        assert_eq!(reader.get(), Some(&2));
        assert!(!writer.has_pending());
        assert_eq!(writer.adopted(), 1);
    }

    #[test]
    fn test_latest_publish_wins() {
        let (writer, mut reader) = ThreadSyncable::<String>::new(None);
        assert!(reader.get().is_none());

        writer.publish("a".to_string());
        writer.publish("b".to_string());
        writer.publish("c".to_string());

        assert!(reader.update());
        assert_eq!(reader.get().map(String::as_str), Some("c"));
        // Only one swap per pending value
        assert!(!reader.update());
        assert_eq!(writer.published(), 3);
    }

    #[test]
    fn test_collect_drops_retired_value() {
        let (writer, mut reader) = ThreadSyncable::new(Some(vec![0u8; 16]));
        writer.publish(vec![1u8; 16]);

        // Pending value must not be collected
        assert!(!writer.collect());

        reader.update();
        assert!(writer.collect());
        assert!(!writer.collect());
        assert_eq!(reader.get().map(|v| v[0]), Some(1));
    }

    #[test]
    fn test_get_mut_changes_active_only() {
        let (writer, mut reader) = ThreadSyncable::new(Some(10));
        if let Some(v) = reader.get_mut() {
            *v += 1;
        }
        writer.publish(20);
        assert_eq!(reader.get(), Some(&11));
        reader.update();
        assert_eq!(reader.get(), Some(&20));
    }

    #[test]
    fn test_concurrent_publish_never_tears() {
        const LEN: usize = 64;
        let (writer, mut reader) = ThreadSyncable::new(Some(vec![0u64; LEN]));

        let producer = thread::spawn(move || {
            for generation in 1..=2000u64 {
                writer.publish(vec![generation; LEN]);
                if generation % 7 == 0 {
                    writer.collect();
                }
            }
        });

        let mut last_seen = 0;
        for _ in 0..20_000 {
            reader.update();
            let value = reader.get().expect("initial value present");
            let first = value[0];
            assert!(value.iter().all(|&v| v == first), "torn value");
            assert!(first >= last_seen, "generation went backwards");
            last_seen = first;
        }

        producer.join().unwrap();
        reader.update();
        assert_eq!(reader.get().map(|v| v[0]), Some(2000));
    }
}
