//! Spin-locked grid bucket

use std::cell::UnsafeCell;
use std::hint;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::GridEntry;

/// Membership list of one grid cell
///
/// Insertion takes the spinlock. Reads go through [`Bucket::entries`], which
/// is only sound while no insertion is in flight; `SpatialGrid` guarantees
/// that by requiring `&mut self` to hand out a `GridWriter`.
pub(crate) struct Bucket {
    locked: AtomicBool,
    entries: UnsafeCell<Vec<GridEntry>>,
}

// SAFETY: `entries` is only mutated while `locked` is held, or through
// `&mut Bucket`. Unlocked reads happen only when no writer can exist.
unsafe impl Sync for Bucket {}

struct BucketGuard<'a> {
    locked: &'a AtomicBool,
}

impl Drop for BucketGuard<'_> {
    fn drop(&mut self) {
        self.locked.store(false, Ordering::Release);
    }
}

impl Bucket {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            locked: AtomicBool::new(false),
            entries: UnsafeCell::new(Vec::with_capacity(capacity)),
        }
    }

    fn lock(&self) -> BucketGuard<'_> {
        while self.locked.swap(true, Ordering::Acquire) {
            while self.locked.load(Ordering::Relaxed) {
                hint::spin_loop();
            }
        }
        BucketGuard {
            locked: &self.locked,
        }
    }

    /// Appends `entry` unless an entry with the same hash is already present.
    /// Returns true when the entry was added.
    pub(crate) fn push(&self, entry: GridEntry) -> bool {
        let _guard = self.lock();
        // SAFETY: the spinlock gives this thread exclusive access.
        let entries = unsafe { &mut *self.entries.get() };
        if entries.iter().any(|e| e.hash == entry.hash) {
            return false;
        }
        entries.push(entry);
        true
    }

    /// Current entries.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that no `push` runs concurrently.
    pub(crate) unsafe fn entries(&self) -> &[GridEntry] {
        &*self.entries.get()
    }

    /// Empties the bucket, keeping its allocation
    pub(crate) fn clear(&mut self) {
        self.entries.get_mut().clear();
    }

    pub(crate) fn len_mut(&mut self) -> usize {
        self.entries.get_mut().len()
    }
}
