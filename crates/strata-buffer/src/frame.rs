//! Buffer frame bookkeeping.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use parking_lot::lock_api::RawRwLock as _;
use parking_lot::RawRwLock;
use strata_common::PageId;

use crate::queues::QueueKind;

const QUEUE_FIFO: u8 = 0;
const QUEUE_LRU: u8 = 1;

/// A resident copy of one page.
///
/// The frame's bytes live in the manager's contiguous pool; `data` points at
/// the start of the frame's slot. Byte access is governed by the frame
/// latch, while `pin_count`, `dirty`, and `queue` are mutated only under the
/// manager mutex.
pub(crate) struct BufferFrame {
    /// Identity of the page this frame holds.
    page_id: PageId,
    /// Index of the frame's slot in the page pool.
    slot: usize,
    /// Start of the frame's bytes inside the pool.
    data: *mut u8,
    /// Reader/writer latch over the frame's bytes.
    latch: RawRwLock,
    /// Number of fixes not yet matched by unfixes.
    pin_count: AtomicU32,
    /// Whether the in-memory bytes are newer than the on-disk bytes.
    dirty: AtomicBool,
    /// Which 2Q queue currently contains this frame.
    queue: AtomicU8,
}

// SAFETY: the raw data pointer targets a slot of the manager-owned pool.
// All byte access goes through the latch and all metadata through atomics,
// so sharing frames across threads is sound.
unsafe impl Send for BufferFrame {}
unsafe impl Sync for BufferFrame {}

impl BufferFrame {
    pub fn new(page_id: PageId, slot: usize, data: *mut u8) -> Self {
        Self {
            page_id,
            slot,
            data,
            latch: RawRwLock::INIT,
            pin_count: AtomicU32::new(0),
            dirty: AtomicBool::new(false),
            queue: AtomicU8::new(QUEUE_FIFO),
        }
    }

    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    #[inline]
    pub fn slot(&self) -> usize {
        self.slot
    }

    #[inline]
    pub fn data_ptr(&self) -> *mut u8 {
        self.data
    }

    #[inline]
    pub fn pin(&self) {
        self.pin_count.fetch_add(1, Ordering::AcqRel);
    }

    #[inline]
    pub fn unpin(&self) {
        let previous = self.pin_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "unpin of frame with zero pin count");
    }

    #[inline]
    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_dirty(&self, dirty: bool) {
        self.dirty.store(dirty, Ordering::Release);
    }

    #[inline]
    pub fn queue(&self) -> QueueKind {
        match self.queue.load(Ordering::Acquire) {
            QUEUE_FIFO => QueueKind::Fifo,
            _ => QueueKind::Lru,
        }
    }

    #[inline]
    pub fn set_queue(&self, queue: QueueKind) {
        let tag = match queue {
            QueueKind::Fifo => QUEUE_FIFO,
            QueueKind::Lru => QUEUE_LRU,
        };
        self.queue.store(tag, Ordering::Release);
    }

    /// Acquires the latch in the requested mode, blocking until granted.
    pub fn lock(&self, exclusive: bool) {
        if exclusive {
            self.latch.lock_exclusive();
        } else {
            self.latch.lock_shared();
        }
    }

    /// Releases the latch.
    ///
    /// # Safety
    /// The caller must hold the latch in exactly the given mode, acquired on
    /// this thread.
    pub unsafe fn unlock(&self, exclusive: bool) {
        if exclusive {
            self.latch.unlock_exclusive();
        } else {
            self.latch.unlock_shared();
        }
    }
}

impl std::fmt::Debug for BufferFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferFrame")
            .field("page_id", &self.page_id)
            .field("slot", &self.slot)
            .field("pin_count", &self.pin_count())
            .field("dirty", &self.is_dirty())
            .field("queue", &self.queue())
            .finish()
    }
}
