//! The buffer manager: a resident cache of fixed-size pages.

use std::cell::UnsafeCell;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use log::{debug, trace};
use parking_lot::Mutex;
use strata_common::{PageId, Result, StorageConfig, StrataError};

use crate::frame::BufferFrame;
use crate::queues::{QueueKind, TwoQueues};
use crate::segment::SegmentManager;

/// Byte pool backing all frames.
///
/// One contiguous allocation of `page_size * page_count` bytes, handed out
/// in page-sized slots. Access goes through raw pointers: a slot's bytes are
/// governed by the latch of the frame that owns the slot, so no two mutable
/// views of the same slot can exist.
struct PagePool {
    bytes: Box<[UnsafeCell<u8>]>,
    page_size: usize,
}

// SAFETY: slot bytes are only touched through frame latches (guards) or
// under the manager mutex for unpinned frames, never both at once.
unsafe impl Send for PagePool {}
unsafe impl Sync for PagePool {}

impl PagePool {
    fn new(page_size: usize, page_count: usize) -> Self {
        let bytes = (0..page_size * page_count)
            .map(|_| UnsafeCell::new(0u8))
            .collect();
        Self { bytes, page_size }
    }

    fn slot_ptr(&self, slot: usize) -> *mut u8 {
        self.bytes[slot * self.page_size].get()
    }
}

/// State covered by the manager mutex: the frame table, both 2Q queues, and
/// slot accounting. Pin counts change only while this is locked.
struct ManagerInner {
    frames: HashMap<PageId, Arc<BufferFrame>>,
    queues: TwoQueues,
    free_slots: Vec<usize>,
    next_slot: usize,
}

/// Counters describing the current buffer contents.
#[derive(Debug, Clone)]
pub struct BufferStats {
    /// Number of frames the buffer can hold.
    pub capacity: usize,
    /// Number of resident frames.
    pub resident: usize,
    /// Number of resident frames with at least one outstanding fix.
    pub pinned: usize,
    /// Number of resident frames whose bytes are newer than disk.
    pub dirty: usize,
}

/// Resident cache of fixed-size pages with 2Q replacement.
///
/// Pages are fixed (loading them on demand) and unfixed; an exclusive fix
/// grants write access to the page bytes, a shared fix read access. When the
/// buffer is at capacity, unpinned pages are evicted FIFO-queue first, with
/// dirty victims written back to their segment file.
pub struct BufferManager {
    page_size: usize,
    page_count: usize,
    pool: PagePool,
    segments: SegmentManager,
    inner: Mutex<ManagerInner>,
}

impl BufferManager {
    /// Creates a buffer manager with the default storage configuration and
    /// the given geometry.
    pub fn new(page_size: usize, page_count: usize) -> Result<Self> {
        Self::with_config(StorageConfig {
            page_size,
            page_count,
            ..StorageConfig::default()
        })
    }

    /// Creates a buffer manager from a full storage configuration.
    pub fn with_config(config: StorageConfig) -> Result<Self> {
        assert!(config.page_size > 0, "page size must be positive");
        assert!(config.page_count > 0, "page count must be positive");

        let segments =
            SegmentManager::new(&config.data_dir, config.page_size, config.fsync_enabled)?;

        Ok(Self {
            page_size: config.page_size,
            page_count: config.page_count,
            pool: PagePool::new(config.page_size, config.page_count),
            segments,
            inner: Mutex::new(ManagerInner {
                frames: HashMap::with_capacity(config.page_count),
                queues: TwoQueues::new(),
                free_slots: Vec::new(),
                next_slot: 0,
            }),
        })
    }

    /// Returns the size in bytes of every page.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Returns the maximum number of resident pages.
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Fixes a page, returning a guard over its bytes.
    ///
    /// A resident page is promoted within the 2Q queues (a second touch
    /// moves it from FIFO to LRU, later touches to the LRU tail). A missing
    /// page is read from its segment file, evicting an unpinned victim when
    /// the buffer is at capacity. Fails with [`StrataError::BufferFull`]
    /// when every resident page is pinned.
    ///
    /// With `exclusive` the guard grants read/write access and excludes all
    /// other fixes of the page; otherwise it grants shared read access.
    pub fn fix_page(&self, page_id: PageId, exclusive: bool) -> Result<PageGuard<'_>> {
        let frame = {
            let mut inner = self.inner.lock();
            match inner.frames.get(&page_id).cloned() {
                Some(frame) => {
                    let queue = inner.queues.touch(page_id, frame.queue());
                    frame.set_queue(queue);
                    frame.pin();
                    frame
                }
                None => self.load_page(&mut inner, page_id)?,
            }
        };

        // The pin taken under the manager mutex keeps the frame resident
        // while we wait for the latch, and the mutex is already released so
        // the current latch holder can unfix.
        frame.lock(exclusive);

        Ok(PageGuard {
            manager: self,
            frame,
            exclusive,
            dirty: false,
            _not_send: PhantomData,
        })
    }

    /// Unfixes a page guard returned by an earlier [`fix_page`] call.
    ///
    /// When `is_dirty` is true the page is written back to disk eventually
    /// (at eviction, on [`flush`], or at drop of the manager). Consuming the
    /// guard releases the latch and the pin.
    ///
    /// [`fix_page`]: BufferManager::fix_page
    /// [`flush`]: BufferManager::flush
    pub fn unfix_page(&self, mut guard: PageGuard<'_>, is_dirty: bool) {
        guard.dirty |= is_dirty;
    }

    /// Returns the page ids of all pages in the FIFO queue, in FIFO order.
    /// Intended for tests and diagnostics.
    pub fn get_fifo_list(&self) -> Vec<PageId> {
        self.inner.lock().queues.fifo_list()
    }

    /// Returns the page ids of all pages in the LRU queue, in LRU order.
    /// Intended for tests and diagnostics.
    pub fn get_lru_list(&self) -> Vec<PageId> {
        self.inner.lock().queues.lru_list()
    }

    /// Returns counters describing the current buffer contents.
    pub fn stats(&self) -> BufferStats {
        let inner = self.inner.lock();
        let mut pinned = 0;
        let mut dirty = 0;
        for frame in inner.frames.values() {
            if frame.pin_count() > 0 {
                pinned += 1;
            }
            if frame.is_dirty() {
                dirty += 1;
            }
        }
        BufferStats {
            capacity: self.page_count,
            resident: inner.frames.len(),
            pinned,
            dirty,
        }
    }

    /// Writes every dirty resident page back to its segment file and marks
    /// it clean. Pages exclusively fixed by another thread are waited for.
    pub fn flush(&self) -> Result<()> {
        let dirty_ids: Vec<PageId> = {
            let inner = self.inner.lock();
            inner
                .frames
                .iter()
                .filter(|(_, frame)| frame.is_dirty())
                .map(|(page_id, _)| *page_id)
                .collect()
        };

        for page_id in dirty_ids {
            let guard = self.fix_page(page_id, false)?;
            // The page may have been evicted and reloaded clean in between.
            if guard.frame.is_dirty() {
                self.segments.write_page(page_id, guard.data())?;
                guard.frame.set_dirty(false);
            }
            self.unfix_page(guard, false);
        }
        Ok(())
    }

    /// Loads a missing page into a frame. Called with the manager mutex held.
    fn load_page(&self, inner: &mut ManagerInner, page_id: PageId) -> Result<Arc<BufferFrame>> {
        let (slot, queue) = if inner.frames.len() < self.page_count {
            let slot = match inner.free_slots.pop() {
                Some(slot) => slot,
                None => {
                    let slot = inner.next_slot;
                    inner.next_slot += 1;
                    slot
                }
            };
            (slot, QueueKind::Fifo)
        } else {
            // At capacity: the new page inherits the queue its victim
            // occupied.
            self.evict_victim(inner)?
        };

        let frame = Arc::new(BufferFrame::new(page_id, slot, self.pool.slot_ptr(slot)));

        // Read before the frame becomes visible in the table so that a
        // failed read leaves nothing installed.
        // SAFETY: the slot was just taken from the free list or a removed
        // victim; no other frame references it and the manager mutex is
        // held, so the bytes cannot be observed concurrently.
        let data = unsafe { std::slice::from_raw_parts_mut(frame.data_ptr(), self.page_size) };
        if let Err(error) = self.segments.read_page(page_id, data) {
            inner.free_slots.push(slot);
            return Err(error);
        }
        trace!("loaded page {page_id} into slot {slot}");

        frame.set_queue(queue);
        frame.pin();
        inner.queues.insert(page_id, queue);
        inner.frames.insert(page_id, Arc::clone(&frame));
        Ok(frame)
    }

    /// Selects and removes an eviction victim, writing it back first when
    /// dirty. Returns the freed slot and the queue the victim occupied.
    /// Called with the manager mutex held.
    fn evict_victim(&self, inner: &mut ManagerInner) -> Result<(usize, QueueKind)> {
        let (victim_id, queue) = {
            let ManagerInner { frames, queues, .. } = &*inner;
            queues
                .find_victim(|id| frames.get(&id).is_some_and(|frame| frame.pin_count() == 0))
                .ok_or(StrataError::BufferFull)?
        };

        let victim = inner
            .frames
            .get(&victim_id)
            .cloned()
            .expect("victim frame is resident");

        if victim.is_dirty() {
            // SAFETY: the victim's pin count is zero and pins are only taken
            // under the manager mutex, which we hold; no latch holder exists
            // and none can appear while we read the slot bytes.
            let data = unsafe { std::slice::from_raw_parts(victim.data_ptr(), self.page_size) };
            self.segments.write_page(victim_id, data)?;
            victim.set_dirty(false);
            debug!("wrote back dirty page {victim_id} before eviction");
        }

        inner.frames.remove(&victim_id);
        inner.queues.remove(victim_id, queue);
        trace!("evicted page {victim_id}");
        Ok((victim.slot(), queue))
    }
}

impl Drop for BufferManager {
    /// Writes all dirty pages back to disk. Guards borrow the manager, so no
    /// fix can be outstanding once drop runs.
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        for (page_id, frame) in &inner.frames {
            if frame.is_dirty() {
                // SAFETY: `&mut self` proves no guard exists, so no latch is
                // held and the slot bytes are stable.
                let data = unsafe { std::slice::from_raw_parts(frame.data_ptr(), self.page_size) };
                if let Err(error) = self.segments.write_page(*page_id, data) {
                    log::error!("write-back of page {page_id} failed during shutdown: {error}");
                }
            }
        }
    }
}

/// Handle over a fixed page.
///
/// Holding the guard keeps the page latched and pinned. `data` reads the
/// page bytes; `data_mut` writes them and requires the fix to have been
/// exclusive. Dropping the guard releases the page clean unless it was
/// marked dirty; [`BufferManager::unfix_page`] releases it explicitly.
pub struct PageGuard<'a> {
    manager: &'a BufferManager,
    frame: Arc<BufferFrame>,
    exclusive: bool,
    dirty: bool,
    /// Latches must be released on the thread that acquired them.
    _not_send: PhantomData<*const ()>,
}

impl PageGuard<'_> {
    /// Returns the id of the fixed page.
    pub fn page_id(&self) -> PageId {
        self.frame.page_id()
    }

    /// Returns true if this guard holds the page exclusively.
    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    /// Returns the page bytes.
    pub fn data(&self) -> &[u8] {
        // SAFETY: the latch is held for the guard's lifetime and the pin
        // keeps the slot from being reused; writers need the exclusive
        // latch, so the bytes cannot change underneath a shared guard.
        unsafe { std::slice::from_raw_parts(self.frame.data_ptr(), self.manager.page_size) }
    }

    /// Returns the page bytes for writing.
    ///
    /// Panics when the page was fixed shared; mutating a shared page is a
    /// caller bug.
    pub fn data_mut(&mut self) -> &mut [u8] {
        assert!(self.exclusive, "data_mut requires an exclusive fix");
        // SAFETY: the exclusive latch is held for the guard's lifetime and
        // `&mut self` prevents aliasing through this guard.
        unsafe { std::slice::from_raw_parts_mut(self.frame.data_ptr(), self.manager.page_size) }
    }

    /// Marks the page dirty when the guard is released, independent of the
    /// `is_dirty` flag later passed to `unfix_page`.
    pub fn mark_dirty(&mut self) {
        debug_assert!(self.exclusive, "only an exclusive fix can dirty a page");
        self.dirty = true;
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        if self.dirty {
            self.frame.set_dirty(true);
        }
        // SAFETY: this guard holds the latch in exactly this mode.
        unsafe { self.frame.unlock(self.exclusive) };
        let _inner = self.manager.inner.lock();
        self.frame.unpin();
    }
}

impl std::fmt::Debug for PageGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageGuard")
            .field("page_id", &self.page_id())
            .field("exclusive", &self.exclusive)
            .field("dirty", &self.dirty)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const PAGE_SIZE: usize = 256;

    fn create_test_manager(page_count: usize) -> (BufferManager, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let manager = BufferManager::with_config(StorageConfig {
            data_dir: dir.path().to_path_buf(),
            page_size: PAGE_SIZE,
            page_count,
            fsync_enabled: false,
        })
        .unwrap();
        (manager, dir)
    }

    fn page(index: u64) -> PageId {
        PageId::new(0, index)
    }

    #[test]
    fn test_buffer_manager_new() {
        let (manager, _dir) = create_test_manager(10);

        assert_eq!(manager.page_size(), PAGE_SIZE);
        assert_eq!(manager.page_count(), 10);
        assert!(manager.get_fifo_list().is_empty());
        assert!(manager.get_lru_list().is_empty());
    }

    #[test]
    fn test_fix_makes_page_resident_in_fifo() {
        let (manager, _dir) = create_test_manager(10);

        let guard = manager.fix_page(page(1), false).unwrap();
        assert_eq!(guard.page_id(), page(1));
        manager.unfix_page(guard, false);

        assert_eq!(manager.get_fifo_list(), vec![page(1)]);
        assert!(manager.get_lru_list().is_empty());
    }

    #[test]
    fn test_never_written_page_reads_zeroed() {
        let (manager, _dir) = create_test_manager(10);

        let guard = manager.fix_page(page(42), false).unwrap();
        assert!(guard.data().iter().all(|b| *b == 0));
        manager.unfix_page(guard, false);
    }

    #[test]
    fn test_second_fix_promotes_to_lru() {
        let (manager, _dir) = create_test_manager(10);

        let guard = manager.fix_page(page(1), false).unwrap();
        manager.unfix_page(guard, false);
        let guard = manager.fix_page(page(1), false).unwrap();
        manager.unfix_page(guard, false);

        assert!(manager.get_fifo_list().is_empty());
        assert_eq!(manager.get_lru_list(), vec![page(1)]);
    }

    #[test]
    fn test_lru_fix_moves_to_tail() {
        let (manager, _dir) = create_test_manager(10);

        for i in 0..3 {
            // Two fixes each: all of them end up in LRU in order 0, 1, 2.
            for _ in 0..2 {
                let guard = manager.fix_page(page(i), false).unwrap();
                manager.unfix_page(guard, false);
            }
        }
        assert_eq!(manager.get_lru_list(), vec![page(0), page(1), page(2)]);

        let guard = manager.fix_page(page(0), false).unwrap();
        manager.unfix_page(guard, false);
        assert_eq!(manager.get_lru_list(), vec![page(1), page(2), page(0)]);
    }

    #[test]
    fn test_eviction_takes_fifo_head() {
        let (manager, _dir) = create_test_manager(3);

        for i in 0..3 {
            let guard = manager.fix_page(page(i), false).unwrap();
            manager.unfix_page(guard, false);
        }

        let guard = manager.fix_page(page(3), false).unwrap();
        manager.unfix_page(guard, false);

        // Page 0 was the FIFO head and got evicted; the new page joined the
        // FIFO tail.
        assert_eq!(manager.get_fifo_list(), vec![page(1), page(2), page(3)]);
    }

    #[test]
    fn test_eviction_spares_lru_while_fifo_has_victims() {
        let (manager, _dir) = create_test_manager(3);

        // Page 0 is promoted to LRU, pages 1 and 2 stay in FIFO.
        for _ in 0..2 {
            let guard = manager.fix_page(page(0), false).unwrap();
            manager.unfix_page(guard, false);
        }
        for i in 1..3 {
            let guard = manager.fix_page(page(i), false).unwrap();
            manager.unfix_page(guard, false);
        }

        let guard = manager.fix_page(page(3), false).unwrap();
        manager.unfix_page(guard, false);

        assert_eq!(manager.get_lru_list(), vec![page(0)]);
        assert_eq!(manager.get_fifo_list(), vec![page(2), page(3)]);
    }

    #[test]
    fn test_evicted_lru_victim_slot_installs_into_lru() {
        let (manager, _dir) = create_test_manager(2);

        // Both pages promoted to LRU; FIFO empty.
        for i in 0..2 {
            for _ in 0..2 {
                let guard = manager.fix_page(page(i), false).unwrap();
                manager.unfix_page(guard, false);
            }
        }
        assert!(manager.get_fifo_list().is_empty());

        // The victim comes from LRU, so the new page installs into LRU.
        let guard = manager.fix_page(page(2), false).unwrap();
        manager.unfix_page(guard, false);

        assert!(manager.get_fifo_list().is_empty());
        assert_eq!(manager.get_lru_list(), vec![page(1), page(2)]);
    }

    #[test]
    fn test_dirty_page_survives_eviction() {
        let (manager, _dir) = create_test_manager(2);

        let mut guard = manager.fix_page(page(0), true).unwrap();
        guard.data_mut().fill(0x5A);
        manager.unfix_page(guard, true);

        // Force page 0 out of the buffer.
        for i in 1..3 {
            let guard = manager.fix_page(page(i), false).unwrap();
            manager.unfix_page(guard, false);
        }

        let guard = manager.fix_page(page(0), false).unwrap();
        assert!(guard.data().iter().all(|b| *b == 0x5A));
        manager.unfix_page(guard, false);
    }

    #[test]
    fn test_clean_page_is_not_written_back() {
        let (manager, dir) = create_test_manager(1);

        let guard = manager.fix_page(page(0), false).unwrap();
        manager.unfix_page(guard, false);
        let guard = manager.fix_page(page(1), false).unwrap();
        manager.unfix_page(guard, false);

        // Nothing was dirtied, so no segment file ever grew.
        let len = std::fs::metadata(dir.path().join("0")).unwrap().len();
        assert_eq!(len, 0);
    }

    #[test]
    fn test_pinned_pages_are_not_evicted() {
        let (manager, _dir) = create_test_manager(2);

        let held = manager.fix_page(page(0), false).unwrap();
        let guard = manager.fix_page(page(1), false).unwrap();
        manager.unfix_page(guard, false);

        // Page 1 is the only unpinned page and must be the victim.
        let guard = manager.fix_page(page(2), false).unwrap();
        manager.unfix_page(guard, false);

        let fifo = manager.get_fifo_list();
        assert!(fifo.contains(&page(0)));
        assert!(!fifo.contains(&page(1)));

        manager.unfix_page(held, false);
    }

    #[test]
    fn test_buffer_full_when_all_pinned() {
        let (manager, _dir) = create_test_manager(2);

        let g0 = manager.fix_page(page(0), false).unwrap();
        let g1 = manager.fix_page(page(1), false).unwrap();

        let result = manager.fix_page(page(2), false);
        assert!(matches!(result, Err(StrataError::BufferFull)));

        // The failed fix left the frame table untouched.
        assert_eq!(manager.stats().resident, 2);

        manager.unfix_page(g0, false);
        manager.unfix_page(g1, false);

        // With the pins gone the fix succeeds.
        let guard = manager.fix_page(page(2), false).unwrap();
        manager.unfix_page(guard, false);
    }

    #[test]
    fn test_refix_after_buffer_full_recovery() {
        let (manager, _dir) = create_test_manager(1);

        let mut guard = manager.fix_page(page(0), true).unwrap();
        guard.data_mut()[0] = 9;
        assert!(matches!(
            manager.fix_page(page(1), false),
            Err(StrataError::BufferFull)
        ));
        manager.unfix_page(guard, true);

        let guard = manager.fix_page(page(1), false).unwrap();
        manager.unfix_page(guard, false);
        let guard = manager.fix_page(page(0), false).unwrap();
        assert_eq!(guard.data()[0], 9);
        manager.unfix_page(guard, false);
    }

    #[test]
    #[should_panic(expected = "data_mut requires an exclusive fix")]
    fn test_data_mut_on_shared_fix_panics() {
        let (manager, _dir) = create_test_manager(2);

        let mut guard = manager.fix_page(page(0), false).unwrap();
        let _ = guard.data_mut();
    }

    #[test]
    fn test_guard_drop_releases_clean() {
        let (manager, _dir) = create_test_manager(2);

        {
            let _guard = manager.fix_page(page(0), true).unwrap();
            // Dropped without unfix_page: released clean.
        }

        let stats = manager.stats();
        assert_eq!(stats.pinned, 0);
        assert_eq!(stats.dirty, 0);

        // The latch is free again.
        let guard = manager.fix_page(page(0), true).unwrap();
        manager.unfix_page(guard, false);
    }

    #[test]
    fn test_shutdown_writes_back_dirty_pages() {
        let dir = tempdir().unwrap();
        let config = StorageConfig {
            data_dir: dir.path().to_path_buf(),
            page_size: PAGE_SIZE,
            page_count: 4,
            fsync_enabled: false,
        };

        {
            let manager = BufferManager::with_config(config.clone()).unwrap();
            let mut guard = manager.fix_page(page(2), true).unwrap();
            guard.data_mut().fill(0xC3);
            manager.unfix_page(guard, true);
        }

        let manager = BufferManager::with_config(config).unwrap();
        let guard = manager.fix_page(page(2), false).unwrap();
        assert!(guard.data().iter().all(|b| *b == 0xC3));
        manager.unfix_page(guard, false);
    }

    #[test]
    fn test_flush_clears_dirty_flags() {
        let (manager, _dir) = create_test_manager(4);

        for i in 0..3 {
            let mut guard = manager.fix_page(page(i), true).unwrap();
            guard.data_mut().fill(i as u8 + 1);
            manager.unfix_page(guard, true);
        }
        assert_eq!(manager.stats().dirty, 3);

        manager.flush().unwrap();
        assert_eq!(manager.stats().dirty, 0);
    }

    #[test]
    fn test_stats() {
        let (manager, _dir) = create_test_manager(8);

        let held = manager.fix_page(page(0), true).unwrap();
        let mut dirtied = manager.fix_page(page(1), true).unwrap();
        dirtied.data_mut()[0] = 1;
        manager.unfix_page(dirtied, true);
        let guard = manager.fix_page(page(2), false).unwrap();
        manager.unfix_page(guard, false);

        let stats = manager.stats();
        assert_eq!(stats.capacity, 8);
        assert_eq!(stats.resident, 3);
        assert_eq!(stats.pinned, 1);
        assert_eq!(stats.dirty, 1);

        manager.unfix_page(held, false);
    }

    #[test]
    fn test_pages_in_different_segments() {
        let (manager, dir) = create_test_manager(4);

        let mut guard = manager.fix_page(PageId::new(1, 0), true).unwrap();
        guard.data_mut().fill(0x11);
        manager.unfix_page(guard, true);

        let mut guard = manager.fix_page(PageId::new(2, 0), true).unwrap();
        guard.data_mut().fill(0x22);
        manager.unfix_page(guard, true);

        manager.flush().unwrap();
        assert!(dir.path().join("1").exists());
        assert!(dir.path().join("2").exists());
    }

    #[test]
    fn test_concurrent_exclusive_fixes_are_serialized() {
        let (manager, _dir) = create_test_manager(4);
        const THREADS: usize = 8;
        const ROUNDS: usize = 200;

        std::thread::scope(|scope| {
            for _ in 0..THREADS {
                scope.spawn(|| {
                    for _ in 0..ROUNDS {
                        let mut guard = manager.fix_page(page(0), true).unwrap();
                        let data = guard.data_mut();
                        let value = u64::from_le_bytes(data[..8].try_into().unwrap());
                        data[..8].copy_from_slice(&(value + 1).to_le_bytes());
                        manager.unfix_page(guard, true);
                    }
                });
            }
        });

        let guard = manager.fix_page(page(0), false).unwrap();
        let value = u64::from_le_bytes(guard.data()[..8].try_into().unwrap());
        assert_eq!(value, (THREADS * ROUNDS) as u64);
        manager.unfix_page(guard, false);
    }

    #[test]
    fn test_concurrent_mixed_workload() {
        let (manager, _dir) = create_test_manager(4);
        let manager = &manager;
        const WRITERS: usize = 2;
        const READERS: usize = 4;
        const ROUNDS: usize = 100;

        std::thread::scope(|scope| {
            for w in 0..WRITERS {
                scope.spawn(move || {
                    for round in 0..ROUNDS {
                        let id = page(((w * ROUNDS + round) % 8) as u64);
                        let mut guard = manager.fix_page(id, true).unwrap();
                        let fill = (round % 251) as u8;
                        guard.data_mut().fill(fill);
                        manager.unfix_page(guard, true);
                    }
                });
            }
            for _ in 0..READERS {
                scope.spawn(|| {
                    for round in 0..ROUNDS {
                        let id = page((round % 8) as u64);
                        let guard = manager.fix_page(id, false).unwrap();
                        // Exclusive writers fill whole pages, so a shared
                        // reader must observe a uniform page.
                        let first = guard.data()[0];
                        assert!(guard.data().iter().all(|b| *b == first));
                        manager.unfix_page(guard, false);
                    }
                });
            }
        });
    }
}
