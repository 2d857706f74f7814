//! The B+-tree proper: latch-coupled descent, splits, and the map API.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;
use strata_buffer::{BufferManager, PageGuard};
use strata_common::{PageId, Result};

use super::node::{self, InnerMut, InnerRef, LeafMut, LeafRef, NodeLayout};
use super::{IndexKey, IndexValue};

/// How a descent treats the pages it visits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DescentMode {
    /// Shared latches, parent released as soon as the child is fixed.
    Lookup,
    /// Exclusive latches (the leaf gets mutated), no structural changes.
    Erase,
    /// Exclusive latches; full inner nodes are split on the way down so the
    /// eventual leaf split cannot overflow an already-released ancestor.
    Insert,
}

/// The leaf a descent ended at.
struct LeafSite<'a> {
    /// The leaf's parent, still latched. Present only on insert descents
    /// where the leaf is not the root.
    parent: Option<PageGuard<'a>>,
    leaf: PageGuard<'a>,
}

/// Ordered map from fixed-size keys to fixed-size values, laid out as one
/// node per page inside a single segment.
///
/// Reads descend with shared latch coupling and run in parallel; writers
/// are serialized by a tree-wide mutex but still latch exclusively so that
/// concurrent readers always observe a consistent tree. Erasing never
/// rebalances: a leaf may stay under-full.
pub struct BTree<K, V> {
    buffer: Arc<BufferManager>,
    segment_id: u16,
    layout: NodeLayout,
    /// Page id of the root node. Meaningless while the tree is empty.
    root: AtomicU64,
    /// Monotonic page allocator; ids are never recycled.
    next_page: AtomicU64,
    is_empty: AtomicBool,
    /// Serializes inserts. Readers do not take it.
    write_lock: Mutex<()>,
    _marker: PhantomData<(K, V)>,
}

impl<K: IndexKey, V: IndexValue> BTree<K, V> {
    /// Creates an empty tree over the given segment.
    pub fn new(segment_id: u16, buffer: Arc<BufferManager>) -> Self {
        let layout = NodeLayout::new::<K, V>(buffer.page_size());
        Self {
            buffer,
            segment_id,
            layout,
            root: AtomicU64::new(0),
            next_page: AtomicU64::new(PageId::new(segment_id, 0).as_u64()),
            is_empty: AtomicBool::new(true),
            write_lock: Mutex::new(()),
            _marker: PhantomData,
        }
    }

    /// Returns the segment this tree stores its nodes in.
    pub fn segment_id(&self) -> u16 {
        self.segment_id
    }

    /// Returns true while no entry has ever been inserted.
    pub fn is_empty(&self) -> bool {
        self.is_empty.load(Ordering::Acquire)
    }

    /// Returns the tree height: the root's level, 0 for a single-leaf or
    /// empty tree.
    pub fn height(&self) -> Result<u16> {
        if self.is_empty() {
            return Ok(0);
        }
        let guard = self.fix_root(false)?;
        let height = node::level(guard.data());
        self.buffer.unfix_page(guard, false);
        Ok(height)
    }

    /// Returns the stored value for `key`, if present.
    pub fn lookup(&self, key: &K) -> Result<Option<V>> {
        if self.is_empty() {
            return Ok(None);
        }
        let LeafSite { leaf: guard, .. } = self.descend(key, DescentMode::Lookup)?;
        let value = LeafRef::<K, V>::new(guard.data(), &self.layout).lookup(key);
        self.buffer.unfix_page(guard, false);
        Ok(value)
    }

    /// Inserts `(key, value)`, overwriting the value when the key is
    /// already present. May surface buffer-full from the page cache.
    pub fn insert(&self, key: &K, value: &V) -> Result<()> {
        let _writer = self.write_lock.lock();

        if self.is_empty() {
            let root_id = self.allocate_page();
            let mut root = self.buffer.fix_page(root_id, true)?;
            {
                let mut leaf = LeafMut::<K, V>::new(root.data_mut(), &self.layout);
                leaf.init();
                leaf.insert(key, value);
            }
            self.buffer.unfix_page(root, true);
            self.root.store(root_id.as_u64(), Ordering::Release);
            self.is_empty.store(false, Ordering::Release);
            debug!("created root leaf {root_id}");
            return Ok(());
        }

        let LeafSite {
            parent,
            leaf: mut leaf_guard,
        } = self.descend(key, DescentMode::Insert)?;

        let leaf_full =
            LeafRef::<K, V>::new(leaf_guard.data(), &self.layout).count() == self.layout.leaf_capacity;
        if !leaf_full {
            LeafMut::<K, V>::new(leaf_guard.data_mut(), &self.layout).insert(key, value);
            self.buffer.unfix_page(leaf_guard, true);
            if let Some(parent) = parent {
                self.buffer.unfix_page(parent, false);
            }
            return Ok(());
        }

        // The leaf is full: acquire the new pages first, then split, so an
        // out-of-buffer failure cannot leave a half-done split behind.
        let right_id = self.allocate_page();
        let mut right = self.buffer.fix_page(right_id, true)?;

        let separator = match parent {
            Some(mut parent) => {
                let separator =
                    LeafMut::<K, V>::new(leaf_guard.data_mut(), &self.layout).split(right.data_mut());
                // The insert-mode descent split full ancestors, so the
                // parent is guaranteed to have room.
                InnerMut::<K>::new(parent.data_mut(), &self.layout)
                    .insert_split(&separator, right_id.as_u64());
                parent.mark_dirty();
                self.buffer.unfix_page(parent, true);
                separator
            }
            None => {
                // The leaf was the root: mint an inner root above both halves.
                let old_root_id = leaf_guard.page_id();
                let new_root_id = self.allocate_page();
                let mut new_root = self.buffer.fix_page(new_root_id, true)?;
                let separator =
                    LeafMut::<K, V>::new(leaf_guard.data_mut(), &self.layout).split(right.data_mut());
                {
                    let mut root_view = InnerMut::<K>::new(new_root.data_mut(), &self.layout);
                    root_view.init(1);
                    root_view.first_insert(&separator, old_root_id.as_u64(), right_id.as_u64());
                }
                new_root.mark_dirty();
                self.root.store(new_root_id.as_u64(), Ordering::Release);
                self.buffer.unfix_page(new_root, true);
                debug!("minted root {new_root_id} over split leaf {old_root_id}");
                separator
            }
        };

        if separator < *key {
            LeafMut::<K, V>::new(right.data_mut(), &self.layout).insert(key, value);
        } else {
            LeafMut::<K, V>::new(leaf_guard.data_mut(), &self.layout).insert(key, value);
        }
        self.buffer.unfix_page(right, true);
        self.buffer.unfix_page(leaf_guard, true);
        Ok(())
    }

    /// Removes `key` if present. Absent keys are a no-op; an under-full
    /// leaf is left as is.
    pub fn erase(&self, key: &K) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        let LeafSite {
            leaf: mut guard, ..
        } = self.descend(key, DescentMode::Erase)?;
        let removed = LeafMut::<K, V>::new(guard.data_mut(), &self.layout).erase(key);
        self.buffer.unfix_page(guard, removed);
        Ok(())
    }

    fn allocate_page(&self) -> PageId {
        PageId::from_u64(self.next_page.fetch_add(1, Ordering::Relaxed))
    }

    /// Fixes the root page, restarting when a concurrent root split moves
    /// the root while we wait for the latch. Page ids are never recycled,
    /// so observing the same id twice means it still is the root.
    fn fix_root(&self, exclusive: bool) -> Result<PageGuard<'_>> {
        loop {
            let root = self.root.load(Ordering::Acquire);
            let guard = self.buffer.fix_page(PageId::from_u64(root), exclusive)?;
            if self.root.load(Ordering::Acquire) == root {
                return Ok(guard);
            }
            self.buffer.unfix_page(guard, false);
        }
    }

    /// Walks from the root to the leaf responsible for `key` with latch
    /// coupling: the parent stays latched until the child is. Insert mode
    /// splits every full inner node on the way down, while the node's
    /// parent is still latched, and keeps the leaf's parent latched for the
    /// caller.
    fn descend(&self, key: &K, mode: DescentMode) -> Result<LeafSite<'_>> {
        let exclusive = mode != DescentMode::Lookup;
        let mut parent = self.fix_root(exclusive)?;

        if node::is_leaf(parent.data()) {
            return Ok(LeafSite {
                parent: None,
                leaf: parent,
            });
        }

        if mode == DescentMode::Insert && InnerRef::<K>::new(parent.data(), &self.layout).is_full()
        {
            parent = self.split_root(parent, key)?;
        }

        loop {
            let child_id = InnerRef::<K>::new(parent.data(), &self.layout).child_for(key);
            let child = self.buffer.fix_page(PageId::from_u64(child_id), exclusive)?;

            if node::is_leaf(child.data()) {
                if mode == DescentMode::Insert {
                    return Ok(LeafSite {
                        parent: Some(parent),
                        leaf: child,
                    });
                }
                self.buffer.unfix_page(parent, false);
                return Ok(LeafSite {
                    parent: None,
                    leaf: child,
                });
            }

            let child = if mode == DescentMode::Insert
                && InnerRef::<K>::new(child.data(), &self.layout).is_full()
            {
                self.split_inner_child(&mut parent, child, key)?
            } else {
                child
            };

            self.buffer.unfix_page(parent, false);
            parent = child;
        }
    }

    /// Splits a full inner root and installs a new root above the halves.
    /// Returns the half that covers `key`, still exclusively latched.
    fn split_root<'g>(&'g self, mut old_root: PageGuard<'g>, key: &K) -> Result<PageGuard<'g>> {
        let old_root_id = old_root.page_id();
        let right_id = self.allocate_page();
        let mut right = self.buffer.fix_page(right_id, true)?;
        let new_root_id = self.allocate_page();
        let mut new_root = self.buffer.fix_page(new_root_id, true)?;

        let root_level = node::level(old_root.data());
        let separator = InnerMut::<K>::new(old_root.data_mut(), &self.layout).split(right.data_mut());
        old_root.mark_dirty();
        right.mark_dirty();

        {
            let mut root_view = InnerMut::<K>::new(new_root.data_mut(), &self.layout);
            root_view.init(root_level + 1);
            root_view.first_insert(&separator, old_root_id.as_u64(), right_id.as_u64());
        }
        new_root.mark_dirty();
        self.root.store(new_root_id.as_u64(), Ordering::Release);
        self.buffer.unfix_page(new_root, true);
        debug!("split root {old_root_id}; new root {new_root_id} at level {}", root_level + 1);

        if separator < *key {
            self.buffer.unfix_page(old_root, true);
            Ok(right)
        } else {
            self.buffer.unfix_page(right, true);
            Ok(old_root)
        }
    }

    /// Splits a full inner node met during an insert descent. The parent is
    /// still latched, so inserting the separator into it is safe. Returns
    /// the half that covers `key`.
    fn split_inner_child<'g>(
        &'g self,
        parent: &mut PageGuard<'g>,
        mut child: PageGuard<'g>,
        key: &K,
    ) -> Result<PageGuard<'g>> {
        let right_id = self.allocate_page();
        let mut right = self.buffer.fix_page(right_id, true)?;

        let separator = InnerMut::<K>::new(child.data_mut(), &self.layout).split(right.data_mut());
        child.mark_dirty();
        right.mark_dirty();

        InnerMut::<K>::new(parent.data_mut(), &self.layout).insert_split(&separator, right_id.as_u64());
        parent.mark_dirty();

        if separator < *key {
            self.buffer.unfix_page(child, true);
            Ok(right)
        } else {
            self.buffer.unfix_page(right, true);
            Ok(child)
        }
    }
}
