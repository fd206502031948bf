//! Entry metadata, the entry arena, and the clock rings.
//!
//! Each cached block is tracked by an [`Entry`]: the key, the payload size,
//! a reference to the value while the block is resident, the residency
//! class, and the referenced bit the clock hands inspect. Entries live in
//! an [`EntryArena`] (a slab of reusable slots addressed by stable
//! [`EntryId`]s) and are threaded onto one of three circular [`Ring`]s
//! through `prev`/`next` links:
//!
//! ```text
//!   arena (Vec<Option<Entry>> + free list)
//!   ┌──────┬────────────────────────────────────────────────────┐
//!   │ id 0 │ Entry { key, size, value: Some(..), Hot,  ref: 1 } │
//!   │ id 1 │ Entry { key, size, value: Some(..), Cold, ref: 0 } │
//!   │ id 2 │ (free)                                             │
//!   │ id 3 │ Entry { key, size, value: None,     Test, ref: 0 } │
//!   └──────┴────────────────────────────────────────────────────┘
//!
//!   hot ring:   [0] ─► ... ─► [0]        hand ─► next sweep target
//!   cold ring:  [1] ─► ... ─► [1]
//!   test ring:  [3] ─► ... ─► [3]        (ghosts: key + size only)
//! ```
//!
//! Freed slots are pushed onto a free list and reused by later inserts, so
//! a steady-state shard stops allocating entry storage altogether.
//!
//! A ring's hand advances in insertion order; a newly linked entry is
//! placed immediately behind the hand so it is examined last. Unlinking
//! the entry under the hand moves the hand to the next entry.

use std::sync::Arc;

use crate::value::Value;

/// Identifier of the file (or table, or other block container) a cached
/// block belongs to. Opaque to the cache apart from equality and hashing.
///
/// # Example
///
/// ```
/// use blockcache::FileId;
///
/// let file = FileId(42);
/// assert_eq!(file, FileId::from(42));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub u64);

impl From<u64> for FileId {
    #[inline]
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Full block address: file plus byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct BlockKey {
    pub(crate) file: FileId,
    pub(crate) offset: u64,
}

/// Residency class of an entry, i.e. which ring it is linked on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Residency {
    /// Resident and frequently referenced; protected from direct eviction.
    Hot,
    /// Resident, recently admitted or demoted; the eviction candidates.
    Cold,
    /// Non-resident ghost remembering a recently evicted cold block.
    Test,
}

/// Stable handle into an [`EntryArena`]. Valid until the slot is removed;
/// the index may be reused by a later insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct EntryId(usize);

/// Per-block metadata node.
#[derive(Debug)]
pub(crate) struct Entry {
    pub(crate) key: BlockKey,
    /// Payload size in bytes. Retained after the value is dropped so the
    /// ghost carries the weight it used to occupy.
    pub(crate) size: usize,
    /// `Some` while resident, `None` for test (ghost) entries.
    pub(crate) value: Option<Arc<Value>>,
    pub(crate) residency: Residency,
    /// Set on every hit, cleared by the sweeping hand.
    pub(crate) referenced: bool,
    prev: Option<EntryId>,
    next: Option<EntryId>,
}

impl Entry {
    pub(crate) fn new(key: BlockKey, size: usize, value: Arc<Value>) -> Self {
        Self {
            key,
            size,
            value: Some(value),
            residency: Residency::Cold,
            referenced: false,
            prev: None,
            next: None,
        }
    }
}

/// Slab of entries with reusable slots and stable ids.
#[derive(Debug, Default)]
pub(crate) struct EntryArena {
    slots: Vec<Option<Entry>>,
    free: Vec<usize>,
    len: usize,
}

impl EntryArena {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[cfg(any(test, debug_assertions))]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Inserts an entry, reusing a freed slot when one is available.
    pub(crate) fn insert(&mut self, entry: Entry) -> EntryId {
        let idx = if let Some(idx) = self.free.pop() {
            self.slots[idx] = Some(entry);
            idx
        } else {
            self.slots.push(Some(entry));
            self.slots.len() - 1
        };
        self.len += 1;
        EntryId(idx)
    }

    /// Removes the entry at `id` and recycles its slot.
    pub(crate) fn remove(&mut self, id: EntryId) -> Option<Entry> {
        let entry = self.slots.get_mut(id.0)?.take()?;
        self.free.push(id.0);
        self.len -= 1;
        Some(entry)
    }

    /// Returns the entry at `id`. The id must be live.
    pub(crate) fn entry(&self, id: EntryId) -> &Entry {
        self.slots[id.0].as_ref().expect("stale entry id")
    }

    /// Returns the entry at `id` mutably. The id must be live.
    pub(crate) fn entry_mut(&mut self, id: EntryId) -> &mut Entry {
        self.slots[id.0].as_mut().expect("stale entry id")
    }

    /// Iterates over live `(EntryId, &Entry)` pairs.
    #[cfg(any(test, debug_assertions))]
    pub(crate) fn iter(&self) -> impl Iterator<Item = (EntryId, &Entry)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| slot.as_ref().map(|entry| (EntryId(idx), entry)))
    }
}

/// One circular residency list with its clock hand.
#[derive(Debug, Default)]
pub(crate) struct Ring {
    hand: Option<EntryId>,
    len: usize,
}

impl Ring {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The entry the hand currently points at, i.e. the next sweep target.
    pub(crate) fn hand(&self) -> Option<EntryId> {
        self.hand
    }

    /// Links `id` into the ring immediately behind the hand, so the sweep
    /// reaches it after every entry already present.
    pub(crate) fn link_behind_hand(&mut self, arena: &mut EntryArena, id: EntryId) {
        match self.hand {
            None => {
                let entry = arena.entry_mut(id);
                entry.prev = Some(id);
                entry.next = Some(id);
                self.hand = Some(id);
            }
            Some(hand) => {
                let prev = arena.entry(hand).prev.expect("unlinked ring hand");
                arena.entry_mut(prev).next = Some(id);
                {
                    let entry = arena.entry_mut(id);
                    entry.prev = Some(prev);
                    entry.next = Some(hand);
                }
                arena.entry_mut(hand).prev = Some(id);
            }
        }
        self.len += 1;
    }

    /// Unlinks `id` from the ring. If the hand pointed at `id`, it moves
    /// to the next entry in sweep order.
    pub(crate) fn unlink(&mut self, arena: &mut EntryArena, id: EntryId) {
        let (prev, next) = {
            let entry = arena.entry(id);
            (
                entry.prev.expect("unlinking an entry outside any ring"),
                entry.next.expect("unlinking an entry outside any ring"),
            )
        };
        if prev == id {
            // sole member
            self.hand = None;
        } else {
            arena.entry_mut(prev).next = Some(next);
            arena.entry_mut(next).prev = Some(prev);
            if self.hand == Some(id) {
                self.hand = Some(next);
            }
        }
        let entry = arena.entry_mut(id);
        entry.prev = None;
        entry.next = None;
        self.len -= 1;
    }

    /// Advances the hand to the next entry in sweep order.
    pub(crate) fn advance(&mut self, arena: &EntryArena) {
        if let Some(hand) = self.hand {
            self.hand = arena.entry(hand).next;
        }
    }

    /// Collects the ring's ids in sweep order, starting at the hand.
    #[cfg(any(test, debug_assertions))]
    pub(crate) fn sweep_order(&self, arena: &EntryArena) -> Vec<EntryId> {
        let mut ids = Vec::with_capacity(self.len);
        let Some(start) = self.hand else {
            return ids;
        };
        let mut current = start;
        loop {
            ids.push(current);
            current = arena.entry(current).next.expect("broken ring link");
            if current == start {
                break;
            }
        }
        ids
    }
}
