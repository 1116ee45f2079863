//! A single tag -> target hashtable with linear probing, published behind
//! an atomic pointer so lookups never take a lock.

use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

/// Tag value that marks a slot empty. Guest addresses are never zero in
/// practice, so this doubles as "never a real tag".
const NULL_TAG: u64 = 0;

/// Target value stored in the table's trailing sentinel slot. Any lookup
/// that walks off the end of the real slots without finding a match lands
/// here and reads this as a target, but every caller treats reaching the
/// sentinel's `NULL_TAG` as a miss before ever reading its target — the
/// value itself only documents that this slot is never a valid code address.
const SENTINEL_TARGET: u64 = 1;

#[derive(Debug)]
struct Entry {
    tag: AtomicU64,
    target: AtomicU64,
}

impl Entry {
    fn empty() -> Self {
        Self { tag: AtomicU64::new(NULL_TAG), target: AtomicU64::new(0) }
    }
}

struct TableData {
    /// `entries.len() == mask + 2`: real slots `0..=mask`, plus one
    /// trailing sentinel slot at `mask + 1` that is never written by
    /// insert/delete and always reads as a miss.
    entries: Box<[Entry]>,
    mask: usize,
}

impl TableData {
    fn new(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two());
        let mask = capacity - 1;
        let mut entries = Vec::with_capacity(capacity + 1);
        for _ in 0..capacity {
            entries.push(Entry::empty());
        }
        entries.push(Entry { tag: AtomicU64::new(NULL_TAG), target: AtomicU64::new(SENTINEL_TARGET) });
        Self { entries: entries.into_boxed_slice(), mask }
    }

    fn hash(tag: u64) -> u64 {
        tag.wrapping_mul(0x9E37_79B9_7F4A_7C15)
    }

    /// Walks forward from the hashed slot, wrapping within the real slots
    /// `0..=mask` exactly like `probe_mut` so a tag that wrapped around
    /// during `insert` is still found. The trailing sentinel at `mask + 1`
    /// is only ever reached after a full `mask + 1`-slot walk has visited
    /// every real slot and found none occupied by `tag` nor empty, at which
    /// point its `NULL_TAG` terminates the walk as a guaranteed miss — so
    /// the generated-code equivalent of this routine still needs no bounds
    /// check, it just wraps its index instead of its slice.
    fn lookup(&self, tag: u64) -> Option<u64> {
        let start = (Self::hash(tag) as usize) & self.mask;
        for step in 0..=self.mask + 1 {
            let idx = if step <= self.mask { (start + step) & self.mask } else { self.mask + 1 };
            let entry = &self.entries[idx];
            let cand = entry.tag.load(Ordering::Acquire);
            if cand == tag {
                return Some(entry.target.load(Ordering::Acquire));
            }
            if cand == NULL_TAG {
                return None;
            }
        }
        None
    }

    /// Finds the real slot (wrapping within `0..=mask`) that already holds
    /// `tag`, or the first empty slot on its probe chain, for insert/delete.
    fn probe_mut(&self, tag: u64) -> Option<usize> {
        let start = (Self::hash(tag) as usize) & self.mask;
        for step in 0..=self.mask {
            let idx = (start + step) & self.mask;
            let cand = self.entries[idx].tag.load(Ordering::Acquire);
            if cand == tag || cand == NULL_TAG {
                return Some(idx);
            }
        }
        None
    }

    fn insert(&self, tag: u64, target: u64) -> bool {
        match self.probe_mut(tag) {
            Some(idx) => {
                let entry = &self.entries[idx];
                entry.target.store(target, Ordering::Release);
                entry.tag.store(tag, Ordering::Release);
                true
            }
            None => false,
        }
    }

    fn delete(&self, tag: u64, delete_trampoline: u64) -> bool {
        let start = (Self::hash(tag) as usize) & self.mask;
        for step in 0..=self.mask {
            let idx = (start + step) & self.mask;
            let entry = &self.entries[idx];
            let cand = entry.tag.load(Ordering::Acquire);
            if cand == tag {
                // Leave `tag` in place: clearing it would break the probe
                // chain for whatever collided past this slot.
                entry.target.store(delete_trampoline, Ordering::Release);
                return true;
            }
            if cand == NULL_TAG {
                return false;
            }
        }
        false
    }

    fn live_pairs(&self) -> Vec<(u64, u64)> {
        self.entries[..=self.mask]
            .iter()
            .filter_map(|e| {
                let tag = e.tag.load(Ordering::Acquire);
                (tag != NULL_TAG).then(|| (tag, e.target.load(Ordering::Acquire)))
            })
            .collect()
    }
}

/// Lock-free tag -> target table. Reads never block; writes (`insert`,
/// `delete`, `resize`) assume the collaborator serializes them externally
/// (this crate does not provide its own writer lock).
pub struct Table {
    current: AtomicPtr<TableData>,
}

impl Table {
    /// Creates a table with room for `capacity` real slots (must be a
    /// power of two).
    pub fn new(capacity: usize) -> Self {
        let data = Box::new(TableData::new(capacity));
        Self { current: AtomicPtr::new(Box::into_raw(data)) }
    }

    fn load(&self) -> &TableData {
        // SAFETY: `current` always points at a live, leaked `TableData`;
        // `resize` only ever publishes a new pointer, never frees the old
        // one while a concurrent reader might still hold it.
        unsafe { &*self.current.load(Ordering::Acquire) }
    }

    /// Looks up `tag`, returning its target if present.
    pub fn lookup(&self, tag: u64) -> Option<u64> {
        self.load().lookup(tag)
    }

    /// Inserts or replaces `tag -> target`.
    pub fn insert(&self, tag: u64, target: u64) -> bool {
        self.load().insert(tag, target)
    }

    /// Rewrites `tag`'s target to `delete_trampoline` in place.
    pub fn delete(&self, tag: u64, delete_trampoline: u64) -> bool {
        self.load().delete(tag, delete_trampoline)
    }

    /// Rebuilds the table at `new_capacity`, rehashing every live entry,
    /// and publishes it with a single release store so concurrent lookups
    /// see either the whole old table or the whole new one, never a mix of
    /// the old entries array with the new mask. The old table is leaked:
    /// this crate has no reader-quiescence scheme to reclaim it safely.
    pub fn resize(&self, new_capacity: usize) {
        let old = self.load();
        let new_data = Box::new(TableData::new(new_capacity));
        for (tag, target) in old.live_pairs() {
            new_data.insert(tag, target);
        }
        let new_ptr = Box::into_raw(new_data);
        self.current.store(new_ptr, Ordering::Release);
    }
}

impl Drop for Table {
    fn drop(&mut self) {
        // SAFETY: `self` uniquely owns the current table; no concurrent
        // reader can observe it once `Table` itself is being dropped.
        unsafe {
            drop(Box::from_raw(self.current.load(Ordering::Relaxed)));
        }
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table").field("mask", &self.load().mask).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miss_on_empty_table() {
        let t = Table::new(8);
        assert_eq!(t.lookup(42), None);
    }

    #[test]
    fn lookup_follows_a_probe_chain_that_wrapped_past_the_end() {
        // At capacity 32, tags 3 and 35 both hash to slot 31 (the last real
        // slot); inserting 3 then 35 forces 35's probe to wrap to slot 0.
        // `lookup` must wrap the same way instead of stopping at the
        // sentinel right after slot 31.
        let t = Table::new(32);
        assert!(t.insert(3, 0x3000));
        assert!(t.insert(35, 0x3500));
        assert_eq!(t.lookup(3), Some(0x3000));
        assert_eq!(t.lookup(35), Some(0x3500));
    }

    #[test]
    fn insert_then_lookup_hits() {
        let t = Table::new(8);
        t.insert(42, 0x4000);
        assert_eq!(t.lookup(42), Some(0x4000));
    }

    #[test]
    fn many_inserts_all_resolve_despite_collisions() {
        let t = Table::new(8);
        for tag in 1..=6u64 {
            t.insert(tag, tag * 0x1000);
        }
        for tag in 1..=6u64 {
            assert_eq!(t.lookup(tag), Some(tag * 0x1000));
        }
    }

    #[test]
    fn delete_rewrites_target_without_clearing_tag() {
        let t = Table::new(8);
        t.insert(7, 0x1000);
        assert!(t.delete(7, 0xdead));
        assert_eq!(t.lookup(7), Some(0xdead));
    }

    #[test]
    fn delete_of_missing_tag_is_a_noop_false() {
        let t = Table::new(8);
        assert!(!t.delete(7, 0xdead));
    }

    #[test]
    fn resize_preserves_existing_entries() {
        let t = Table::new(4);
        t.insert(1, 0x100);
        t.insert(2, 0x200);
        t.resize(16);
        assert_eq!(t.lookup(1), Some(0x100));
        assert_eq!(t.lookup(2), Some(0x200));
    }

    #[test]
    fn concurrent_insert_and_lookup_never_observes_torn_entry() {
        use std::thread;
        let t = Table::new(64);
        thread::scope(|s| {
            s.spawn(|| {
                for i in 1..1000u64 {
                    t.insert(i, i * 16);
                }
            });
            s.spawn(|| {
                for _ in 0..1000 {
                    if let Some(target) = t.lookup(500) {
                        assert_eq!(target, 500 * 16);
                    }
                }
            });
        });
    }
}
