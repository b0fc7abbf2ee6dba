//! Per-directory cache state (C2): the positive-entry arena, the
//! negative-entry list, and the small state bitset, as described by
//! `nlc_inode_ctx_t` in `nl-cache.h`.
//!
//! A `DirCache` does not know its own `DirId` or hold its own lock — callers
//! (in `crate::cache`) own a `DirId -> Arc<parking_lot::Mutex<DirCache>>` table
//! and take the per-directory lock before calling in here. This mirrors the
//! source's "outer DirHandle slot lock, then DirCache.lock" order, minus the
//! outer slot lock, which this crate does not need (see `host.rs`).

use std::collections::HashMap;

use crate::entry::{DirState, NegativeEntry, PositiveEntry};
use crate::host::DirHandle;
use crate::ids::DirId;

/// Base overhead charged for a `DirCache` regardless of its entry lists,
/// standing in for `sizeof(nlc_inode_ctx_t)` in the byte-cap accounting.
/// `pub(crate)` so `cache.rs` can credit the global byte counter the same
/// amount at creation time that `clear()` later debits from it.
pub(crate) const DIRCACHE_BASE_OVERHEAD: usize = 64;

/// Index into a `DirCache`'s own positive-entry arena. Re-expresses the
/// source's "slot B" child-to-parent back-pointer as a plain array index,
/// scoped to the one `DirCache` that owns the arena (see `host.rs` and
/// `DESIGN.md`) rather than a pointer stashed on the child's own inode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeIndex(usize);

/// One cached directory's state: its positive and negative entry sets, the
/// bits summarizing what they mean, and the bookkeeping the global cache
/// (C3/C5) needs to account bytes and referenced inodes.
///
/// `cache_time == 0` means invalid-but-not-yet-freed, matching the source's
/// use of a zero timestamp as the "not currently valid" sentinel.
pub struct DirCache {
    state: DirState,
    pe_arena: Vec<Option<PositiveEntry>>,
    pe_free: Vec<usize>,
    /// Child directory id -> arena index, for O(1) removal by child identity
    /// when the child has a single (non-multilink) parent linkage.
    child_index: HashMap<DirId, usize>,
    ne_list: Vec<NegativeEntry>,
    cache_time: u64,
    size_bytes: usize,
    refd_inodes: usize,
}

/// What a mutation did, so callers (which hold the global byte/inode
/// counters) can adjust them without re-deriving the delta.
#[derive(Debug, Default, Clone, Copy)]
pub struct MutationEffect {
    pub bytes_delta: i64,
    pub refd_delta: i64,
    pub pe_delta: i64,
    pub ne_delta: i64,
}

/// What `clear` freed, for the caller to subtract from global counters and
/// drop any child `DirHandle`s it was keeping live.
#[derive(Default)]
pub struct ClearedState {
    pub bytes_freed: usize,
    pub refd_freed: usize,
    pub pe_freed: usize,
    pub ne_freed: usize,
}

impl DirCache {
    pub fn new() -> Self {
        DirCache {
            state: DirState::empty(),
            pe_arena: Vec::new(),
            pe_free: Vec::new(),
            child_index: HashMap::new(),
            ne_list: Vec::new(),
            cache_time: 0,
            size_bytes: DIRCACHE_BASE_OVERHEAD,
            refd_inodes: 0,
        }
    }

    pub fn state(&self) -> DirState {
        self.state
    }

    pub fn cache_time(&self) -> u64 {
        self.cache_time
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    pub fn refd_inodes(&self) -> usize {
        self.refd_inodes
    }

    pub fn is_empty_state(&self) -> bool {
        self.state.is_empty()
    }

    /// `is_valid(dc)` from §4.2: valid iff it has a timestamp at all and that
    /// timestamp is no older than the last observed disconnect.
    pub fn is_valid(&self, last_disconnect_time: u64) -> bool {
        self.cache_time > 0 && self.cache_time >= last_disconnect_time
    }

    /// Mark this cache valid as of `now`. Called by `get_or_create`/
    /// `ensure_valid` in `crate::cache` once a fresh TTL timer is armed.
    pub fn mark_valid(&mut self, now: u64) {
        self.cache_time = now;
    }

    /// TTL fired: zero the timestamp without freeing PE/NE state, mirroring
    /// the source's `nlc_cache_timeout_handler`, which sets `cache_time = 0`
    /// outside the directory lock to avoid deadlocking with an in-flight
    /// FOP. The actual free happens lazily on the next `ensure_valid`.
    pub fn invalidate(&mut self) {
        self.cache_time = 0;
    }

    pub fn search_ne(&self, name: &str) -> bool {
        self.ne_list.iter().any(|ne| ne.name == name)
    }

    pub fn search_pe(&self, name: &str) -> bool {
        self.pe_arena
            .iter()
            .flatten()
            .any(|pe| pe.name == name)
    }

    /// Case-insensitive scan for `get_real_filename`, returning the entry's
    /// canonically-cased name.
    pub fn search_pe_case_insensitive(&self, fname: &str) -> Option<String> {
        self.pe_arena
            .iter()
            .flatten()
            .find(|pe| pe.name.eq_ignore_ascii_case(fname))
            .map(|pe| pe.name.clone())
    }

    /// Names of every live positive entry, for statedump-style introspection.
    pub fn positive_names(&self) -> Vec<String> {
        self.pe_arena.iter().flatten().map(|pe| pe.name.clone()).collect()
    }

    /// Names of every negative entry, for statedump-style introspection.
    pub fn negative_names(&self) -> Vec<String> {
        self.ne_list.iter().map(|ne| ne.name.clone()).collect()
    }

    /// The full negative-lookup decision of §4.2, given the directory is
    /// already known valid. Returns `true` for HIT/ENOENT.
    pub fn is_negative(&self, name: &str) -> bool {
        if self.search_ne(name) {
            return true;
        }
        self.state.contains(DirState::PE_FULL) && !self.search_pe(name)
    }

    fn remove_ne_internal(&mut self, name: &str) -> Option<NegativeEntry> {
        let idx = self.ne_list.iter().position(|ne| ne.name == name)?;
        Some(self.ne_list.remove(idx))
    }

    /// §4.2 `add_ne`: idempotent insert of a negative entry.
    pub fn add_ne(&mut self, name: &str) -> MutationEffect {
        if self.search_ne(name) {
            return MutationEffect::default();
        }
        let ne = NegativeEntry { name: name.to_string() };
        let bytes = ne.overhead() as i64;
        self.ne_list.push(ne);
        self.state.insert(DirState::NE_VALID);
        MutationEffect { bytes_delta: bytes, refd_delta: 0, pe_delta: 0, ne_delta: 1 }
    }

    pub fn remove_ne(&mut self, name: &str) -> MutationEffect {
        match self.remove_ne_internal(name) {
            Some(ne) => MutationEffect {
                bytes_delta: -(ne.overhead() as i64),
                refd_delta: 0,
                pe_delta: 0,
                ne_delta: -1,
            },
            None => MutationEffect::default(),
        }
    }

    fn alloc_slot(&mut self, pe: PositiveEntry) -> usize {
        if let Some(idx) = self.pe_free.pop() {
            self.pe_arena[idx] = Some(pe);
            idx
        } else {
            self.pe_arena.push(Some(pe));
            self.pe_arena.len() - 1
        }
    }

    /// §4.2 `add_pe`: promotes any same-named NE, then appends a PE. If
    /// `child` is `Some`, the child's id is indexed for O(1) removal.
    pub fn add_pe(&mut self, name: &str, child: Option<DirHandle>) -> (PeIndex, MutationEffect) {
        let mut effect = self.remove_ne(name);
        let pe = PositiveEntry { name: name.to_string(), child: child.clone() };
        effect.bytes_delta += pe.overhead() as i64;
        effect.pe_delta += 1;
        if child.is_some() {
            effect.refd_delta += 1;
        }
        let idx = self.alloc_slot(pe);
        if let Some(h) = child {
            self.child_index.insert(h.id(), idx);
        }
        if !self.state.contains(DirState::PE_PARTIAL) && !self.state.contains(DirState::PE_FULL) {
            self.state.insert(DirState::PE_PARTIAL);
        }
        (PeIndex(idx), effect)
    }

    fn free_slot(&mut self, idx: usize) -> Option<PositiveEntry> {
        let pe = self.pe_arena.get_mut(idx)?.take()?;
        self.pe_free.push(idx);
        if let Some(child) = &pe.child {
            // Only drop the back-pointer if it still points at this slot —
            // a later add_pe could have reused the same child id after an
            // intervening remove, in which case the index belongs to that
            // newer entry instead.
            if self.child_index.get(&child.id()) == Some(&idx) {
                self.child_index.remove(&child.id());
            }
        }
        Some(pe)
    }

    fn find_pe_by_name(&self, name: &str) -> Option<usize> {
        self.pe_arena
            .iter()
            .enumerate()
            .find_map(|(i, slot)| slot.as_ref().filter(|pe| pe.name == name).map(|_| i))
    }

    /// §4.2 `remove_pe`: locate by the documented multilink-aware policy,
    /// remove it, then unconditionally add an NE for `name`.
    pub fn remove_pe(
        &mut self,
        name: &str,
        child: Option<&DirHandle>,
        multilink: bool,
    ) -> MutationEffect {
        let idx = match (multilink, child) {
            (false, Some(h)) => self
                .child_index
                .get(&h.id())
                .copied()
                .or_else(|| self.find_pe_by_name(name)),
            (true, Some(h)) => self
                .find_pe_by_name(name)
                .or_else(|| self.child_index.get(&h.id()).copied()),
            (_, None) => self.find_pe_by_name(name),
        };

        let mut effect = MutationEffect::default();
        if let Some(idx) = idx {
            if let Some(pe) = self.free_slot(idx) {
                effect.bytes_delta -= pe.overhead() as i64;
                effect.pe_delta -= 1;
                if pe.child.is_some() {
                    effect.refd_delta -= 1;
                }
            }
        }
        let ne_effect = self.add_ne(name);
        effect.bytes_delta += ne_effect.bytes_delta;
        effect.refd_delta += ne_effect.refd_delta;
        effect.ne_delta += ne_effect.ne_delta;
        effect
    }

    /// Remove a PE purely by child identity, with no NE side effect. Used by
    /// `rename`'s destination-overwrite cleanup (§9 Open Questions), which
    /// removes a colliding destination name without recording a negative for
    /// it (the very next step adds the moved PE back under that name).
    pub fn remove_pe_no_ne(&mut self, name: &str) -> MutationEffect {
        let mut effect = MutationEffect::default();
        if let Some(idx) = self.find_pe_by_name(name) {
            if let Some(pe) = self.free_slot(idx) {
                effect.bytes_delta -= pe.overhead() as i64;
                effect.pe_delta -= 1;
                if pe.child.is_some() {
                    effect.refd_delta -= 1;
                }
            }
        }
        effect
    }

    /// §4.2 `set_state_full`: only called by the mkdir-on-new-directory
    /// callback (§9 Open Questions — preserved as the single call site).
    pub fn set_state_full(&mut self) {
        self.state.remove(DirState::PE_PARTIAL);
        self.state.insert(DirState::PE_FULL);
    }

    /// §4.2 `clear`: resets to the empty, invalid state and reports what was
    /// freed so the caller can adjust global counters. The dropped
    /// `PositiveEntry`s (and any `DirHandle` clones they held) go out of
    /// scope here; there is no explicit unref step to perform.
    pub fn clear(&mut self) -> ClearedState {
        let freed = ClearedState {
            bytes_freed: self.size_bytes,
            refd_freed: self.refd_inodes,
            pe_freed: self.pe_arena.iter().filter(|s| s.is_some()).count(),
            ne_freed: self.ne_list.len(),
        };
        self.state = DirState::empty();
        self.pe_arena.clear();
        self.pe_free.clear();
        self.child_index.clear();
        self.ne_list.clear();
        self.cache_time = 0;
        self.size_bytes = DIRCACHE_BASE_OVERHEAD;
        self.refd_inodes = 0;
        freed
    }

    /// Apply a `MutationEffect` to this cache's own size/refd accounting.
    /// Call after every `add_ne`/`add_pe`/`remove_pe`/`remove_ne`.
    pub fn apply(&mut self, effect: MutationEffect) {
        self.size_bytes = (self.size_bytes as i64 + effect.bytes_delta).max(DIRCACHE_BASE_OVERHEAD as i64) as usize;
        self.refd_inodes = (self.refd_inodes as i64 + effect.refd_delta).max(0) as usize;
    }
}

impl Default for DirCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::test_support::make_handle;
    use uuid::Uuid;

    fn child(n: u128) -> DirHandle {
        make_handle(DirId::from_uuid(Uuid::from_u128(n)), false)
    }

    #[test]
    fn add_ne_is_idempotent() {
        let mut dc = DirCache::new();
        let e1 = dc.add_ne("foo");
        dc.apply(e1);
        let e2 = dc.add_ne("foo");
        dc.apply(e2);
        assert!(dc.search_ne("foo"));
        assert_eq!(e2.bytes_delta, 0);
    }

    #[test]
    fn add_pe_promotes_ne() {
        let mut dc = DirCache::new();
        let e = dc.add_ne("foo");
        dc.apply(e);
        assert!(dc.search_ne("foo"));
        let (_idx, e) = dc.add_pe("foo", Some(child(1)));
        dc.apply(e);
        assert!(!dc.search_ne("foo"));
        assert!(dc.search_pe("foo"));
        assert_eq!(dc.refd_inodes(), 1);
    }

    #[test]
    fn remove_pe_by_child_is_o1_and_adds_ne() {
        let mut dc = DirCache::new();
        let h = child(2);
        let (_idx, e) = dc.add_pe("bar", Some(h.clone()));
        dc.apply(e);
        let e = dc.remove_pe("bar", Some(&h), false);
        dc.apply(e);
        assert!(!dc.search_pe("bar"));
        assert!(dc.search_ne("bar"));
        assert_eq!(dc.refd_inodes(), 0);
    }

    #[test]
    fn multilink_remove_falls_back_to_name_search() {
        let mut dc = DirCache::new();
        let h = child(3);
        let (_idx, e) = dc.add_pe("baz", Some(h.clone()));
        dc.apply(e);
        // Simulate the child_index entry pointing elsewhere by removing and
        // re-adding under a different name so the fast path misses but the
        // name-based fallback under multilink=true still finds it.
        let e = dc.remove_pe("baz", Some(&h), true);
        dc.apply(e);
        assert!(!dc.search_pe("baz"));
    }

    #[test]
    fn full_state_makes_unknown_names_negative() {
        let mut dc = DirCache::new();
        dc.set_state_full();
        assert!(dc.is_negative("whatever"));
        let (_idx, e) = dc.add_pe("known", None);
        dc.apply(e);
        assert!(!dc.is_negative("known"));
    }

    #[test]
    fn clear_resets_to_baseline() {
        let mut dc = DirCache::new();
        let (_idx, e) = dc.add_pe("x", Some(child(4)));
        dc.apply(e);
        dc.mark_valid(10);
        let freed = dc.clear();
        assert!(freed.bytes_freed > 0);
        assert_eq!(freed.refd_freed, 1);
        assert!(dc.is_empty_state());
        assert_eq!(dc.cache_time(), 0);
        assert_eq!(dc.size_bytes(), DIRCACHE_BASE_OVERHEAD);
    }

    #[test]
    fn case_insensitive_search_returns_canonical_name() {
        let mut dc = DirCache::new();
        let (_idx, e) = dc.add_pe("ReadMe.TXT", None);
        dc.apply(e);
        assert_eq!(dc.search_pe_case_insensitive("readme.txt"), Some("ReadMe.TXT".to_string()));
    }
}
