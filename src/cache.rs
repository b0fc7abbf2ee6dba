//! The global cache (C3), its operations API (C4), LRU/size enforcement
//! (C5), and the invalidation handler (C7), folded into one `NlCache` handle
//! in the same spirit as `DavHandler` fronting a `DavFileSystem`: one cheap
//! `Clone`-able entry point the host wires into its FOP dispatch and its
//! upcall/connectivity channels.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use dashmap::mapref::entry::Entry as DashEntry;
use dashmap::DashMap;
use lru::LruCache;
use parking_lot::{Mutex, RwLock};

use crate::conf::NlCacheConfig;
use crate::dircache::{DirCache, MutationEffect, DIRCACHE_BASE_OVERHEAD};
use crate::entry::DirState;
use crate::error::NlcResult;
use crate::host::{DirHandle, InodeTable};
use crate::ids::DirId;
use crate::metrics::{Metrics, NlcMetricsSnapshot};
use crate::timer_wheel::{TimerHandle, TimerWheel};
use crate::upcall::{ConnEvent, UpcallEvent, UpcallFlags};

/// Wall-clock source for `cache_time`/`last_disconnect_time` bookkeeping.
/// Abstracted so tests can step time deterministically instead of racing a
/// real `Instant` — the production clock only ever counts whole seconds
/// since the cache was built, mirroring the coarse-grained `gf_time()` the
/// source reads `cache_time` against.
pub(crate) trait Clock: Send + Sync {
    fn now_secs(&self) -> u64;
}

struct MonotonicClock {
    start: Instant,
}

impl Clock for MonotonicClock {
    fn now_secs(&self) -> u64 {
        self.start.elapsed().as_secs()
    }
}

/// Result of the §4.2 negative-lookup decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupProbe {
    /// Serve ENOENT locally; do not forward.
    HitEnoent,
    /// Nothing conclusive cached; forward to the backend.
    Miss,
}

/// Result of the getxattr `get_real_filename` probe.
#[derive(Debug, Clone)]
pub enum RealNameProbe {
    Hit(String),
    HitEnoent,
    Forward,
}

/// A read-only snapshot of one directory's cache state, for the
/// statedump-style introspection endpoint (§10).
#[derive(Debug, Clone)]
pub struct DirCacheSnapshot {
    pub dir: DirId,
    pub cache_time: u64,
    pub size_bytes: usize,
    pub refd_inodes: usize,
    pub positive_entry_names: Vec<String>,
    pub negative_entry_names: Vec<String>,
    pub full: bool,
}

struct Inner {
    dirs: DashMap<DirId, Arc<Mutex<DirCache>>>,
    timers: DashMap<DirId, TimerHandle>,
    lru: Mutex<LruCache<DirId, ()>>,
    last_disconnect_time: AtomicU64,
    enabled: AtomicBool,
    config: RwLock<NlCacheConfig>,
    metrics: Metrics,
    wheel: TimerWheel<DirId>,
    host: Arc<dyn InodeTable>,
    clock: Arc<dyn Clock>,
}

impl Inner {
    /// Timer fired: lazily invalidate (§4.1, §4.2). Does not free PE/NE or
    /// touch the LRU — that happens the next time this directory is
    /// touched, via `ensure_valid`, exactly as the source's
    /// `nlc_cache_timeout_handler` defers the actual free to avoid taking
    /// `DirCache.lock` from the ticker while a FOP might hold it. Runs
    /// directly against `Inner` (not `NlCache`) since the timer wheel's
    /// callback only ever holds a `Weak<Inner>`, not a full `NlCache`.
    fn on_timer_fire(&self, dir: DirId) {
        if let Some(dc_arc) = self.dirs.get(&dir) {
            dc_arc.lock().invalidate();
        }
    }
}

/// Entry point: a cheap-to-clone handle over the shared cache state. Wire
/// one of these into the FOP interceptors (`crate::interceptor`) and into
/// whatever delivers upcalls/connectivity events to `on_upcall`/
/// `on_connectivity`/`on_parent_down`.
#[derive(Clone)]
pub struct NlCache {
    inner: Arc<Inner>,
}

impl NlCache {
    /// Construct the cache. Fails only on an invalid configuration (§7) —
    /// never on anything FOP-shaped. Must be called from within a running
    /// Tokio runtime, since the timer wheel spawns its ticker task here.
    pub fn new(config: NlCacheConfig, host: Arc<dyn InodeTable>) -> NlcResult<Self> {
        Self::new_with_clock(config, host, Arc::new(MonotonicClock { start: Instant::now() }))
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub(crate) fn new_with_clock(
        config: NlCacheConfig,
        host: Arc<dyn InodeTable>,
        clock: Arc<dyn Clock>,
    ) -> NlcResult<Self> {
        config.validate()?;
        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let weak = weak.clone();
            let wheel = TimerWheel::init(move |dir_id: DirId| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_timer_fire(dir_id);
                }
            });
            Inner {
                dirs: DashMap::new(),
                timers: DashMap::new(),
                lru: Mutex::new(LruCache::unbounded()),
                last_disconnect_time: AtomicU64::new(0),
                enabled: AtomicBool::new(true),
                config: RwLock::new(config),
                metrics: Metrics::default(),
                wheel,
                host,
                clock,
            }
        });
        Ok(NlCache { inner })
    }

    fn now(&self) -> u64 {
        self.inner.clock.now_secs()
    }

    fn config(&self) -> NlCacheConfig {
        *self.inner.config.read()
    }

    fn enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Acquire) && !self.config().pass_through
    }

    /// `NlCache::reconfigure`: hot-swap TTL/caps/flags without rebuilding the
    /// cache or discarding already-cached entries (§10). Shrinking a cap
    /// below current usage triggers an immediate prune.
    pub fn reconfigure(&self, config: NlCacheConfig) -> NlcResult<()> {
        config.validate()?;
        *self.inner.config.write() = config;
        self.lru_prune();
        Ok(())
    }

    pub fn metrics(&self) -> NlcMetricsSnapshot {
        let cfg = self.config();
        self.inner.metrics.snapshot(cfg.byte_cap, cfg.inode_cap)
    }

    /// `NlCache::debug_dump_dir`: a point-in-time read of one directory's
    /// state, for tooling and tests (§10's statedump replacement).
    pub fn debug_dump_dir(&self, dir: DirId) -> Option<DirCacheSnapshot> {
        let dc_arc = self.inner.dirs.get(&dir)?.clone();
        let dc = dc_arc.lock();
        Some(DirCacheSnapshot {
            dir,
            cache_time: dc.cache_time(),
            size_bytes: dc.size_bytes(),
            refd_inodes: dc.refd_inodes(),
            positive_entry_names: dc.positive_names(),
            negative_entry_names: dc.negative_names(),
            full: dc.state().contains(DirState::PE_FULL),
        })
    }

    /// `NlCache::on_forget`: the host is discarding its last reference to
    /// `dir`'s `DirHandle`. Clear and drop the cache entirely (§3
    /// lifecycles, §10).
    pub fn on_forget(&self, dir: DirId) {
        if let Some((_, dc_arc)) = self.inner.dirs.remove(&dir) {
            let mut dc = dc_arc.lock();
            let freed = dc.clear();
            self.account_cleared(&freed);
        }
        if let Some((_, handle)) = self.inner.timers.remove(&dir) {
            self.inner.wheel.del(handle);
        }
        self.inner.lru.lock().pop(&dir);
    }

    fn account_cleared(&self, freed: &crate::dircache::ClearedState) {
        self.inner.metrics.add_bytes(-(freed.bytes_freed as i64));
        self.inner.metrics.add_refd_inodes(-(freed.refd_freed as i64));
        self.inner.metrics.add_pe_count(-(freed.pe_freed as i64));
        self.inner.metrics.add_ne_count(-(freed.ne_freed as i64));
    }

    fn account_effect(&self, effect: &MutationEffect) {
        self.inner.metrics.add_bytes(effect.bytes_delta);
        self.inner.metrics.add_refd_inodes(effect.refd_delta);
        self.inner.metrics.add_pe_count(effect.pe_delta);
        self.inner.metrics.add_ne_count(effect.ne_delta);
    }

    /// §4.2 `get_or_create` + `ensure_valid` combined: resolve (creating if
    /// absent) the `DirCache` for `dir`, then make sure it is in a valid
    /// state, re-arming its timer and re-appending to the LRU if it had
    /// gone stale (TTL fired or a connectivity event bumped
    /// `last_disconnect_time`).
    ///
    /// Only the mutation paths (`mutate`, `note_lookup_enoent`,
    /// `mark_new_dir_full`) call this — a probe that finds nothing cached
    /// must not manufacture a `DirCache`/timer/LRU slot for a directory it
    /// has no reason to track yet (see [`NlCache::peek`]).
    fn get_or_create(&self, dir: DirId) -> Arc<Mutex<DirCache>> {
        let dc_arc = match self.inner.dirs.entry(dir) {
            DashEntry::Occupied(e) => e.get().clone(),
            DashEntry::Vacant(e) => {
                let arc = Arc::new(Mutex::new(DirCache::new()));
                e.insert(arc.clone());
                self.inner.metrics.add_bytes(DIRCACHE_BASE_OVERHEAD as i64);
                arc
            }
        };
        self.ensure_valid(dir, &dc_arc);
        dc_arc
    }

    /// Get-only resolve for the probe path (§3: a `DirCache` is "created
    /// lazily on the first operation that would add to it"; mirrors the
    /// source's `nlc_inode_ctx_get`, not `..._get_set`). Never creates an
    /// entry, never arms a timer, never touches the LRU — a probe of a
    /// directory with nothing cached is simply a miss.
    fn peek(&self, dir: DirId) -> Option<Arc<Mutex<DirCache>>> {
        self.inner.dirs.get(&dir).map(|e| e.clone())
    }

    fn ensure_valid(&self, dir: DirId, dc_arc: &Arc<Mutex<DirCache>>) {
        let last_disc = self.inner.last_disconnect_time.load(Ordering::Acquire);
        let mut dc = dc_arc.lock();
        if dc.is_valid(last_disc) {
            return;
        }
        if !dc.is_empty_state() {
            let freed = dc.clear();
            drop(dc);
            self.account_cleared(&freed);
            dc = dc_arc.lock();
        }
        let timeout = self.config().timeout;
        if let Some(old) = self.inner.timers.insert(dir, self.inner.wheel.add(timeout, dir)) {
            self.inner.wheel.del(old);
        }
        dc.mark_valid(self.now().max(1));
        drop(dc);
        self.inner.lru.lock().push(dir, ());
    }

    fn is_valid_now(&self, dc: &DirCache) -> bool {
        dc.is_valid(self.inner.last_disconnect_time.load(Ordering::Acquire))
    }

    /// §4.5 `lru_prune`: drop least-recently-touched directories until under
    /// both caps, releasing the global LRU lock before taking any victim's
    /// `DirCache.lock` (see §5's lock order).
    fn lru_prune(&self) {
        let cfg = self.config();
        loop {
            let over_bytes = self.inner.metrics.current_bytes() > cfg.byte_cap as i64;
            let over_inodes = self.inner.metrics.current_refd_inodes() > cfg.inode_cap as i64;
            if !over_bytes && !over_inodes {
                return;
            }
            let victim = self.inner.lru.lock().pop_lru().map(|(id, _)| id);
            let Some(victim) = victim else { return };
            if let Some(dc_arc) = self.inner.dirs.get(&victim) {
                let mut dc = dc_arc.lock();
                let freed = dc.clear();
                drop(dc);
                self.account_cleared(&freed);
            }
            if let Some((_, handle)) = self.inner.timers.remove(&victim) {
                self.inner.wheel.del(handle);
            }
        }
    }

    // ---- C6 probe path ----------------------------------------------

    /// The negative-lookup decision of §4.2, for a `lookup(parent, name)`
    /// whose child is *not* already known positive by the host's own inode
    /// table (that case never reaches the cache at all).
    pub fn probe_lookup(&self, parent: DirId, name: &str) -> LookupProbe {
        if !self.enabled() {
            return LookupProbe::Miss;
        }
        let Some(dc_arc) = self.peek(parent) else {
            return LookupProbe::Miss;
        };
        let dc = dc_arc.lock();
        if !self.is_valid_now(&dc) {
            return LookupProbe::Miss;
        }
        if dc.is_negative(name) {
            self.inner.metrics.record_hit();
            LookupProbe::HitEnoent
        } else {
            LookupProbe::Miss
        }
    }

    /// Backend returned ENOENT for a forwarded lookup: seed an NE.
    pub fn note_lookup_enoent(&self, parent: DirId, name: &str) {
        self.inner.metrics.record_miss();
        if !self.enabled() {
            return;
        }
        let dc_arc = self.get_or_create(parent);
        let effect = {
            let mut dc = dc_arc.lock();
            let e = dc.add_ne(name);
            dc.apply(e);
            e
        };
        self.account_effect(&effect);
        self.lru_prune();
    }

    /// getxattr `get_real_filename:<fname>` probe (§4.6).
    pub fn probe_real_filename(&self, dir: DirId, fname: &str) -> RealNameProbe {
        if !self.enabled() || !self.config().positive_entry {
            return RealNameProbe::Forward;
        }
        let Some(dc_arc) = self.peek(dir) else {
            return RealNameProbe::Forward;
        };
        let dc = dc_arc.lock();
        if !self.is_valid_now(&dc) {
            return RealNameProbe::Forward;
        }
        if let Some(canonical) = dc.search_pe_case_insensitive(fname) {
            self.inner.metrics.record_realname_hit();
            return RealNameProbe::Hit(canonical);
        }
        if dc.state().contains(DirState::PE_FULL) {
            self.inner.metrics.record_realname_miss();
            return RealNameProbe::HitEnoent;
        }
        RealNameProbe::Forward
    }

    // ---- C6 mutation path ---------------------------------------------

    fn mutate<F>(&self, dir: DirId, f: F)
    where
        F: FnOnce(&mut DirCache) -> MutationEffect,
    {
        if !self.enabled() {
            return;
        }
        let dc_arc = self.get_or_create(dir);
        let effect = {
            let mut dc = dc_arc.lock();
            let e = f(&mut dc);
            dc.apply(e);
            e
        };
        self.account_effect(&effect);
        self.lru_prune();
    }

    /// mkdir(parent, name, new_dir) succeeded: add the PE in the parent.
    /// Pair with [`NlCache::mark_new_dir_full`] for the new directory's own
    /// cache (a distinct `DirId`, so it cannot be folded into `mutate`'s
    /// single-directory signature).
    pub fn on_mkdir_success(&self, parent: DirId, name: &str, new_dir: DirHandle) {
        self.mutate(parent, |dc| dc.add_pe(name, Some(new_dir)).1);
    }

    /// The new directory created by a successful mkdir is, by definition,
    /// empty: its positive-entry list is trivially complete. This is the
    /// one and only `set_state_full` call site (§9 Open Questions).
    pub fn mark_new_dir_full(&self, new_dir: DirId) {
        let dc_arc = self.get_or_create(new_dir);
        dc_arc.lock().set_state_full();
    }

    /// mknod/create/symlink(parent, name, new_child) succeeded.
    pub fn on_create_like_success(&self, parent: DirId, name: &str, new_child: DirHandle) {
        self.mutate(parent, |dc| dc.add_pe(name, Some(new_child)).1);
    }

    /// link(existing, newparent, newname) succeeded. No back-pointer: the
    /// PE is name-only (§4.6, §9 Open Questions).
    pub fn on_link_success(&self, newparent: DirId, newname: &str) {
        self.mutate(newparent, |dc| dc.add_pe(newname, None).1);
    }

    /// unlink(parent, name, child) succeeded. `link_count` comes from the
    /// backend's reply; `None` means it could not be determined, in which
    /// case — per §9's Open Questions decision — no cache mutation happens
    /// at all, not even an NE add.
    pub fn on_unlink_success(&self, parent: DirId, name: &str, child: &DirHandle, link_count: Option<u32>) {
        let Some(count) = link_count else { return };
        let multilink = count > 1;
        self.mutate(parent, |dc| dc.remove_pe(name, Some(child), multilink));
    }

    /// rmdir(parent, name, child) succeeded: the child directory's own
    /// cache is meaningless now, so it is cleared outright; the parent's PE
    /// for it is removed (never multilink — directories have one parent).
    pub fn on_rmdir_success(&self, parent: DirId, name: &str, child: &DirHandle) {
        self.on_forget(child.id());
        self.mutate(parent, |dc| dc.remove_pe(name, Some(child), false));
    }

    /// rename(oldparent, oldname, newparent, newname) succeeded. Order
    /// matters (§9 Open Questions, preserved verbatim): remove from the old
    /// name first (this adds an NE there), then remove any colliding PE
    /// already at the destination name (REDESIGN FLAG fix — the source
    /// leaves this as an unimplemented `TODO`), then add the moved PE under
    /// the new name.
    pub fn on_rename_success(
        &self,
        oldparent: DirId,
        oldname: &str,
        newparent: DirId,
        newname: &str,
        moved_child: Option<DirHandle>,
    ) {
        self.mutate(oldparent, |dc| dc.remove_pe(oldname, moved_child.as_ref(), false));
        self.mutate(newparent, |dc| dc.remove_pe_no_ne(newname));
        self.mutate(newparent, |dc| dc.add_pe(newname, moved_child).1);
    }

    // ---- C7 invalidation -------------------------------------------------

    /// Backend upcall (§4.7 item 1). Each of the three identities the event
    /// may carry is resolved independently; an id the host no longer knows
    /// (already forgotten) is dropped with a warning rather than treated as
    /// an error.
    pub fn on_upcall(&self, event: UpcallEvent) {
        if event.flags.contains(UpcallFlags::TIMES) && event.affected_is_dir {
            self.resolve_and_clear(event.gfid);
        }
        if let Some(parent) = event.parent_gfid {
            self.resolve_and_clear(parent);
        }
        if let Some(oldparent) = event.oldparent_gfid {
            self.resolve_and_clear(oldparent);
        }
        self.inner.metrics.record_invalidation();
    }

    fn resolve_and_clear(&self, id: DirId) {
        if self.inner.host.find(id).is_none() {
            log::warn!("dropping invalidation for unresolved directory {}", id);
            return;
        }
        self.clear_dir(id);
    }

    fn clear_dir(&self, dir: DirId) {
        if let Some(dc_arc) = self.inner.dirs.get(&dir) {
            let mut dc = dc_arc.lock();
            let freed = dc.clear();
            drop(dc);
            self.account_cleared(&freed);
        }
        if let Some((_, handle)) = self.inner.timers.remove(&dir) {
            self.inner.wheel.del(handle);
        }
        self.inner.lru.lock().pop(&dir);
    }

    /// Connectivity transition (§4.7 item 2): lazy wholesale invalidation via
    /// a single timestamp bump, no per-entry walk.
    pub fn on_connectivity(&self, _event: ConnEvent) {
        self.inner.last_disconnect_time.store(self.now().max(1), Ordering::Release);
    }

    /// Parent-down / shutdown (§4.7 item 3): disable the cache and eagerly
    /// drain every entry.
    pub fn on_parent_down(&self) {
        self.inner.enabled.store(false, Ordering::Release);
        self.clear_all();
    }

    fn clear_all(&self) {
        loop {
            let victim = self.inner.lru.lock().pop_lru().map(|(id, _)| id);
            let Some(victim) = victim else { break };
            self.clear_dir(victim);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::test_support::{make_handle, FakeInodeTable};
    use std::sync::Arc;
    use uuid::Uuid;

    fn dir(n: u128) -> DirId {
        DirId::from_uuid(Uuid::from_u128(n))
    }

    /// A step-able clock for tests that need to cross a TTL/disconnect
    /// boundary without racing a real `Instant` (which cannot be advanced).
    struct TestClock(AtomicU64);

    impl TestClock {
        fn new(start: u64) -> Arc<Self> {
            Arc::new(TestClock(AtomicU64::new(start)))
        }

        fn advance(&self, secs: u64) {
            self.0.fetch_add(secs, Ordering::Relaxed);
        }
    }

    impl Clock for TestClock {
        fn now_secs(&self) -> u64 {
            self.0.load(Ordering::Relaxed)
        }
    }

    async fn make_cache() -> NlCache {
        let host = Arc::new(FakeInodeTable::default());
        NlCache::new(NlCacheConfig::default(), host).unwrap()
    }

    #[tokio::test]
    async fn lookup_miss_seeds_ne_then_hits() {
        let cache = make_cache().await;
        let parent = dir(1);
        assert_eq!(cache.probe_lookup(parent, "foo"), LookupProbe::Miss);
        cache.note_lookup_enoent(parent, "foo");
        assert_eq!(cache.probe_lookup(parent, "foo"), LookupProbe::HitEnoent);
        assert_eq!(cache.metrics().nlc_hit, 1);
    }

    #[tokio::test]
    async fn create_promotes_ne_to_pe() {
        let cache = make_cache().await;
        let parent = dir(2);
        cache.note_lookup_enoent(parent, "foo");
        let child = make_handle(dir(20), false);
        cache.on_create_like_success(parent, "foo", child);
        let snap = cache.debug_dump_dir(parent).unwrap();
        assert!(snap.positive_entry_names.contains(&"foo".to_string()));
        assert!(!snap.negative_entry_names.contains(&"foo".to_string()));
    }

    #[tokio::test]
    async fn mkdir_marks_child_full() {
        let cache = make_cache().await;
        let parent = dir(3);
        let sub = make_handle(dir(30), true);
        cache.on_mkdir_success(parent, "sub", sub.clone());
        cache.mark_new_dir_full(sub.id());
        assert_eq!(cache.probe_lookup(sub.id(), "anything"), LookupProbe::HitEnoent);
    }

    #[tokio::test]
    async fn parent_down_disables_and_clears() {
        let cache = make_cache().await;
        let parent = dir(4);
        cache.note_lookup_enoent(parent, "foo");
        cache.on_parent_down();
        assert_eq!(cache.probe_lookup(parent, "foo"), LookupProbe::Miss);
    }

    #[tokio::test]
    async fn connectivity_event_lazily_invalidates() {
        let host = Arc::new(FakeInodeTable::default());
        let clock = TestClock::new(100);
        let cache = NlCache::new_with_clock(NlCacheConfig::default(), host, clock.clone()).unwrap();
        let parent = dir(5);

        cache.note_lookup_enoent(parent, "foo");
        assert_eq!(cache.probe_lookup(parent, "foo"), LookupProbe::HitEnoent);

        // Step past the moment `cache_time` was stamped so the connectivity
        // event's timestamp is strictly newer than it.
        clock.advance(1);
        cache.on_connectivity(ConnEvent::ChildDown);
        assert_eq!(cache.probe_lookup(parent, "foo"), LookupProbe::Miss);
    }
}
