//! Counters and gauges (§6, §10): a lock-free `Copy` snapshot read straight
//! off the underlying atomics, the same property the source gets from
//! `gf_atomic_t`.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Point-in-time snapshot of every counter/gauge in §6. `Copy` so callers can
/// stash it without holding anything open.
#[derive(Debug, Clone, Copy, Default)]
pub struct NlcMetricsSnapshot {
    pub nlc_hit: u64,
    pub nlc_miss: u64,
    pub getrealfilename_hit: u64,
    pub getrealfilename_miss: u64,
    pub nameless_lookup: u64,
    pub pe_inode_cnt: u64,
    pub ne_inode_cnt: u64,
    pub nlc_invals: u64,
    pub current_cache_size: u64,
    pub refd_inodes: u64,
    pub byte_cap: u64,
    pub inode_cap: u64,
}

/// The live atomics backing a [`NlcMetricsSnapshot`]. Owned by `NlCache`.
#[derive(Default)]
pub struct Metrics {
    nlc_hit: AtomicU64,
    nlc_miss: AtomicU64,
    getrealfilename_hit: AtomicU64,
    getrealfilename_miss: AtomicU64,
    nameless_lookup: AtomicU64,
    pe_inode_cnt: AtomicI64,
    ne_inode_cnt: AtomicI64,
    nlc_invals: AtomicU64,
    current_cache_size: AtomicI64,
    refd_inodes: AtomicI64,
}

impl Metrics {
    pub fn record_hit(&self) {
        self.nlc_hit.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.nlc_miss.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_realname_hit(&self) {
        self.getrealfilename_hit.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_realname_miss(&self) {
        self.getrealfilename_miss.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_nameless_lookup(&self) {
        self.nameless_lookup.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalidation(&self) {
        self.nlc_invals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_pe_count(&self, delta: i64) {
        self.pe_inode_cnt.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn add_ne_count(&self, delta: i64) {
        self.ne_inode_cnt.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn add_bytes(&self, delta: i64) {
        self.current_cache_size.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn add_refd_inodes(&self, delta: i64) {
        self.refd_inodes.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn current_bytes(&self) -> i64 {
        self.current_cache_size.load(Ordering::Relaxed)
    }

    pub fn current_refd_inodes(&self) -> i64 {
        self.refd_inodes.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self, byte_cap: usize, inode_cap: usize) -> NlcMetricsSnapshot {
        NlcMetricsSnapshot {
            nlc_hit: self.nlc_hit.load(Ordering::Relaxed),
            nlc_miss: self.nlc_miss.load(Ordering::Relaxed),
            getrealfilename_hit: self.getrealfilename_hit.load(Ordering::Relaxed),
            getrealfilename_miss: self.getrealfilename_miss.load(Ordering::Relaxed),
            nameless_lookup: self.nameless_lookup.load(Ordering::Relaxed),
            pe_inode_cnt: self.pe_inode_cnt.load(Ordering::Relaxed).max(0) as u64,
            ne_inode_cnt: self.ne_inode_cnt.load(Ordering::Relaxed).max(0) as u64,
            nlc_invals: self.nlc_invals.load(Ordering::Relaxed),
            current_cache_size: self.current_cache_size.load(Ordering::Relaxed).max(0) as u64,
            refd_inodes: self.refd_inodes.load(Ordering::Relaxed).max(0) as u64,
            byte_cap: byte_cap as u64,
            inode_cap: inode_cap as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let m = Metrics::default();
        m.record_hit();
        m.record_hit();
        m.record_miss();
        let snap = m.snapshot(1024, 16);
        assert_eq!(snap.nlc_hit, 2);
        assert_eq!(snap.nlc_miss, 1);
        assert_eq!(snap.byte_cap, 1024);
    }

    #[test]
    fn byte_and_refd_gauges_track_deltas() {
        let m = Metrics::default();
        m.add_bytes(100);
        m.add_bytes(-40);
        m.add_refd_inodes(3);
        m.add_refd_inodes(-1);
        let snap = m.snapshot(1024, 16);
        assert_eq!(snap.current_cache_size, 60);
        assert_eq!(snap.refd_inodes, 2);
    }
}
