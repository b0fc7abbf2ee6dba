//! Event vocabulary consumed by the invalidation handler (C7): backend
//! upcalls, connectivity transitions, and the parent-down shutdown signal.
//! Field names and the flag bits mirror `nlc_invalidate`/`nlc_notify` in
//! `nl-cache.c`.

use crate::ids::DirId;

/// Which parts of an inode an upcall says changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpcallFlags(u32);

impl UpcallFlags {
    /// Attribute/timestamp change on the affected inode.
    pub const TIMES: UpcallFlags = UpcallFlags(0b01);
    /// The dentry relationship to its parent changed (rename/unlink/link).
    pub const PARENT_DENTRY: UpcallFlags = UpcallFlags(0b10);

    pub const fn empty() -> Self {
        UpcallFlags(0)
    }

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

impl std::ops::BitOr for UpcallFlags {
    type Output = UpcallFlags;
    fn bitor(self, rhs: Self) -> Self {
        UpcallFlags(self.0 | rhs.0)
    }
}

/// A single upcall record from the backend, opaque to the cache beyond the
/// fields it inspects (§4.7 item 1).
#[derive(Debug, Clone, Copy)]
pub struct UpcallEvent {
    pub gfid: DirId,
    pub affected_is_dir: bool,
    pub flags: UpcallFlags,
    pub parent_gfid: Option<DirId>,
    pub oldparent_gfid: Option<DirId>,
}

/// Connectivity transitions (§4.7 item 2): any of these bumps
/// `last_disconnect_time`, lazily invalidating every `DirCache` on its next
/// probe rather than walking the cache table eagerly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnEvent {
    ChildUp,
    ChildDown,
    DescendentUp,
    DescendentDown,
}
