//! The host-side contract this cache needs from its surrounding filter
//! framework: an inode table that can resolve a [`DirId`] to a live
//! [`DirHandle`], and the handle type itself.
//!
//! The original translator stores its cache pointer and a child-to-parent
//! back-pointer in two opaque "inode context" slots owned by the host inode
//! table, manipulated under the inode's own lock. This crate re-expresses
//! that as ordinary `Arc` ownership: a `DirHandle` is just a cloneable,
//! reference-counted handle, and the cache keeps its own directory-identity
//! indexed table (see [`crate::cache::NlCache`]) instead of asking the host
//! to carry a pointer for it. See `DESIGN.md` for the rationale.

use std::fmt;
use std::sync::Arc;

use crate::ids::DirId;

/// Whatever a concrete host inode is made of. The cache only ever needs a
/// directory's identity and whether it is a directory.
pub trait HostInode: fmt::Debug + Send + Sync {
    fn dir_id(&self) -> DirId;
    fn is_dir(&self) -> bool;
}

/// A reference-counted, opaque handle to a directory (or, transiently, a
/// newly-created non-directory child) obtained from the host's inode table.
///
/// Cloning a `DirHandle` is the moral equivalent of the source's
/// `inode_ref()`; dropping the last clone is `inode_unref()`. There is no
/// explicit ref/unref API because `Arc` already gives us that for free.
#[derive(Clone)]
pub struct DirHandle(Arc<dyn HostInode>);

impl DirHandle {
    pub fn new(inode: Arc<dyn HostInode>) -> Self {
        DirHandle(inode)
    }

    pub fn id(&self) -> DirId {
        self.0.dir_id()
    }

    pub fn is_dir(&self) -> bool {
        self.0.is_dir()
    }
}

impl fmt::Debug for DirHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DirHandle").field(&self.0.dir_id()).finish()
    }
}

impl PartialEq for DirHandle {
    fn eq(&self, other: &Self) -> bool {
        self.0.dir_id() == other.0.dir_id()
    }
}

impl Eq for DirHandle {}

/// The subset of the host's inode table the invalidation handler needs: the
/// ability to resolve an opaque directory identity (a `gfid`, in the
/// original) back to a live handle. A lookup miss means the host no longer
/// knows about that directory (e.g. it was already forgotten); the caller
/// drops the event with a warning rather than treating it as an error.
pub trait InodeTable: Send + Sync {
    fn find(&self, id: DirId) -> Option<DirHandle>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use dashmap::DashMap;

    #[derive(Debug)]
    pub struct FakeInode {
        id: DirId,
        is_dir: bool,
    }

    impl HostInode for FakeInode {
        fn dir_id(&self) -> DirId {
            self.id
        }
        fn is_dir(&self) -> bool {
            self.is_dir
        }
    }

    pub fn make_handle(id: DirId, is_dir: bool) -> DirHandle {
        DirHandle::new(Arc::new(FakeInode { id, is_dir }))
    }

    #[derive(Default)]
    pub struct FakeInodeTable {
        handles: DashMap<DirId, DirHandle>,
    }

    impl FakeInodeTable {
        pub fn insert(&self, handle: DirHandle) {
            self.handles.insert(handle.id(), handle);
        }
    }

    impl InodeTable for FakeInodeTable {
        fn find(&self, id: DirId) -> Option<DirHandle> {
            self.handles.get(&id).map(|e| e.value().clone())
        }
    }
}
