//! The pluggable backend the FOP interceptors (C6) wrap. This is the
//! "next layer" the source winds a FOP down to; the cache only needs to
//! know whether a call succeeded, failed with ENOENT, or failed some other
//! way, and — for `unlink` — how many links the removed name's inode had
//! left, per the mutation table in §4.6.
//!
//! Modeled as native `async fn`s in a trait (no `async-trait` dependency —
//! nothing in this pack reaches for it) the same way the teacher's own
//! `DavFileSystem` is an async trait object the handler wraps.

use std::fmt;

use crate::host::DirHandle;

/// A backend-reported failure. The interceptor only ever branches on
/// [`BackendError::is_enoent`]; everything else propagates unchanged.
#[derive(Debug)]
pub struct BackendError {
    enoent: bool,
    message: String,
}

impl BackendError {
    pub fn enoent(message: impl Into<String>) -> Self {
        BackendError { enoent: true, message: message.into() }
    }

    pub fn other(message: impl Into<String>) -> Self {
        BackendError { enoent: false, message: message.into() }
    }

    pub fn is_enoent(&self) -> bool {
        self.enoent
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for BackendError {}

pub type BackendResult<T> = Result<T, BackendError>;

/// Reply to a successful `unlink`. `link_count` is `None` when the backend
/// cannot report it, in which case §9's Open Questions decision applies: the
/// interceptor performs no cache mutation at all.
#[derive(Debug, Clone, Copy)]
pub struct UnlinkReply {
    pub link_count: Option<u32>,
}

/// The filesystem operations the cache needs to observe. `parent`/`dir`
/// arguments are [`DirHandle`]s already resolved by the host; this trait
/// never does its own name resolution.
pub trait Backend: Send + Sync {
    /// Look up `name` under `parent`. `Ok(None)` means the backend
    /// affirmatively reports the name absent (ENOENT, modeled as `Ok(None)`
    /// rather than `Err` since it is the cache's single most common expected
    /// outcome, not a failure).
    fn lookup(
        &self,
        parent: &DirHandle,
        name: &str,
    ) -> impl std::future::Future<Output = BackendResult<Option<DirHandle>>> + Send;

    fn get_real_filename(
        &self,
        dir: &DirHandle,
        fname: &str,
    ) -> impl std::future::Future<Output = BackendResult<Option<String>>> + Send;

    fn mkdir(
        &self,
        parent: &DirHandle,
        name: &str,
    ) -> impl std::future::Future<Output = BackendResult<DirHandle>> + Send;

    fn mknod(
        &self,
        parent: &DirHandle,
        name: &str,
    ) -> impl std::future::Future<Output = BackendResult<DirHandle>> + Send;

    fn create(
        &self,
        parent: &DirHandle,
        name: &str,
    ) -> impl std::future::Future<Output = BackendResult<DirHandle>> + Send;

    fn symlink(
        &self,
        parent: &DirHandle,
        name: &str,
        target: &str,
    ) -> impl std::future::Future<Output = BackendResult<DirHandle>> + Send;

    /// `link(existing, newparent, newname)`. No new child is created; the
    /// cache records a name-only PE (§4.6: `link` never installs a
    /// back-pointer).
    fn link(
        &self,
        existing: &DirHandle,
        newparent: &DirHandle,
        newname: &str,
    ) -> impl std::future::Future<Output = BackendResult<()>> + Send;

    fn unlink(
        &self,
        parent: &DirHandle,
        name: &str,
    ) -> impl std::future::Future<Output = BackendResult<UnlinkReply>> + Send;

    fn rmdir(
        &self,
        parent: &DirHandle,
        name: &str,
    ) -> impl std::future::Future<Output = BackendResult<()>> + Send;

    fn rename(
        &self,
        oldparent: &DirHandle,
        oldname: &str,
        newparent: &DirHandle,
        newname: &str,
    ) -> impl std::future::Future<Output = BackendResult<()>> + Send;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::host::test_support::make_handle;
    use crate::ids::DirId;
    use dashmap::DashMap;
    use parking_lot::Mutex;
    use uuid::Uuid;

    /// An in-memory backend for integration tests: a flat `(parent, name) ->
    /// child` table plus a link-count table, with no real directory nesting
    /// semantics beyond what the tests need.
    #[derive(Default)]
    pub struct FakeBackend {
        entries: DashMap<(DirId, String), DirHandle>,
        link_counts: DashMap<DirId, u32>,
        next_id: Mutex<u128>,
    }

    impl FakeBackend {
        pub fn new() -> Self {
            Self::default()
        }

        fn fresh_handle(&self, is_dir: bool) -> DirHandle {
            let mut guard = self.next_id.lock();
            *guard += 1;
            make_handle(DirId::from_uuid(Uuid::from_u128(*guard)), is_dir)
        }

        pub fn seed(&self, parent: &DirHandle, name: &str, child: DirHandle) {
            self.entries.insert((parent.id(), name.to_string()), child);
        }

        pub fn set_link_count(&self, child: &DirHandle, count: u32) {
            self.link_counts.insert(child.id(), count);
        }
    }

    impl Backend for FakeBackend {
        async fn lookup(&self, parent: &DirHandle, name: &str) -> BackendResult<Option<DirHandle>> {
            Ok(self.entries.get(&(parent.id(), name.to_string())).map(|e| e.value().clone()))
        }

        async fn get_real_filename(&self, dir: &DirHandle, fname: &str) -> BackendResult<Option<String>> {
            let hit = self
                .entries
                .iter()
                .find(|e| e.key().0 == dir.id() && e.key().1.eq_ignore_ascii_case(fname))
                .map(|e| e.key().1.clone());
            Ok(hit)
        }

        async fn mkdir(&self, parent: &DirHandle, name: &str) -> BackendResult<DirHandle> {
            let h = self.fresh_handle(true);
            self.seed(parent, name, h.clone());
            Ok(h)
        }

        async fn mknod(&self, parent: &DirHandle, name: &str) -> BackendResult<DirHandle> {
            let h = self.fresh_handle(false);
            self.seed(parent, name, h.clone());
            Ok(h)
        }

        async fn create(&self, parent: &DirHandle, name: &str) -> BackendResult<DirHandle> {
            self.mknod(parent, name).await
        }

        async fn symlink(&self, parent: &DirHandle, name: &str, _target: &str) -> BackendResult<DirHandle> {
            self.mknod(parent, name).await
        }

        async fn link(&self, existing: &DirHandle, newparent: &DirHandle, newname: &str) -> BackendResult<()> {
            self.seed(newparent, newname, existing.clone());
            let count = self.link_counts.entry(existing.id()).or_insert(1);
            *count += 1;
            Ok(())
        }

        async fn unlink(&self, parent: &DirHandle, name: &str) -> BackendResult<UnlinkReply> {
            match self.entries.remove(&(parent.id(), name.to_string())) {
                Some((_, child)) => {
                    let remaining = self.link_counts.get(&child.id()).map(|c| *c - 1);
                    if let Some(r) = remaining {
                        self.link_counts.insert(child.id(), r);
                    }
                    Ok(UnlinkReply { link_count: remaining })
                }
                None => Err(BackendError::enoent(name.to_string())),
            }
        }

        async fn rmdir(&self, parent: &DirHandle, name: &str) -> BackendResult<()> {
            self.entries
                .remove(&(parent.id(), name.to_string()))
                .map(|_| ())
                .ok_or_else(|| BackendError::enoent(name.to_string()))
        }

        async fn rename(
            &self,
            oldparent: &DirHandle,
            oldname: &str,
            newparent: &DirHandle,
            newname: &str,
        ) -> BackendResult<()> {
            let (_, child) = self
                .entries
                .remove(&(oldparent.id(), oldname.to_string()))
                .ok_or_else(|| BackendError::enoent(oldname.to_string()))?;
            self.entries.insert((newparent.id(), newname.to_string()), child);
            Ok(())
        }
    }
}
