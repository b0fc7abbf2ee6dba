//! FOP interceptors (C6): the probe template for `lookup`/`getxattr`, and
//! the mutation template for the dentry-changing FOPs, wrapping a pluggable
//! [`Backend`] the same way `DavHandler` wraps a `DavFileSystem`.

use crate::backend::{Backend, BackendResult};
use crate::cache::{LookupProbe, NlCache, RealNameProbe};
use crate::host::DirHandle;

/// Wraps a [`Backend`] with cache probing/mutation. This is the type a host
/// actually calls into per-FOP; it owns no state of its own beyond the
/// cache handle and the backend it forwards to.
pub struct CachingInterceptor<B> {
    cache: NlCache,
    backend: B,
}

impl<B: Backend> CachingInterceptor<B> {
    pub fn new(cache: NlCache, backend: B) -> Self {
        CachingInterceptor { cache, backend }
    }

    pub fn cache(&self) -> &NlCache {
        &self.cache
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// `lookup(parent, name)`, given the host's own inode table does *not*
    /// already have `name` cached positive (that case bypasses the cache
    /// entirely and is the caller's responsibility to check first, since it
    /// lives in host territory this crate has no access to).
    pub async fn lookup(&self, parent: &DirHandle, name: &str) -> BackendResult<Option<DirHandle>> {
        if let LookupProbe::HitEnoent = self.cache.probe_lookup(parent.id(), name) {
            return Ok(None);
        }
        let result = self.backend.lookup(parent, name).await?;
        if result.is_none() {
            self.cache.note_lookup_enoent(parent.id(), name);
        }
        Ok(result)
    }

    /// `getxattr(dir, "get_real_filename:<fname>")`.
    pub async fn get_real_filename(&self, dir: &DirHandle, fname: &str) -> BackendResult<Option<String>> {
        match self.cache.probe_real_filename(dir.id(), fname) {
            RealNameProbe::Hit(name) => Ok(Some(name)),
            RealNameProbe::HitEnoent => Ok(None),
            RealNameProbe::Forward => self.backend.get_real_filename(dir, fname).await,
        }
    }

    pub async fn mkdir(&self, parent: &DirHandle, name: &str) -> BackendResult<DirHandle> {
        let new_dir = self.backend.mkdir(parent, name).await?;
        self.cache.on_mkdir_success(parent.id(), name, new_dir.clone());
        self.cache.mark_new_dir_full(new_dir.id());
        Ok(new_dir)
    }

    pub async fn mknod(&self, parent: &DirHandle, name: &str) -> BackendResult<DirHandle> {
        let child = self.backend.mknod(parent, name).await?;
        self.cache.on_create_like_success(parent.id(), name, child.clone());
        Ok(child)
    }

    pub async fn create(&self, parent: &DirHandle, name: &str) -> BackendResult<DirHandle> {
        let child = self.backend.create(parent, name).await?;
        self.cache.on_create_like_success(parent.id(), name, child.clone());
        Ok(child)
    }

    pub async fn symlink(&self, parent: &DirHandle, name: &str, target: &str) -> BackendResult<DirHandle> {
        let child = self.backend.symlink(parent, name, target).await?;
        self.cache.on_create_like_success(parent.id(), name, child.clone());
        Ok(child)
    }

    /// `link` never captures the child handle into the cache (§4.6): the PE
    /// it installs is name-only.
    pub async fn link(&self, existing: &DirHandle, newparent: &DirHandle, newname: &str) -> BackendResult<()> {
        self.backend.link(existing, newparent, newname).await?;
        self.cache.on_link_success(newparent.id(), newname);
        Ok(())
    }

    pub async fn unlink(&self, parent: &DirHandle, name: &str, child: &DirHandle) -> BackendResult<()> {
        let reply = self.backend.unlink(parent, name).await?;
        self.cache.on_unlink_success(parent.id(), name, child, reply.link_count);
        Ok(())
    }

    pub async fn rmdir(&self, parent: &DirHandle, name: &str, child: &DirHandle) -> BackendResult<()> {
        self.backend.rmdir(parent, name).await?;
        self.cache.on_rmdir_success(parent.id(), name, child);
        Ok(())
    }

    pub async fn rename(
        &self,
        oldparent: &DirHandle,
        oldname: &str,
        newparent: &DirHandle,
        newname: &str,
        moved_child: Option<DirHandle>,
    ) -> BackendResult<()> {
        self.backend.rename(oldparent, oldname, newparent, newname).await?;
        self.cache
            .on_rename_success(oldparent.id(), oldname, newparent.id(), newname, moved_child);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::test_support::FakeBackend;
    use crate::conf::NlCacheConfig;
    use crate::host::test_support::{make_handle, FakeInodeTable};
    use crate::ids::DirId;
    use std::sync::Arc;
    use uuid::Uuid;

    fn dir(n: u128) -> DirId {
        DirId::from_uuid(Uuid::from_u128(n))
    }

    async fn make_interceptor() -> CachingInterceptor<FakeBackend> {
        let host = Arc::new(FakeInodeTable::default());
        let cache = NlCache::new(NlCacheConfig::default(), host).unwrap();
        CachingInterceptor::new(cache, FakeBackend::new())
    }

    #[tokio::test]
    async fn lookup_miss_then_hit_short_circuits() {
        let ic = make_interceptor().await;
        let parent = make_handle(dir(1), true);
        assert!(ic.lookup(&parent, "missing").await.unwrap().is_none());
        // Second lookup should be answered from the NE without reaching the
        // (empty) backend again — observable only via the metrics count.
        assert!(ic.lookup(&parent, "missing").await.unwrap().is_none());
        assert_eq!(ic.cache().metrics().nlc_hit, 1);
    }

    #[tokio::test]
    async fn create_after_miss_promotes_and_lookup_finds_it() {
        let ic = make_interceptor().await;
        let parent = make_handle(dir(2), true);
        assert!(ic.lookup(&parent, "foo").await.unwrap().is_none());
        let child = ic.create(&parent, "foo").await.unwrap();
        ic.backend().seed(&parent, "foo", child.clone());
        let found = ic.lookup(&parent, "foo").await.unwrap();
        assert_eq!(found.map(|h| h.id()), Some(child.id()));
    }

    #[tokio::test]
    async fn mkdir_then_lookup_in_new_dir_is_negative() {
        let ic = make_interceptor().await;
        let parent = make_handle(dir(3), true);
        let sub = ic.mkdir(&parent, "sub").await.unwrap();
        assert!(ic.lookup(&sub, "anything").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unlink_without_link_count_forwards_without_mutation() {
        let ic = make_interceptor().await;
        let parent = make_handle(dir(4), true);
        let child = ic.create(&parent, "foo").await.unwrap();
        // Force link_count reporting off by not seeding one; FakeBackend
        // reports Some(0) after a first unlink, so call unlink directly
        // through the cache API with None to exercise the no-mutation path.
        ic.cache().on_unlink_success(parent.id(), "foo", &child, None);
        // No NE should have been recorded: a subsequent lookup still misses
        // cleanly (forwarded) rather than short-circuiting from a stray NE.
        assert_eq!(ic.cache().probe_lookup(parent.id(), "foo"), crate::cache::LookupProbe::Miss);
    }
}
