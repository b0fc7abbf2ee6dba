//! `nlcache`: a negative-lookup cache for virtual filesystem backends.
//!
//! Sits between a client-facing virtual filesystem and its backend,
//! answering "does this name exist under this directory" from memory for
//! names the backend has already told it don't exist (or, when positive
//! caching is enabled, confirming names that do). Built for workloads that
//! issue many `stat`-then-`create` probes against the same directories —
//! the cache turns repeat ENOENT round-trips into an in-memory answer.
//!
//! ```ignore
//! let host: Arc<dyn InodeTable> = Arc::new(MyInodeTable::new());
//! let cache = NlCache::new(NlCacheConfig::default(), host)?;
//! let interceptor = CachingInterceptor::new(cache, MyBackend::new());
//! let child = interceptor.lookup(&parent, "some-file").await?;
//! ```
//!
//! The cache is advisory: a miss is never an error, and every inconsistency
//! window around concurrent mutation resolves to "evict and ask the backend
//! again". See `DESIGN.md` for the grounding of each module and the
//! decisions behind a handful of open questions inherited from the system
//! this crate's design is distilled from.

mod backend;
mod cache;
mod conf;
mod dircache;
mod entry;
mod error;
mod host;
mod ids;
mod interceptor;
mod metrics;
mod timer_wheel;
mod upcall;

pub use backend::{Backend, BackendError, BackendResult, UnlinkReply};
pub use cache::{DirCacheSnapshot, LookupProbe, NlCache, RealNameProbe};
pub use conf::{NlCacheConfig, NlCacheConfigBuilder, DEFAULT_BYTE_CAP, DEFAULT_INODE_CAP, DEFAULT_TIMEOUT_SECS};
pub use entry::DirState;
pub use error::{NlcError, NlcResult};
pub use host::{DirHandle, HostInode, InodeTable};
pub use ids::DirId;
pub use interceptor::CachingInterceptor;
pub use metrics::NlcMetricsSnapshot;
pub use upcall::{ConnEvent, UpcallEvent, UpcallFlags};
