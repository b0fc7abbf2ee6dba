//! Cache configuration (§6, §10): the recognized options, their documented
//! defaults, and a small builder in the spirit of `DavConfig`/
//! `DavHandler::builder()`.

use std::time::Duration;

use crate::error::{NlcError, NlcResult};

/// Default `nl-cache-timeout`: 60 seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
/// Default `nl-cache-limit`: 128 KiB.
pub const DEFAULT_BYTE_CAP: usize = 131_072;
/// The source has no separate inode cap option; this crate adds one so
/// `refd_inodes` can be bounded independently of raw bytes. A cap of zero
/// would make every cache a no-op, so it defaults generously.
pub const DEFAULT_INODE_CAP: usize = 16_384;

/// Recognized configuration, matching the option table in §6.
#[derive(Debug, Clone, Copy)]
pub struct NlCacheConfig {
    /// `nl-cache-positive-entry`.
    pub positive_entry: bool,
    /// `nl-cache-limit`, in bytes.
    pub byte_cap: usize,
    /// Cap on `refd_inodes` enforced alongside `byte_cap` by `lru_prune`.
    pub inode_cap: usize,
    /// `nl-cache-timeout`.
    pub timeout: Duration,
    /// `pass-through`.
    pub pass_through: bool,
}

impl Default for NlCacheConfig {
    fn default() -> Self {
        NlCacheConfig {
            positive_entry: false,
            byte_cap: DEFAULT_BYTE_CAP,
            inode_cap: DEFAULT_INODE_CAP,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            pass_through: false,
        }
    }
}

impl NlCacheConfig {
    pub fn builder() -> NlCacheConfigBuilder {
        NlCacheConfigBuilder::default()
    }

    /// Reject configurations that could never cache anything (§7: these are
    /// the only inputs this crate treats as hard configuration errors).
    pub(crate) fn validate(&self) -> NlcResult<()> {
        if self.timeout.is_zero() {
            return Err(NlcError::ZeroTimeout);
        }
        if self.byte_cap == 0 || self.inode_cap == 0 {
            return Err(NlcError::ZeroCap);
        }
        Ok(())
    }
}

/// Builder for [`NlCacheConfig`]. Every setter takes `self` by value so calls
/// chain the way `DavConfig`'s do.
#[derive(Debug, Clone, Copy, Default)]
pub struct NlCacheConfigBuilder {
    cfg: NlCacheConfig,
}

impl NlCacheConfigBuilder {
    pub fn positive_entry(mut self, enabled: bool) -> Self {
        self.cfg.positive_entry = enabled;
        self
    }

    pub fn byte_cap(mut self, bytes: usize) -> Self {
        self.cfg.byte_cap = bytes;
        self
    }

    pub fn inode_cap(mut self, count: usize) -> Self {
        self.cfg.inode_cap = count;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.cfg.timeout = timeout;
        self
    }

    pub fn pass_through(mut self, enabled: bool) -> Self {
        self.cfg.pass_through = enabled;
        self
    }

    pub fn build(self) -> NlcResult<NlCacheConfig> {
        self.cfg.validate()?;
        Ok(self.cfg)
    }
}
