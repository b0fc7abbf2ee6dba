use std::error::Error as StdError;
use std::fmt;

/// Errors that can occur at the crate's few fallible boundary points.
///
/// The cache itself never fails a FOP because of its own bookkeeping (see
/// the crate-level docs); this type only covers configuration mistakes and
/// is never returned from the hot lookup/mutation paths.
#[derive(Debug)]
pub enum NlcError {
    /// `cache_timeout` was zero; a zero TTL can never produce a valid cache.
    ZeroTimeout,
    /// `byte_cap` or `inode_cap` was zero; nothing could ever be cached.
    ZeroCap,
    /// The timer wheel's background ticker could not be started.
    TimerInit(std::io::Error),
}

impl fmt::Display for NlcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NlcError::ZeroTimeout => write!(f, "nl-cache-timeout must be greater than zero"),
            NlcError::ZeroCap => write!(f, "nl-cache-limit and inode cap must be greater than zero"),
            NlcError::TimerInit(e) => write!(f, "failed to start the timer wheel: {}", e),
        }
    }
}

impl StdError for NlcError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            NlcError::TimerInit(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for NlcError {
    fn from(e: std::io::Error) -> Self {
        NlcError::TimerInit(e)
    }
}

pub type NlcResult<T> = std::result::Result<T, NlcError>;
