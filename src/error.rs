//! Error types surfaced across the pool's public API.
//!
//! Only two failure modes ever leave the pool as an `Err`: a construction-time
//! arena allocation failure, and a factory failure on the overflow path.
//! Everything else the pool can go wrong in (an alien release, a duplicate
//! release, the free-index stack running out of nodes) is absorbed internally
//! and reported through counters or a `bool`, never through this type — see
//! `Pool::release`.

use std::error::Error as StdError;
use std::fmt;

/// Errors that can be returned from the pool's public operations.
#[derive(Debug)]
pub enum PoolError {
    /// The logical capacity passed to [`crate::Pool::new`] was zero.
    ///
    /// A zero-capacity pool would round up to an all-padding physical slot
    /// array (every bit permanently busy) and could never satisfy an acquire
    /// except through the factory overflow path, which defeats the point of
    /// having a pool at all.
    ZeroCapacity,

    /// The arena's backing allocation could not be obtained.
    ///
    /// Raised only at construction; fatal.
    ArenaAllocationFailure { requested_bytes: usize },

    /// The user-supplied factory failed while constructing an object, either
    /// during initial fill or on the overflow path.
    ///
    /// No pool state is perturbed when this is returned: no counters are
    /// incremented, no slot bit changes.
    FactoryFailure(Box<dyn StdError + Send + Sync>),
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroCapacity => write!(f, "pool capacity must be a positive integer"),
            Self::ArenaAllocationFailure { requested_bytes } => write!(
                f,
                "failed to allocate {requested_bytes} bytes for the pool arena"
            ),
            Self::FactoryFailure(cause) => write!(f, "object factory failed: {cause}"),
        }
    }
}

impl StdError for PoolError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::FactoryFailure(cause) => Some(cause.as_ref()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_does_not_panic() {
        let errs: Vec<PoolError> = vec![
            PoolError::ZeroCapacity,
            PoolError::ArenaAllocationFailure { requested_bytes: 128 },
            PoolError::FactoryFailure(Box::new(std::io::Error::new(
                std::io::ErrorKind::Other,
                "boom",
            ))),
        ];

        for err in errs {
            let rendered = err.to_string();
            assert!(!rendered.is_empty());
        }
    }

    #[test]
    fn factory_failure_exposes_source() {
        let cause = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err = PoolError::FactoryFailure(Box::new(cause));
        assert!(StdError::source(&err).is_some());
    }
}
