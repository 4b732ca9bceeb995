//! A bounded, lock-free object pool.
//!
//! Objects are constructed once, up front, by a user-supplied factory and
//! recycled afterward; `acquire`/`release` never allocate or block on the
//! hot path. Free/busy state lives in a dense availability bitmap so a free
//! slot can always be found by a trailing-zero bit scan, and a small
//! Treiber-stack free-index hint short-circuits the common
//! just-returned-slot case to a single CAS.
//!
//! ```
//! use slotpool::Pool;
//!
//! let pool = Pool::new(4, || Ok::<_, slotpool::PoolError>(String::new())).unwrap();
//! let mut obj = pool.acquire().unwrap();
//! obj.push_str("hello");
//! pool.release(obj);
//! ```
//!
//! The pool does not grow or shrink after construction, does not call
//! destructors between reuses, and does not persist anything to disk. See
//! `SPEC_FULL.md` in this crate's repository for the full design.

mod arena;
mod bitmap;
mod error;
mod pool;
mod stack;

pub use error::PoolError;
pub use pool::{Pool, PoolObject, PoolSnapshot};
