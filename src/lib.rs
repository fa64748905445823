//! # session-pool
//!
//! Thread-safe pool of expensive, reusable back-end sessions (database or
//! transactional resource connections) multiplexed across many concurrent
//! borrowers.
//!
//! ## Features
//!
//! - Bounded growth with a race-free claim protocol: proxy construction
//!   never blocks other borrowers from scanning the pool
//! - Fair-enough waiting: blocked borrowers are woken one at a time as
//!   sessions are returned, bounded by a borrow timeout
//! - Unit-of-work affinity: a session already enlisted with the calling
//!   thread can be handed to it again, bypassing the availability scan
//! - Background maintenance: leak reaping with borrower backtraces,
//!   max-lifetime eviction, min-size top-up and idle shrinking
//! - Pluggable back ends through the [`PooledSession`] capability trait
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicBool, Ordering};
//! use session_pool::{PoolConfiguration, PoolResult, PooledEntry, PooledSession, SessionPool};
//!
//! struct Session {
//!     busy: AtomicBool,
//! }
//!
//! /// Handle given out per borrow; closing it returns the session.
//! struct Handle(Arc<PooledEntry<Session>>);
//!
//! impl Drop for Handle {
//!     fn drop(&mut self) {
//!         self.0.session().busy.store(false, Ordering::SeqCst);
//!         self.0.fire_terminated();
//!     }
//! }
//!
//! impl PooledSession for Session {
//!     type Proxy = Handle;
//!
//!     fn build_proxy(&self, entry: &Arc<PooledEntry<Self>>) -> PoolResult<Handle> {
//!         self.busy.store(true, Ordering::SeqCst);
//!         Ok(Handle(Arc::clone(entry)))
//!     }
//!
//!     fn test_underlying(&self, _test_query: Option<&str>) -> PoolResult<()> {
//!         Ok(())
//!     }
//!
//!     fn close(&self, _reap: bool) {}
//!
//!     fn is_available(&self) -> bool {
//!         !self.busy.load(Ordering::SeqCst)
//!     }
//! }
//!
//! # fn main() -> session_pool::PoolResult<()> {
//! let pool = SessionPool::new(
//!     PoolConfiguration::new("demo").with_min_pool_size(1).with_max_pool_size(4),
//!     || Ok(Session { busy: AtomicBool::new(false) }),
//! )?;
//!
//! let handle = pool.borrow()?;
//! drop(handle); // session goes back to the pool
//! assert_eq!(pool.total_size(), 1);
//!
//! pool.destroy();
//! # Ok(())
//! # }
//! ```

mod config;
mod entry;
mod errors;
mod maintenance;
mod pool;

#[cfg(test)]
pub(crate) mod test_util;

pub use config::PoolConfiguration;
pub use entry::{PooledEntry, PooledSession, TerminationListener};
pub use errors::{PoolError, PoolResult};
pub use pool::{SessionFactory, SessionPool};
