//! Pooled entry lifecycle: claim, proxy creation, termination, destroy

use std::backtrace::Backtrace;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::config::PoolConfiguration;
use crate::errors::{PoolError, PoolResult};

/// Process-wide switch armed when a session is reaped without a captured
/// borrower backtrace; the next proxy creation consumes it.
static CAPTURE_NEXT_BORROW_STACK: AtomicBool = AtomicBool::new(false);

/// Back-end capabilities a session must provide to be pooled.
///
/// One implementation per back-end driver. The pool only ever talks to the
/// session through [`PooledEntry`], which layers claim/lifecycle handling
/// on top of these hooks.
pub trait PooledSession: Send + Sync + Sized + 'static {
    /// The user-facing handle issued for a single borrow.
    type Proxy: Send;

    /// Produce a fresh proxy over the underlying session.
    ///
    /// Receives the owning entry so the proxy can call
    /// [`PooledEntry::fire_terminated`] when it is closed.
    fn build_proxy(&self, entry: &Arc<PooledEntry<Self>>) -> PoolResult<Self::Proxy>;

    /// Probe the underlying session for liveness before a proxy is issued.
    fn test_underlying(&self, test_query: Option<&str>) -> PoolResult<()>;

    /// Tear down the underlying session. `reap` is true when the session
    /// is being forcibly reclaimed while still in use.
    ///
    /// Must not call back into `fire_terminated`; the entry is locked for
    /// the duration of this call.
    fn close(&self, reap: bool);

    /// Whether the session has no outstanding proxy.
    ///
    /// Called during pool scans with pool-wide locks held; must be fast
    /// and must not block.
    fn is_available(&self) -> bool;

    /// Whether the session is already affiliated with the calling thread's
    /// unit of work and may be handed to it again.
    fn can_be_recycled_for_calling_thread(&self) -> bool {
        false
    }
}

/// Receives a notification whenever an entry's proxy is closed.
pub trait TerminationListener<S: PooledSession>: Send + Sync {
    fn on_session_terminated(&self, entry: &Arc<PooledEntry<S>>);
}

struct EntryMeta {
    last_acquired: Instant,
    last_released: Instant,
    leak_stack: Option<Backtrace>,
}

/// One pooled back-end session plus its lifecycle state.
///
/// An entry is *available* (no outstanding proxy), *claimed* (reserved by a
/// borrower via [`mark_as_being_acquired_if_available`]), *in use* (proxy
/// issued) or *destroyed*. The claim exists so that proxy construction,
/// which may perform back-end I/O, never runs under pool-wide locks.
///
/// [`mark_as_being_acquired_if_available`]: PooledEntry::mark_as_being_acquired_if_available
pub struct PooledEntry<S: PooledSession> {
    /// Self-handle so proxies and listeners can be given owning references.
    this: Weak<PooledEntry<S>>,
    id: u64,
    pool: Arc<str>,
    session: S,
    creation_time: Instant,
    max_lifetime: Option<Duration>,
    test_query: Option<String>,
    default_isolation_level: Option<i32>,
    destroyed: AtomicBool,
    /// Serialises proxy creation, destruction and listener firing.
    op: Mutex<()>,
    /// Claim monitor for the available -> claimed transition.
    being_acquired: Mutex<bool>,
    meta: Mutex<EntryMeta>,
    listeners: Mutex<Vec<Weak<dyn TerminationListener<S>>>>,
}

impl<S: PooledSession> PooledEntry<S> {
    pub(crate) fn new(id: u64, session: S, config: &PoolConfiguration) -> Arc<Self> {
        let now = Instant::now();
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            id,
            pool: config.unique_resource_name.as_str().into(),
            session,
            creation_time: now,
            max_lifetime: config.max_lifetime,
            test_query: config.test_query.clone(),
            default_isolation_level: config.default_isolation_level,
            destroyed: AtomicBool::new(false),
            op: Mutex::new(()),
            being_acquired: Mutex::new(false),
            meta: Mutex::new(EntryMeta {
                last_acquired: now,
                last_released: now,
                leak_stack: None,
            }),
            listeners: Mutex::new(Vec::new()),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// The wrapped back-end session.
    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn creation_time(&self) -> Instant {
        self.creation_time
    }

    pub fn last_time_acquired(&self) -> Instant {
        self.meta.lock().last_acquired
    }

    pub fn last_time_released(&self) -> Instant {
        self.meta.lock().last_released
    }

    /// Liveness probe string the pool was configured with.
    pub fn test_query(&self) -> Option<&str> {
        self.test_query.as_deref()
    }

    /// Isolation level new proxies should be set up with.
    pub fn default_isolation_level(&self) -> Option<i32> {
        self.default_isolation_level
    }

    /// Whether the session is available and the entry not destroyed.
    pub fn is_available(&self) -> bool {
        !self.destroyed.load(Ordering::SeqCst) && self.session.is_available()
    }

    pub fn can_be_recycled_for_calling_thread(&self) -> bool {
        !self.destroyed.load(Ordering::SeqCst) && self.session.can_be_recycled_for_calling_thread()
    }

    /// Atomically claim the entry iff it is available right now.
    ///
    /// At most one caller observes `true` until the claim is released by
    /// [`create_proxy`](PooledEntry::create_proxy) (on success or failure).
    /// Never blocks.
    pub fn mark_as_being_acquired_if_available(&self) -> bool {
        let mut claimed = self.being_acquired.lock();
        if *claimed {
            return false;
        }
        *claimed = self.is_available();
        *claimed
    }

    fn release_claim(&self) {
        *self.being_acquired.lock() = false;
    }

    /// Issue a proxy for the claimed entry.
    ///
    /// Updates the acquisition timestamp, probes the underlying session and
    /// asks it for a fresh proxy. The claim is released whether or not this
    /// succeeds; on failure the caller is expected to destroy the entry or
    /// leave it available.
    pub fn create_proxy(&self) -> PoolResult<S::Proxy> {
        let _op = self.op.lock();
        self.issue_proxy()
    }

    /// Recycle path: re-checks affinity under the entry lock, then issues a
    /// proxy exactly like a normal borrow.
    pub(crate) fn recycle_proxy(&self) -> PoolResult<Option<S::Proxy>> {
        let _op = self.op.lock();
        if !self.can_be_recycled_for_calling_thread() {
            return Ok(None);
        }
        self.issue_proxy().map(Some)
    }

    /// Proxy creation steps; entry `op` lock held by the caller.
    fn issue_proxy(&self) -> PoolResult<S::Proxy> {
        if self.destroyed.load(Ordering::SeqCst) {
            self.release_claim();
            return Err(PoolError::CreateSession(
                "session was already destroyed".into(),
            ));
        }
        let Some(this) = self.this.upgrade() else {
            self.release_claim();
            return Err(PoolError::Internal("pooled entry is no longer owned".into()));
        };
        if CAPTURE_NEXT_BORROW_STACK.swap(false, Ordering::SeqCst) {
            self.meta.lock().leak_stack = Some(Backtrace::force_capture());
        }
        self.meta.lock().last_acquired = Instant::now();
        if let Err(err) = self.session.test_underlying(self.test_query.as_deref()) {
            self.release_claim();
            return Err(err);
        }
        let proxy = match self.session.build_proxy(&this) {
            Ok(proxy) => proxy,
            Err(err) => {
                self.release_claim();
                return Err(err);
            }
        };
        self.release_claim();
        trace!(pool = %self.pool, entry = self.id, "issued session proxy");
        Ok(proxy)
    }

    /// Subscribe to proxy-close notifications. Listeners fire in
    /// registration order.
    pub fn register_listener(&self, listener: Weak<dyn TerminationListener<S>>) {
        self.listeners.lock().push(listener);
    }

    pub fn unregister_listener(&self, listener: &Weak<dyn TerminationListener<S>>) {
        self.listeners.lock().retain(|l| !l.ptr_eq(listener));
    }

    /// Called by the session's proxy when it is closed: notifies every
    /// registered listener in order, then records the release time.
    pub fn fire_terminated(&self) {
        let _op = self.op.lock();
        if let Some(this) = self.this.upgrade() {
            let listeners: Vec<_> = self.listeners.lock().clone();
            for listener in listeners {
                if let Some(listener) = listener.upgrade() {
                    listener.on_session_terminated(&this);
                }
            }
        }
        self.meta.lock().last_released = Instant::now();
    }

    /// Tear the entry down.
    ///
    /// With `reap` set the session is closed unconditionally and the
    /// captured borrower backtrace is logged (or capture is armed for the
    /// next reap). Without `reap`, a session that is currently in use is
    /// left alone so voluntary shrinking never tears down in-flight work.
    pub fn destroy(&self, reap: bool) {
        let _op = self.op.lock();
        if self.destroyed.load(Ordering::SeqCst) {
            return;
        }
        if reap {
            self.process_leak_stack();
        } else if !self.session.is_available() {
            return;
        }
        trace!(pool = %self.pool, entry = self.id, "destroying session");
        self.destroyed.store(true, Ordering::SeqCst);
        self.session.close(reap);
    }

    fn process_leak_stack(&self) {
        let stack = self.meta.lock().leak_stack.take();
        match stack {
            Some(stack) => {
                warn!(
                    pool = %self.pool,
                    entry = self.id,
                    "reaping session - the backtrace below shows where it was last borrowed"
                );
                warn!(pool = %self.pool, entry = self.id, backtrace = %stack, "last borrower");
            }
            None => {
                warn!(
                    pool = %self.pool,
                    entry = self.id,
                    "reaping session (collecting borrower backtraces for the next reap)"
                );
                CAPTURE_NEXT_BORROW_STACK.store(true, Ordering::SeqCst);
            }
        }
    }

    /// Whether the entry outlived the max-lifetime it was created with.
    pub fn max_lifetime_exceeded(&self) -> bool {
        match self.max_lifetime {
            Some(max_lifetime) => self.creation_time.elapsed() > max_lifetime,
            None => false,
        }
    }

    #[cfg(test)]
    pub(crate) fn has_leak_stack(&self) -> bool {
        self.meta.lock().leak_stack.is_some()
    }
}

#[cfg(test)]
pub(crate) fn leak_capture_armed() -> bool {
    CAPTURE_NEXT_BORROW_STACK.load(Ordering::SeqCst)
}

#[cfg(test)]
pub(crate) fn set_leak_capture(armed: bool) {
    CAPTURE_NEXT_BORROW_STACK.store(armed, Ordering::SeqCst);
}
