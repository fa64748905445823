//! Session pool: borrow/return protocol, growth, destroy and refresh

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, trace, warn};

use crate::config::PoolConfiguration;
use crate::entry::{PooledEntry, PooledSession, TerminationListener};
use crate::errors::{PoolError, PoolResult};
use crate::maintenance::MaintenanceTask;

/// Opens raw back-end sessions on behalf of the pool.
///
/// Implemented automatically for `Fn() -> PoolResult<S>` closures.
pub trait SessionFactory<S: PooledSession>: Send + Sync + 'static {
    fn create_session(&self) -> PoolResult<S>;
}

impl<S, F> SessionFactory<S> for F
where
    S: PooledSession,
    F: Fn() -> PoolResult<S> + Send + Sync + 'static,
{
    fn create_session(&self) -> PoolResult<S> {
        self()
    }
}

struct PoolState<S: PooledSession> {
    entries: Vec<Arc<PooledEntry<S>>>,
    destroyed: bool,
}

pub(crate) struct PoolInner<S: PooledSession> {
    /// Self-handle registered (non-owningly) as termination listener on
    /// every entry.
    this: Weak<PoolInner<S>>,
    name: String,
    config: PoolConfiguration,
    factory: Box<dyn SessionFactory<S>>,
    state: Mutex<PoolState<S>>,
    available: Condvar,
    next_entry_id: AtomicU64,
    maintenance: Mutex<Option<MaintenanceTask>>,
}

/// Thread-safe pool of reusable back-end sessions.
///
/// Borrowers first get a chance to recycle a session already affiliated
/// with their unit of work, then claim the oldest available entry, then
/// grow the pool up to `max_pool_size`, and finally wait for a session to
/// be returned, bounded by `borrow_timeout`. A background task reaps
/// leaked sessions and keeps the pool between its configured bounds.
///
/// Cloning is cheap; all clones drive the same pool.
pub struct SessionPool<S: PooledSession> {
    inner: Arc<PoolInner<S>>,
}

impl<S: PooledSession> Clone for SessionPool<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: PooledSession> SessionPool<S> {
    /// Create a pool, establish the initial `min_pool_size` sessions and
    /// start the maintenance task.
    ///
    /// Initial sessions that cannot be established are skipped with a log
    /// line; the maintenance task keeps retrying the top-up, so a pool can
    /// start degraded and heal once the back end comes up.
    pub fn new<F: SessionFactory<S>>(config: PoolConfiguration, factory: F) -> PoolResult<Self> {
        config.validate()?;
        let name = config.unique_resource_name.clone();
        trace!(pool = %name, "initializing");

        let inner = Arc::new_cyclic(|this| PoolInner {
            this: this.clone(),
            name,
            config,
            factory: Box::new(factory),
            state: Mutex::new(PoolState {
                entries: Vec::new(),
                destroyed: false,
            }),
            available: Condvar::new(),
            next_entry_id: AtomicU64::new(0),
            maintenance: Mutex::new(None),
        });

        {
            let mut state = inner.state.lock();
            inner.add_sessions_up_to_min(&mut state);
        }
        let task = MaintenanceTask::start(
            Arc::downgrade(&inner),
            inner.config.maintenance_interval,
        );
        *inner.maintenance.lock() = Some(task);

        Ok(Self { inner })
    }

    /// The configured `unique_resource_name`.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Borrow a session proxy from the pool.
    ///
    /// Fails with [`PoolError::Destroyed`] after [`destroy`](Self::destroy)
    /// and with [`PoolError::Exhausted`] when no session became available
    /// within `borrow_timeout`.
    pub fn borrow(&self) -> PoolResult<S::Proxy> {
        self.inner.assert_not_destroyed()?;
        if let Some(proxy) = self.inner.recycle_for_calling_thread() {
            return Ok(proxy);
        }
        self.inner.find_or_wait_for_available()
    }

    /// Destroy the pool: close every pooled session, stop maintenance and
    /// fail all pending and future borrows. Idempotent.
    pub fn destroy(&self) {
        self.inner.destroy();
    }

    /// Destroy every currently available session and top the pool back up
    /// to `min_pool_size`. Sessions in use are left alone.
    pub fn refresh(&self) {
        self.inner.refresh();
    }

    /// Number of sessions currently available for borrowing.
    pub fn available_size(&self) -> usize {
        self.inner.available_size()
    }

    /// Total number of pooled sessions in any state.
    pub fn total_size(&self) -> usize {
        self.inner.total_size()
    }
}

impl<S: PooledSession> PoolInner<S> {
    fn assert_not_destroyed(&self) -> PoolResult<()> {
        if self.state.lock().destroyed {
            return Err(PoolError::Destroyed);
        }
        Ok(())
    }

    /// Hand the caller a session already affiliated with its unit of work,
    /// if one exists. Failures here are logged and swallowed; the borrower
    /// falls through to normal acquisition.
    fn recycle_for_calling_thread(&self) -> Option<S::Proxy> {
        let candidate = {
            let state = self.state.lock();
            if state.destroyed {
                return None;
            }
            state
                .entries
                .iter()
                .find(|e| e.can_be_recycled_for_calling_thread())
                .cloned()
        };
        let entry = candidate?;
        match entry.recycle_proxy() {
            Ok(proxy) => proxy,
            Err(err) => {
                debug!(
                    pool = %self.name,
                    entry = entry.id(),
                    error = %err,
                    "error while trying to recycle"
                );
                None
            }
        }
    }

    fn find_or_wait_for_available(&self) -> PoolResult<S::Proxy> {
        let mut remaining = self.config.borrow_timeout;
        loop {
            if let Some(proxy) = self.claim_available_or_grow() {
                return Ok(proxy);
            }
            remaining = self.wait_for_at_least_one_available(remaining)?;
            self.assert_not_destroyed()?;
        }
    }

    fn claim_available_or_grow(&self) -> Option<S::Proxy> {
        if let Some(proxy) = self.try_claim_first_available() {
            return Some(proxy);
        }
        if self.grow() {
            return self.try_claim_first_available();
        }
        None
    }

    /// Claim the oldest available entry and turn it into a proxy. Entries
    /// whose proxy creation fails are removed and destroyed, and the scan
    /// starts over.
    fn try_claim_first_available(&self) -> Option<S::Proxy> {
        loop {
            let claimed = {
                let state = self.state.lock();
                state
                    .entries
                    .iter()
                    .find(|e| e.mark_as_being_acquired_if_available())
                    .cloned()
            };
            let entry = claimed?;
            match entry.create_proxy() {
                Ok(proxy) => {
                    self.log_current_size();
                    return Some(proxy);
                }
                Err(err) => {
                    debug!(
                        pool = %self.name,
                        entry = entry.id(),
                        error = %err,
                        "failed to create session proxy"
                    );
                    self.remove_and_destroy(&entry);
                }
            }
        }
    }

    /// Grow the pool by one entry if below `max_pool_size`. Creation
    /// failures are absorbed; the borrower keeps consuming its budget.
    fn grow(&self) -> bool {
        let mut state = self.state.lock();
        if state.destroyed || state.entries.len() >= self.config.max_pool_size {
            return false;
        }
        match self.create_entry(&mut state) {
            Ok(()) => {
                self.log_size_locked(&state);
                true
            }
            Err(err) => {
                debug!(pool = %self.name, error = %err, "could not grow pool");
                false
            }
        }
    }

    /// Create one entry via the factory and insert it; pool mutex held by
    /// the caller so the size check and insertion are atomic.
    fn create_entry(&self, state: &mut PoolState<S>) -> PoolResult<()> {
        let session = self.factory.create_session()?;
        let id = self.next_entry_id.fetch_add(1, Ordering::Relaxed);
        let entry = PooledEntry::new(id, session, &self.config);
        let listener: Weak<dyn TerminationListener<S>> = self.this.clone();
        entry.register_listener(listener);
        state.entries.push(entry);
        Ok(())
    }

    fn add_sessions_up_to_min(&self, state: &mut PoolState<S>) {
        while state.entries.len() < self.config.min_pool_size {
            if let Err(err) = self.create_entry(state) {
                trace!(
                    pool = %self.name,
                    error = %err,
                    "could not establish session during top-up"
                );
                break;
            }
        }
    }

    /// Block until a session is returned or the remaining budget elapses,
    /// whichever comes first, and return the budget left afterwards. The
    /// caller loops back to claiming and growing after every wake-up, so
    /// spurious wake-ups and absorbed growth failures are retried until
    /// the budget is gone.
    fn wait_for_at_least_one_available(&self, remaining: Duration) -> PoolResult<Duration> {
        let mut state = self.state.lock();
        if state.destroyed || Self::count_available(&state) > 0 {
            return Ok(remaining);
        }
        if remaining.is_zero() {
            return Err(PoolError::Exhausted);
        }
        trace!(
            pool = %self.name,
            remaining_ms = remaining.as_millis() as u64,
            "waiting for a session to become available"
        );
        let before = Instant::now();
        self.available.wait_for(&mut state, remaining);
        Ok(remaining.saturating_sub(before.elapsed()))
    }

    fn count_available(state: &PoolState<S>) -> usize {
        state.entries.iter().filter(|e| e.is_available()).count()
    }

    /// Remove the entry from the collection, then destroy it outside the
    /// pool mutex. Once removed it can no longer be claimed.
    fn remove_and_destroy(&self, entry: &Arc<PooledEntry<S>>) {
        {
            let mut state = self.state.lock();
            state.entries.retain(|e| !Arc::ptr_eq(e, entry));
        }
        entry.destroy(false);
        self.log_current_size();
    }

    pub(crate) fn destroy(&self) {
        let entries = {
            let mut state = self.state.lock();
            if state.destroyed {
                return;
            }
            info!(pool = %self.name, "destroying pool");
            state.destroyed = true;
            std::mem::take(&mut state.entries)
        };
        for entry in &entries {
            if !entry.is_available() {
                warn!(
                    pool = %self.name,
                    entry = entry.id(),
                    "session is still in use on pool destroy - check your shutdown sequence \
                     to avoid terminating in-flight work"
                );
            }
            entry.destroy(false);
        }
        {
            // Wake every waiter so it observes the destroyed flag.
            let _state = self.state.lock();
            self.available.notify_all();
        }
        if let Some(task) = self.maintenance.lock().take() {
            task.stop();
        }
        trace!(pool = %self.name, "pool destroyed");
    }

    pub(crate) fn refresh(&self) {
        let victims = {
            let mut state = self.state.lock();
            if state.destroyed {
                return;
            }
            trace!(pool = %self.name, "refreshing pool");
            let entries = std::mem::take(&mut state.entries);
            let (available, kept): (Vec<_>, Vec<_>) =
                entries.into_iter().partition(|e| e.is_available());
            state.entries = kept;
            available
        };
        for entry in &victims {
            entry.destroy(false);
        }
        let mut state = self.state.lock();
        if !state.destroyed {
            self.add_sessions_up_to_min(&mut state);
        }
        self.log_size_locked(&state);
    }

    pub(crate) fn available_size(&self) -> usize {
        let state = self.state.lock();
        if state.destroyed {
            return 0;
        }
        Self::count_available(&state)
    }

    pub(crate) fn total_size(&self) -> usize {
        let state = self.state.lock();
        if state.destroyed {
            return 0;
        }
        state.entries.len()
    }

    fn log_size_locked(&self, state: &PoolState<S>) {
        trace!(
            pool = %self.name,
            available = Self::count_available(state),
            total = state.entries.len(),
            "current size"
        );
    }

    fn log_current_size(&self) {
        let state = self.state.lock();
        self.log_size_locked(&state);
    }

    // -- maintenance passes, run in order by the maintenance task --

    pub(crate) fn run_maintenance(&self) {
        if self.state.lock().destroyed {
            return;
        }
        self.reap_sessions_in_use_too_long();
        self.remove_sessions_that_exceeded_max_lifetime();
        self.top_up_to_min_pool_size();
        self.shrink_idle_sessions();
    }

    /// Forcibly reclaim sessions that have been in use past `reap_timeout`.
    fn reap_sessions_in_use_too_long(&self) {
        let Some(reap_timeout) = self.config.reap_timeout else {
            return;
        };
        let victims = {
            let mut state = self.state.lock();
            if state.destroyed {
                return;
            }
            trace!(pool = %self.name, "reaping sessions held too long");
            let entries = std::mem::take(&mut state.entries);
            let (victims, kept): (Vec<_>, Vec<_>) = entries.into_iter().partition(|e| {
                !e.is_available() && e.last_time_acquired().elapsed() > reap_timeout
            });
            state.entries = kept;
            victims
        };
        for entry in &victims {
            entry.destroy(true);
        }
        if !victims.is_empty() {
            self.log_current_size();
        }
    }

    /// Destroy available sessions older than `max_lifetime`.
    fn remove_sessions_that_exceeded_max_lifetime(&self) {
        let Some(max_lifetime) = self.config.max_lifetime else {
            return;
        };
        let victims = {
            let mut state = self.state.lock();
            if state.destroyed {
                return;
            }
            trace!(pool = %self.name, "closing sessions that exceeded max_lifetime");
            let entries = std::mem::take(&mut state.entries);
            let (victims, kept): (Vec<_>, Vec<_>) = entries
                .into_iter()
                .partition(|e| e.is_available() && e.creation_time().elapsed() >= max_lifetime);
            state.entries = kept;
            victims
        };
        for entry in &victims {
            entry.destroy(false);
        }
        if !victims.is_empty() {
            self.log_current_size();
        }
    }

    fn top_up_to_min_pool_size(&self) {
        let mut state = self.state.lock();
        if state.destroyed {
            return;
        }
        self.add_sessions_up_to_min(&mut state);
    }

    /// Destroy sessions idle past `max_idle_time`, never shrinking below
    /// `min_pool_size`.
    fn shrink_idle_sessions(&self) {
        let Some(max_idle) = self.config.max_idle_time else {
            return;
        };
        let victims = {
            let mut state = self.state.lock();
            if state.destroyed {
                return;
            }
            trace!(pool = %self.name, "trying to shrink pool");
            let removable = state
                .entries
                .len()
                .saturating_sub(self.config.min_pool_size);
            if removable == 0 {
                return;
            }
            let entries = std::mem::take(&mut state.entries);
            let mut victims = Vec::new();
            let mut kept = Vec::with_capacity(entries.len());
            for entry in entries {
                if victims.len() < removable
                    && entry.is_available()
                    && entry.last_time_released().elapsed() >= max_idle
                {
                    victims.push(entry);
                } else {
                    kept.push(entry);
                }
            }
            state.entries = kept;
            victims
        };
        for entry in &victims {
            entry.destroy(false);
        }
        if !victims.is_empty() {
            self.log_current_size();
        }
    }
}

impl<S: PooledSession> TerminationListener<S> for PoolInner<S> {
    /// A session proxy was closed: wake one waiting borrower.
    fn on_session_terminated(&self, entry: &Arc<PooledEntry<S>>) {
        let _state = self.state.lock();
        trace!(
            pool = %self.name,
            entry = entry.id(),
            "session became available, notifying a waiting borrower"
        );
        self.available.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{TestProxy, TestSession};
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::thread;

    fn counting_factory() -> (Arc<AtomicUsize>, impl Fn() -> PoolResult<TestSession>) {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&created);
        let factory = move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(TestSession::new())
        };
        (created, factory)
    }

    /// Factory failing its first `failures` calls, then succeeding.
    fn flaky_factory(failures: u32) -> impl Fn() -> PoolResult<TestSession> {
        let remaining = Arc::new(AtomicUsize::new(failures as usize));
        move || {
            if remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(PoolError::CreateSession("backend down".into()));
            }
            Ok(TestSession::new())
        }
    }

    fn quiet_config(name: &str) -> PoolConfiguration {
        // Long interval keeps the maintenance task out of timing-sensitive
        // assertions.
        PoolConfiguration::new(name).with_maintenance_interval(Duration::from_secs(3600))
    }

    #[test]
    fn borrow_and_return_leave_the_size_unchanged() {
        let (created, factory) = counting_factory();
        let pool = SessionPool::new(
            quiet_config("stable").with_min_pool_size(2).with_max_pool_size(4),
            factory,
        )
        .unwrap();

        assert_eq!(pool.total_size(), 2);
        assert_eq!(pool.available_size(), 2);

        {
            let _proxy = pool.borrow().unwrap();
            assert_eq!(pool.total_size(), 2);
            assert_eq!(pool.available_size(), 1);
        }

        assert_eq!(pool.total_size(), 2);
        assert_eq!(pool.available_size(), 2);
        assert_eq!(created.load(Ordering::SeqCst), 2);
        pool.destroy();
    }

    #[test]
    fn concurrent_borrows_grow_to_max_and_then_exhaust() {
        let (_created, factory) = counting_factory();
        let pool = SessionPool::new(
            quiet_config("growth")
                .with_min_pool_size(2)
                .with_max_pool_size(4)
                .with_borrow_timeout(Duration::from_secs(1)),
            factory,
        )
        .unwrap();

        let (tx, rx) = mpsc::channel::<TestProxy>();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = pool.clone();
                let tx = tx.clone();
                thread::spawn(move || tx.send(pool.borrow().unwrap()).unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let proxies: Vec<TestProxy> = rx.try_iter().collect();
        assert_eq!(proxies.len(), 4);
        assert_eq!(pool.total_size(), 4);
        assert_eq!(pool.available_size(), 0);

        // all four proxies point at distinct entries
        for (i, a) in proxies.iter().enumerate() {
            for b in proxies.iter().skip(i + 1) {
                assert!(!Arc::ptr_eq(a.entry(), b.entry()));
            }
        }

        // a fifth borrower times out after roughly the borrow timeout
        let started = Instant::now();
        let result = pool.borrow();
        let elapsed = started.elapsed();
        assert!(matches!(result, Err(PoolError::Exhausted)));
        assert!(elapsed >= Duration::from_millis(900), "timed out after {elapsed:?}");
        assert!(elapsed < Duration::from_secs(3), "timed out after {elapsed:?}");
        assert_eq!(pool.total_size(), 4);

        drop(proxies);
        pool.destroy();
    }

    #[test]
    fn waiting_borrower_wakes_when_a_session_is_returned() {
        let (_created, factory) = counting_factory();
        let pool = SessionPool::new(
            quiet_config("handoff")
                .with_min_pool_size(0)
                .with_max_pool_size(2)
                .with_borrow_timeout(Duration::from_secs(5)),
            factory,
        )
        .unwrap();

        let first = pool.borrow().unwrap();
        let second = pool.borrow().unwrap();
        assert_eq!(pool.total_size(), 2);

        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || {
                let started = Instant::now();
                let proxy = pool.borrow().unwrap();
                (proxy, started.elapsed())
            })
        };
        // let the waiter reach the condvar
        thread::sleep(Duration::from_millis(100));

        let released_at = Instant::now();
        drop(first);
        let (proxy, waited) = waiter.join().unwrap();
        let wake_latency = released_at.elapsed();

        assert!(waited >= Duration::from_millis(90));
        assert!(
            wake_latency < Duration::from_millis(250),
            "woke after {wake_latency:?}"
        );
        drop(proxy);
        drop(second);
        pool.destroy();
    }

    #[test]
    fn zero_borrow_timeout_fails_immediately_when_full() {
        let (_created, factory) = counting_factory();
        let pool = SessionPool::new(
            quiet_config("impatient")
                .with_min_pool_size(0)
                .with_max_pool_size(1)
                .with_borrow_timeout(Duration::ZERO),
            factory,
        )
        .unwrap();

        let held = pool.borrow().unwrap();
        let started = Instant::now();
        assert!(matches!(pool.borrow(), Err(PoolError::Exhausted)));
        assert!(started.elapsed() < Duration::from_millis(100));
        drop(held);
        pool.destroy();
    }

    #[test]
    fn growth_retries_after_a_factory_failure() {
        let pool = SessionPool::new(
            quiet_config("flaky")
                .with_min_pool_size(0)
                .with_max_pool_size(1)
                .with_borrow_timeout(Duration::from_millis(200)),
            flaky_factory(1),
        )
        .unwrap();

        // first growth attempt fails and is absorbed; the borrower waits
        // out its budget and the retry succeeds within the same call
        let proxy = pool.borrow().unwrap();
        assert_eq!(pool.total_size(), 1);
        drop(proxy);
        pool.destroy();
    }

    #[test]
    fn failed_probe_removes_the_entry_and_the_borrower_moves_on() {
        let (created, factory) = counting_factory();
        let pool = SessionPool::new(
            quiet_config("probe")
                .with_min_pool_size(2)
                .with_max_pool_size(2)
                .with_borrow_timeout(Duration::from_millis(500)),
            factory,
        )
        .unwrap();
        assert_eq!(pool.total_size(), 2);

        // make the oldest entry fail its next liveness probe
        {
            let state = pool.inner.state.lock();
            state.entries[0].session().fail_next_probe();
        }

        let proxy = pool.borrow().unwrap();
        // the bad entry was removed and destroyed, the next one served
        assert_eq!(pool.total_size(), 1);
        assert_eq!(created.load(Ordering::SeqCst), 2);
        drop(proxy);
        pool.destroy();
    }

    #[test]
    fn recycle_hands_the_same_session_to_the_owning_thread() {
        let pool = SessionPool::new(
            quiet_config("affine")
                .with_min_pool_size(1)
                .with_max_pool_size(1)
                .with_borrow_timeout(Duration::from_millis(100)),
            || Ok(TestSession::recyclable()),
        )
        .unwrap();

        let first = pool.borrow().unwrap();
        // without recycling this would exhaust the single-entry pool
        let second = pool.borrow().unwrap();
        assert!(Arc::ptr_eq(first.entry(), second.entry()));
        assert_eq!(pool.total_size(), 1);

        // a different thread has no affinity and must wait out its budget
        let other = {
            let pool = pool.clone();
            thread::spawn(move || pool.borrow())
        };
        assert!(matches!(other.join().unwrap(), Err(PoolError::Exhausted)));

        drop(second);
        drop(first);
        pool.destroy();
    }

    #[test]
    fn recycle_failure_falls_through_to_normal_acquisition() {
        let pool = SessionPool::new(
            quiet_config("affine-fallback")
                .with_min_pool_size(1)
                .with_max_pool_size(2)
                .with_borrow_timeout(Duration::from_millis(500)),
            || Ok(TestSession::recyclable()),
        )
        .unwrap();

        let first = pool.borrow().unwrap();
        // recycling will fail its probe; the borrower falls through and
        // grows a second entry instead
        first.entry().session().fail_next_probe();
        let second = pool.borrow().unwrap();
        assert!(!Arc::ptr_eq(first.entry(), second.entry()));
        assert_eq!(pool.total_size(), 2);

        drop(second);
        drop(first);
        pool.destroy();
    }

    #[test]
    fn destroy_is_idempotent_and_fails_further_borrows() {
        let (_created, factory) = counting_factory();
        let pool = SessionPool::new(
            quiet_config("teardown").with_min_pool_size(2).with_max_pool_size(4),
            factory,
        )
        .unwrap();

        pool.destroy();
        pool.destroy();

        assert!(matches!(pool.borrow(), Err(PoolError::Destroyed)));
        assert_eq!(pool.available_size(), 0);
        assert_eq!(pool.total_size(), 0);
    }

    #[test]
    fn destroy_wakes_pending_waiters() {
        let (_created, factory) = counting_factory();
        let pool = SessionPool::new(
            quiet_config("teardown-waiters")
                .with_min_pool_size(0)
                .with_max_pool_size(1)
                .with_borrow_timeout(Duration::from_secs(10)),
            factory,
        )
        .unwrap();

        let held = pool.borrow().unwrap();
        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || pool.borrow())
        };
        thread::sleep(Duration::from_millis(100));

        let started = Instant::now();
        pool.destroy();
        let result = waiter.join().unwrap();
        assert!(matches!(result, Err(PoolError::Destroyed)));
        assert!(started.elapsed() < Duration::from_secs(1));
        drop(held);
    }

    #[test]
    fn destroy_spares_sessions_still_in_use() {
        let (_created, factory) = counting_factory();
        let pool = SessionPool::new(
            quiet_config("teardown-inuse")
                .with_min_pool_size(0)
                .with_max_pool_size(1),
            factory,
        )
        .unwrap();

        let held = pool.borrow().unwrap();
        let entry = Arc::clone(held.entry());
        pool.destroy();

        // the in-use session was warned about but not torn down
        assert!(!entry.session().is_closed());
        drop(held);
    }

    #[test]
    fn refresh_replaces_available_sessions() {
        let (created, factory) = counting_factory();
        let pool = SessionPool::new(
            quiet_config("refresh").with_min_pool_size(2).with_max_pool_size(2),
            factory,
        )
        .unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 2);

        let old: Vec<_> = {
            let state = pool.inner.state.lock();
            state.entries.iter().map(|e| Arc::clone(e)).collect()
        };

        pool.refresh();

        assert_eq!(pool.total_size(), 2);
        assert_eq!(created.load(Ordering::SeqCst), 4);
        for entry in &old {
            assert!(entry.session().is_closed());
        }
        let newer = {
            let state = pool.inner.state.lock();
            state
                .entries
                .iter()
                .all(|e| old.iter().all(|o| !Arc::ptr_eq(e, o)))
        };
        assert!(newer);
        pool.destroy();
    }

    #[test]
    fn refresh_leaves_sessions_in_use_alone() {
        let (created, factory) = counting_factory();
        let pool = SessionPool::new(
            quiet_config("refresh-inuse").with_min_pool_size(2).with_max_pool_size(2),
            factory,
        )
        .unwrap();

        let held = pool.borrow().unwrap();
        pool.refresh();

        assert_eq!(pool.total_size(), 2);
        assert!(!held.entry().session().is_closed());
        assert_eq!(created.load(Ordering::SeqCst), 3);
        drop(held);
        pool.destroy();
    }

    #[test]
    fn pool_never_exceeds_max_size_under_contention() {
        let (created, factory) = counting_factory();
        let pool = SessionPool::new(
            quiet_config("hammer")
                .with_min_pool_size(0)
                .with_max_pool_size(2)
                .with_borrow_timeout(Duration::from_secs(2)),
            factory,
        )
        .unwrap();

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let pool = pool.clone();
                thread::spawn(move || {
                    for _ in 0..25 {
                        let proxy = pool.borrow().unwrap();
                        assert!(pool.total_size() <= 2);
                        drop(proxy);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(pool.total_size() <= 2);
        assert!(created.load(Ordering::SeqCst) <= 2);
        pool.destroy();
    }

    #[test]
    fn rejects_inconsistent_configuration() {
        let result = SessionPool::new(
            quiet_config("bad").with_min_pool_size(3).with_max_pool_size(2),
            || Ok(TestSession::new()),
        );
        assert!(matches!(result, Err(PoolError::Internal(_))));
    }

    #[test]
    fn starts_degraded_when_the_factory_is_down() {
        let pool = SessionPool::new(
            quiet_config("degraded").with_min_pool_size(2).with_max_pool_size(4),
            flaky_factory(1),
        )
        .unwrap();
        // initial top-up stopped at the first failure; borrowing still works
        assert!(pool.total_size() < 2);
        let proxy = pool.borrow().unwrap();
        drop(proxy);
        pool.destroy();
    }
}
