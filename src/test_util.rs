//! Scripted back-end session shared by the unit tests

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;

use crate::entry::{PooledEntry, PooledSession};
use crate::errors::{PoolError, PoolResult};

/// Serialises tests that touch the process-wide leak-capture switch.
pub(crate) static LEAK_TEST_LOCK: Mutex<()> = Mutex::new(());

/// In-memory stand-in for a back-end session. Failure modes are scripted
/// through atomic flags so tests can drive every lifecycle path.
pub(crate) struct TestSession {
    proxy_out: AtomicBool,
    closed: AtomicBool,
    reaped: AtomicBool,
    probe_failures: AtomicU32,
    recyclable: bool,
    owner: Mutex<Option<ThreadId>>,
    last_probe_query: Mutex<Option<String>>,
}

impl TestSession {
    pub fn new() -> Self {
        Self {
            proxy_out: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            reaped: AtomicBool::new(false),
            probe_failures: AtomicU32::new(0),
            recyclable: false,
            owner: Mutex::new(None),
            last_probe_query: Mutex::new(None),
        }
    }

    /// A session that reports thread affinity while its proxy is out.
    pub fn recyclable() -> Self {
        Self {
            recyclable: true,
            ..Self::new()
        }
    }

    /// Make the next `count` liveness probes fail.
    pub fn fail_probes(&self, count: u32) {
        self.probe_failures.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_probe(&self) {
        self.fail_probes(1);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn was_reaped(&self) -> bool {
        self.reaped.load(Ordering::SeqCst)
    }

    pub fn last_probe_query(&self) -> Option<String> {
        self.last_probe_query.lock().clone()
    }
}

/// Borrowed handle over a [`TestSession`]; returns the session to the pool
/// on drop, like a real driver proxy would on close.
pub(crate) struct TestProxy {
    entry: Arc<PooledEntry<TestSession>>,
}

impl TestProxy {
    pub fn entry(&self) -> &Arc<PooledEntry<TestSession>> {
        &self.entry
    }
}

impl Drop for TestProxy {
    fn drop(&mut self) {
        let session = self.entry.session();
        session.proxy_out.store(false, Ordering::SeqCst);
        *session.owner.lock() = None;
        self.entry.fire_terminated();
    }
}

impl PooledSession for TestSession {
    type Proxy = TestProxy;

    fn build_proxy(&self, entry: &Arc<PooledEntry<Self>>) -> PoolResult<TestProxy> {
        self.proxy_out.store(true, Ordering::SeqCst);
        *self.owner.lock() = Some(thread::current().id());
        Ok(TestProxy {
            entry: Arc::clone(entry),
        })
    }

    fn test_underlying(&self, test_query: Option<&str>) -> PoolResult<()> {
        *self.last_probe_query.lock() = test_query.map(str::to_owned);
        let remaining = self.probe_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.probe_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(PoolError::CreateSession("scripted probe failure".into()));
        }
        Ok(())
    }

    fn close(&self, reap: bool) {
        self.closed.store(true, Ordering::SeqCst);
        if reap {
            self.reaped.store(true, Ordering::SeqCst);
        }
    }

    fn is_available(&self) -> bool {
        !self.proxy_out.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst)
    }

    fn can_be_recycled_for_calling_thread(&self) -> bool {
        self.recyclable
            && self.proxy_out.load(Ordering::SeqCst)
            && *self.owner.lock() == Some(thread::current().id())
    }
}
