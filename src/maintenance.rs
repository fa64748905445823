//! Periodic pool maintenance: reap, evict, top up, shrink

use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::entry::PooledSession;
use crate::pool::PoolInner;

const DEFAULT_MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);

struct Shutdown {
    stopping: Mutex<bool>,
    signal: Condvar,
}

/// Handle to the background maintenance thread.
///
/// The thread holds only a `Weak` reference to the pool: destroying the
/// pool stops it promptly through the shutdown signal, and dropping the
/// last pool handle without destroying it lets the thread exit on its next
/// tick when the upgrade fails.
pub(crate) struct MaintenanceTask {
    shutdown: Arc<Shutdown>,
    handle: Option<JoinHandle<()>>,
}

impl MaintenanceTask {
    pub(crate) fn start<S: PooledSession>(
        pool: Weak<PoolInner<S>>,
        interval: Duration,
    ) -> Self {
        let interval = if interval.is_zero() {
            trace!("using default maintenance interval");
            DEFAULT_MAINTENANCE_INTERVAL
        } else {
            interval
        };
        let shutdown = Arc::new(Shutdown {
            stopping: Mutex::new(false),
            signal: Condvar::new(),
        });

        let thread_shutdown = Arc::clone(&shutdown);
        let handle = thread::spawn(move || loop {
            {
                let mut stopping = thread_shutdown.stopping.lock();
                if !*stopping {
                    thread_shutdown.signal.wait_for(&mut stopping, interval);
                }
                if *stopping {
                    break;
                }
            }
            match pool.upgrade() {
                Some(pool) => pool.run_maintenance(),
                None => break,
            }
        });

        Self {
            shutdown,
            handle: Some(handle),
        }
    }

    /// Signal the thread to stop and wait for it to finish.
    pub(crate) fn stop(mut self) {
        self.signal_stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    fn signal_stop(&self) {
        *self.shutdown.stopping.lock() = true;
        self.shutdown.signal.notify_all();
    }
}

impl Drop for MaintenanceTask {
    fn drop(&mut self) {
        // Not joined here: the drop can run on the maintenance thread
        // itself when the last pool handle dies during a tick.
        self.signal_stop();
    }
}
