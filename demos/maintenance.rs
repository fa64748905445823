//! Watch the maintenance task age out and replace pooled sessions

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use session_pool::{PoolConfiguration, PoolResult, PooledEntry, PooledSession, SessionPool};

struct DemoSession {
    serial: usize,
    busy: AtomicBool,
}

struct DemoHandle {
    entry: Arc<PooledEntry<DemoSession>>,
}

impl Drop for DemoHandle {
    fn drop(&mut self) {
        self.entry.session().busy.store(false, Ordering::SeqCst);
        self.entry.fire_terminated();
    }
}

impl PooledSession for DemoSession {
    type Proxy = DemoHandle;

    fn build_proxy(&self, entry: &Arc<PooledEntry<Self>>) -> PoolResult<DemoHandle> {
        self.busy.store(true, Ordering::SeqCst);
        Ok(DemoHandle {
            entry: Arc::clone(entry),
        })
    }

    fn test_underlying(&self, _test_query: Option<&str>) -> PoolResult<()> {
        Ok(())
    }

    fn close(&self, reap: bool) {
        println!("   session #{} closed (reap: {reap})", self.serial);
    }

    fn is_available(&self) -> bool {
        !self.busy.load(Ordering::SeqCst)
    }
}

fn main() -> PoolResult<()> {
    println!("=== session-pool - Maintenance Example ===\n");

    let serials = Arc::new(AtomicUsize::new(0));
    let factory = move || {
        let serial = serials.fetch_add(1, Ordering::SeqCst);
        println!("   session #{serial} opened");
        Ok(DemoSession {
            serial,
            busy: AtomicBool::new(false),
        })
    };

    let config = PoolConfiguration::new("demo-maintenance")
        .with_min_pool_size(1)
        .with_max_pool_size(3)
        .with_max_lifetime(Duration::from_millis(400))
        .with_maintenance_interval(Duration::from_millis(200));
    let pool = SessionPool::new(config, factory)?;

    println!("Sessions older than 400ms are evicted, then topped back up:\n");
    for step in 1..=4 {
        thread::sleep(Duration::from_millis(300));
        println!("   t+{}ms: {} session(s) pooled", step * 300, pool.total_size());
    }

    pool.borrow().map(drop)?;
    pool.destroy();
    println!("\nPool destroyed.");
    Ok(())
}
