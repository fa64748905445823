//! Basic usage walkthrough for the session pool

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use session_pool::{PoolConfiguration, PoolError, PoolResult, PooledEntry, PooledSession, SessionPool};

/// An in-memory stand-in for a back-end session.
struct DemoSession {
    busy: AtomicBool,
}

impl DemoSession {
    fn new() -> Self {
        Self {
            busy: AtomicBool::new(false),
        }
    }
}

/// Handle issued per borrow; dropping it returns the session to the pool.
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
        if let Some(level) = entry.default_isolation_level() {
            println!("   (would set isolation level {level})");
        }
        Ok(DemoHandle {
            entry: Arc::clone(entry),
        })
    }

    fn test_underlying(&self, test_query: Option<&str>) -> PoolResult<()> {
        if let Some(query) = test_query {
            println!("   (would probe with '{query}')");
        }
        Ok(())
    }

    fn close(&self, _reap: bool) {}

    fn is_available(&self) -> bool {
        !self.busy.load(Ordering::SeqCst)
    }
}

fn main() -> PoolResult<()> {
    println!("=== session-pool - Basic Examples ===\n");

    borrow_and_return()?;
    grow_until_exhausted()?;

    Ok(())
}

fn borrow_and_return() -> PoolResult<()> {
    println!("1. Borrow and return:");

    let config = PoolConfiguration::new("demo")
        .with_min_pool_size(2)
        .with_max_pool_size(4)
        .with_test_query("SELECT 1")
        .with_default_isolation_level(2);
    let pool = SessionPool::new(config, || Ok(DemoSession::new()))?;

    println!("   Pool '{}' starts at {} sessions", pool.name(), pool.total_size());
    {
        let _handle = pool.borrow()?;
        println!("   While borrowed: {}/{} available", pool.available_size(), pool.total_size());
    }
    println!("   After return:   {}/{} available\n", pool.available_size(), pool.total_size());

    pool.destroy();
    Ok(())
}

fn grow_until_exhausted() -> PoolResult<()> {
    println!("2. Growth and exhaustion:");

    let config = PoolConfiguration::new("demo-bounded")
        .with_min_pool_size(0)
        .with_max_pool_size(2)
        .with_borrow_timeout(Duration::from_millis(200));
    let pool = SessionPool::new(config, || Ok(DemoSession::new()))?;

    let first = pool.borrow()?;
    let second = pool.borrow()?;
    println!("   Grew to {} sessions on demand", pool.total_size());

    match pool.borrow() {
        Err(PoolError::Exhausted) => println!("   Third borrow timed out as expected"),
        other => println!("   Unexpected result: {:?}", other.is_ok()),
    }

    drop(first);
    drop(second);
    pool.destroy();
    println!();
    Ok(())
}
