//! Single-flight build coordination.
//!
//! A [`BuildGuard`] wraps a semaphore permit. Waiting is bounded: when the
//! holder does not finish in time the waiter logs and proceeds without a
//! permit. The commit token still protects the cache write, so the timeout
//! only breaks stale waits.

use std::{sync::Arc, time::Duration};

use hashbrown::HashMap;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::error;

use crate::types::Scope;

/// RAII guard for one build; dropping it lets the next waiter in.
#[derive(Debug)]
pub struct BuildGuard {
    permit: Option<OwnedSemaphorePermit>,
}

impl BuildGuard {
    /// False when the wait timed out and the build runs unguarded.
    pub fn is_exclusive(&self) -> bool {
        self.permit.is_some()
    }
}

async fn acquire(semaphore: Arc<Semaphore>, timeout: Duration, what: &str, scope: Option<Scope>) -> BuildGuard {
    match tokio::time::timeout(timeout, semaphore.acquire_owned()).await {
        Ok(Ok(permit)) => BuildGuard { permit: Some(permit) },
        Ok(Err(_)) => BuildGuard { permit: None },
        Err(_) => {
            error!(
                scope = ?scope,
                timeout_ms = timeout.as_millis() as u64,
                "{what} wait timed out, proceeding"
            );
            BuildGuard { permit: None }
        }
    }
}

/// Process-wide guard for top-level traversals.
#[derive(Debug)]
pub struct SingleFlight {
    semaphore: Arc<Semaphore>,
    timeout: Duration,
}

impl SingleFlight {
    /// One traversal at a time, waiters give up after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(1)),
            timeout,
        }
    }

    /// Waits for the in-flight traversal, if any.
    pub async fn enter(&self) -> BuildGuard {
        acquire(self.semaphore.clone(), self.timeout, "single-flight", None).await
    }

    /// True while a traversal holds the guard.
    pub fn is_busy(&self) -> bool {
        self.semaphore.available_permits() == 0
    }
}

/// Per-scope build guards, so one token is built once however many
/// readers race for it.
#[derive(Debug)]
pub struct ScopeFlights {
    inflight: Mutex<HashMap<Scope, Arc<Semaphore>>>,
    timeout: Duration,
}

impl ScopeFlights {
    /// Guards keyed by scope, waiters give up after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Waits for any in-flight build of `scope`.
    ///
    /// Guards nobody holds or waits on are dropped first, so the map only
    /// tracks scopes with a build in flight.
    pub async fn enter(&self, scope: Scope) -> BuildGuard {
        let semaphore = {
            let mut inflight = self.inflight.lock();
            inflight.retain(|_, semaphore| Arc::strong_count(semaphore) > 1);
            inflight
                .entry(scope)
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };
        acquire(semaphore, self.timeout, "scope build", Some(scope)).await
    }

    /// Scopes currently holding a guard entry.
    pub fn tracked(&self) -> usize {
        self.inflight.lock().len()
    }
}
