//! Per-principal advisory locking.
//!
//! ## Design
//!
//! - One exclusive lock per [`PrincipalKey`], created lazily on first use
//! - Entries are reference counted (holder + waiters) and pruned when the last one leaves
//! - Scoped acquisition only: [`EntityLockManager::with_lock`] releases on every exit path,
//!   including a panic unwinding out of the closure
//! - Not reentrant: acquiring the same key again from inside `with_lock` blocks until the
//!   configured timeout (or forever without one)
//! - Per process, in memory; nothing is coordinated across server processes

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, warn};

use printgate_core::PrincipalKey;

/// How long a caller is willing to wait for a principal lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LockPolicy {
    /// `None` blocks until the lock is free; `Some(Duration::ZERO)` fails fast.
    pub timeout: Option<Duration>,
}

impl LockPolicy {
    pub fn blocking() -> Self {
        Self { timeout: None }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    #[error("timed out after {waited:?} waiting for lock on principal {key}")]
    Timeout { key: PrincipalKey, waited: Duration },
}

#[derive(Debug)]
struct Slot {
    gate: Arc<Mutex<()>>,
    users: usize,
}

/// Lock table keyed by principal.
#[derive(Debug, Default)]
pub struct EntityLockManager {
    policy: LockPolicy,
    table: Mutex<HashMap<PrincipalKey, Slot>>,
}

impl EntityLockManager {
    pub fn new(policy: LockPolicy) -> Self {
        Self {
            policy,
            table: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> LockPolicy {
        self.policy
    }

    /// Run `f` while holding the exclusive lock for `key`.
    ///
    /// The lock is released before this returns, whether `f` returns normally or panics.
    /// Waiters are handed the lock fairly on release.
    pub fn with_lock<T, F>(&self, key: &PrincipalKey, f: F) -> Result<T, LockError>
    where
        F: FnOnce() -> T,
    {
        let lease = self.lease(key);

        let guard = match self.policy.timeout {
            Some(timeout) => match lease.gate.try_lock_for(timeout) {
                Some(guard) => guard,
                None => {
                    warn!(principal = %key, waited_ms = timeout.as_millis() as u64, "principal lock timeout");
                    return Err(LockError::Timeout {
                        key: key.clone(),
                        waited: timeout,
                    });
                }
            },
            None => lease.gate.lock(),
        };

        debug!(principal = %key, "principal lock acquired");
        let value = f();
        MutexGuard::unlock_fair(guard);
        debug!(principal = %key, "principal lock released");

        Ok(value)
    }

    /// Number of keys that currently have a holder or a waiter.
    pub fn active_keys(&self) -> usize {
        self.table.lock().len()
    }

    fn lease<'a>(&'a self, key: &'a PrincipalKey) -> Lease<'a> {
        let mut table = self.table.lock();
        let slot = table.entry(key.clone()).or_insert_with(|| Slot {
            gate: Arc::new(Mutex::new(())),
            users: 0,
        });
        slot.users += 1;

        Lease {
            manager: self,
            key,
            gate: slot.gate.clone(),
        }
    }
}

/// Registration of one holder/waiter in the table; prunes the entry on drop.
struct Lease<'a> {
    manager: &'a EntityLockManager,
    key: &'a PrincipalKey,
    gate: Arc<Mutex<()>>,
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        let mut table = self.manager.table.lock();
        if let Some(slot) = table.get_mut(self.key) {
            slot.users = slot.users.saturating_sub(1);
            if slot.users == 0 {
                table.remove(self.key);
            }
        }
    }
}
