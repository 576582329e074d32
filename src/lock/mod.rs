//! # Named cross-process job locks
//!
//! Jobs that may run in several worker processes at once take a named lock
//! before touching the store. The production backend is PostgreSQL's
//! session-scoped advisory lock:
//!
//! - **Non-blocking**: `pg_try_advisory_lock` answers immediately.
//! - **Crash-safe**: the lock lives as long as the database session holding it.
//!   If the process dies or the connection drops, the server releases it.
//! - **Fail-closed**: any error while acquiring counts as "not acquired".
//!
//! Lock names map to advisory keys through [`lock_key`]: the first four bytes
//! of the name's MD5 digest, masked to a positive 31-bit integer.
//!
//! [`LocalLockManager`] provides the same contract inside one process, for
//! single-worker deployments and tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use sqlx::postgres::{PgConnection, PgPool};
use sqlx::Connection;
use tracing::{debug, warn};

/// Named, non-blocking mutual exclusion.
#[async_trait]
pub trait LockManager: Send + Sync {
    /// Try to take the lock without waiting. Returns false if someone else
    /// holds it or the backend failed.
    async fn try_acquire(&self, name: &str) -> bool;

    /// Release a lock taken through this manager. Returns whether a held lock
    /// was actually released.
    async fn release(&self, name: &str) -> bool;
}

/// Deterministic advisory key for a lock name.
pub fn lock_key(name: &str) -> i64 {
    let digest = md5::compute(name.as_bytes());
    let head = u32::from_be_bytes([digest.0[0], digest.0[1], digest.0[2], digest.0[3]]);
    i64::from(head & 0x7FFF_FFFF)
}

/// Advisory locks held on dedicated PostgreSQL sessions.
///
/// Each held lock pins its own connection, detached from the pool. Releasing
/// unlocks and closes that connection; dropping the manager drops every pinned
/// connection, which ends the sessions and frees their locks server-side.
pub struct PgLockManager {
    pool: PgPool,
    held: tokio::sync::Mutex<HashMap<String, PgConnection>>,
}

impl PgLockManager {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            held: tokio::sync::Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl LockManager for PgLockManager {
    async fn try_acquire(&self, name: &str) -> bool {
        if self.held.lock().await.contains_key(name) {
            debug!("Lock {} already held by this process", name);
            return false;
        }

        let key = lock_key(name);
        let mut conn = match self.pool.acquire().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Could not get a connection for lock {}: {}", name, e);
                return false;
            }
        };

        match sqlx::query_scalar::<_, bool>("SELECT pg_try_advisory_lock($1)")
            .bind(key)
            .fetch_one(&mut *conn)
            .await
        {
            Ok(true) => {
                let mut held = self.held.lock().await;
                held.insert(name.to_string(), conn.detach());
                debug!("Acquired lock {} (key {})", name, key);
                true
            }
            Ok(false) => false,
            Err(e) => {
                warn!("Advisory lock {} failed, treating as unavailable: {}", name, e);
                // The statement may have taken the lock before failing; ending
                // the session guarantees it is not left behind.
                let _ = conn.detach().close().await;
                false
            }
        }
    }

    async fn release(&self, name: &str) -> bool {
        let Some(mut conn) = self.held.lock().await.remove(name) else {
            return false;
        };

        let released = match sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock($1)")
            .bind(lock_key(name))
            .fetch_one(&mut conn)
            .await
        {
            Ok(released) => released,
            Err(e) => {
                warn!("Advisory unlock of {} failed, closing its session: {}", name, e);
                true
            }
        };

        if let Err(e) = conn.close().await {
            debug!("Closing lock session for {} failed: {}", name, e);
        }

        released
    }
}

/// Process-local lock table.
#[derive(Debug, Default)]
pub struct LocalLockManager {
    held: Mutex<HashSet<String>>,
}

impl LocalLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self, name: &str) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(name)
    }
}

#[async_trait]
impl LockManager for LocalLockManager {
    async fn try_acquire(&self, name: &str) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string())
    }

    async fn release(&self, name: &str) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }
}

/// A lock taken through [`acquire`]. Released by [`HeldLock::release`] or,
/// on any other exit path, when dropped.
pub struct HeldLock {
    manager: Arc<dyn LockManager>,
    name: String,
    released: bool,
}

impl HeldLock {
    pub async fn release(mut self) -> bool {
        self.released = true;
        self.manager.release(&self.name).await
    }
}

impl Drop for HeldLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let manager = Arc::clone(&self.manager);
        let name = std::mem::take(&mut self.name);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    manager.release(&name).await;
                });
            }
            Err(_) => warn!("Lock {} dropped outside a runtime; left to session end", name),
        }
    }
}

/// Take `name` through `manager`, returning a guard that always releases it.
pub async fn acquire(manager: &Arc<dyn LockManager>, name: &str) -> Option<HeldLock> {
    if manager.try_acquire(name).await {
        Some(HeldLock {
            manager: Arc::clone(manager),
            name: name.to_string(),
            released: false,
        })
    } else {
        None
    }
}
