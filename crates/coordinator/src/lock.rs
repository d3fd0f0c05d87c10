//! Per-file locks held under leases.
//!
//! Every path gets one `RwLock` object, created exactly once. A caller that
//! opens a file receives a `LeaseId`; the lease owns the lock guard, so the lock
//! stays held across requests until the matching close. Leases expire after
//! `ttl` unless renewed, which is how a crashed caller's lock gets back.
//!
//! ```text
//! write-open ──create_exclusive──▶ Lease{Exclusive} ──release──▶ (guard dropped)
//! read-open  ──acquire_shared────▶ Lease{Shared}    ──release──▶ (guard dropped)
//!                                        │
//!                                        └── expires_at passed ──reap_expired──▶ Expired
//! ```

use corelib::{Error, LeaseId, OpenMode, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tokio::time::Instant;

// Held only for its Drop.
#[allow(dead_code)]
enum Guard {
    Shared(OwnedRwLockReadGuard<()>),
    Exclusive(OwnedRwLockWriteGuard<()>),
}

/// A lock held on behalf of a caller. Dropping it releases the lock.
pub struct Lease {
    pub id: LeaseId,
    pub path: String,
    pub mode: OpenMode,
    pub expires_at: Instant,
    lock: Arc<RwLock<()>>,
    _guard: Guard,
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

pub struct LockTable {
    locks: DashMap<String, Arc<RwLock<()>>>,
    leases: DashMap<LeaseId, Lease>,
    ttl: Duration,
}

impl LockTable {
    pub fn new(ttl: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            leases: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Create the lock object for `path` and take it exclusively.
    ///
    /// Only the first caller for a path gets through; anyone else, racing or
    /// late, gets `LockContended` without waiting.
    pub fn create_exclusive(&self, path: &str) -> Result<LeaseId> {
        let lock = match self.locks.entry(path.to_string()) {
            Entry::Occupied(_) => {
                return Err(Error::LockContended(format!(
                    "{path} is already being created"
                )))
            }
            Entry::Vacant(slot) => {
                let lock = Arc::new(RwLock::new(()));
                slot.insert(Arc::clone(&lock));
                lock
            }
        };

        // Nobody else has seen this lock yet.
        let guard = Arc::clone(&lock)
            .try_write_owned()
            .map_err(|_| Error::LockContended(path.to_string()))?;

        Ok(self.grant(path, OpenMode::Write, lock, Guard::Exclusive(guard)))
    }

    /// Take `path`'s lock in shared mode, waiting up to `wait` for a writer.
    pub async fn acquire_shared(&self, path: &str, wait: Duration) -> Result<LeaseId> {
        let lock = self
            .locks
            .get(path)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::NotFound(format!("no lock for {path}")))?;

        let guard = tokio::time::timeout(wait, Arc::clone(&lock).read_owned())
            .await
            .map_err(|_| {
                Error::LockContended(format!("{path} still being written after {wait:?}"))
            })?;

        Ok(self.grant(path, OpenMode::Read, lock, Guard::Shared(guard)))
    }

    fn grant(&self, path: &str, mode: OpenMode, lock: Arc<RwLock<()>>, guard: Guard) -> LeaseId {
        let id = LeaseId::new();
        self.leases.insert(
            id,
            Lease {
                id,
                path: path.to_string(),
                mode,
                expires_at: Instant::now() + self.ttl,
                lock,
                _guard: guard,
            },
        );
        tracing::debug!(path, %mode, lease = %id, "lease granted");
        id
    }

    /// Take the lease out of the table.
    ///
    /// The lock stays held until the returned `Lease` is dropped, so the caller
    /// can finish state changes first. `Ok(None)` means the lease is not held
    /// (already released or expired). A lease held for a different path or
    /// mode is left untouched and reported as `LockMismatch`.
    pub fn release(&self, path: &str, mode: OpenMode, lease: LeaseId) -> Result<Option<Lease>> {
        let Entry::Occupied(entry) = self.leases.entry(lease) else {
            return Ok(None);
        };
        let held = entry.get();
        if held.path != path || held.mode != mode {
            return Err(Error::LockMismatch(format!(
                "lease {lease} holds {} for {}, release asked for {path} for {mode}",
                held.path, held.mode
            )));
        }
        Ok(Some(entry.remove()))
    }

    /// Push a lease's expiry out by another `ttl`.
    pub fn renew(&self, lease: LeaseId) -> Result<Instant> {
        let mut held = self
            .leases
            .get_mut(&lease)
            .ok_or_else(|| Error::NotFound(format!("lease {lease}")))?;
        held.expires_at = Instant::now() + self.ttl;
        Ok(held.expires_at)
    }

    /// Remove every lease past its expiry and hand them back, still held.
    pub fn reap_expired(&self) -> Vec<Lease> {
        let now = Instant::now();
        let expired: Vec<LeaseId> = self
            .leases
            .iter()
            .filter(|entry| entry.value().expires_at <= now)
            .map(|entry| *entry.key())
            .collect();

        expired
            .into_iter()
            // Renewed or released since the scan.
            .filter_map(|id| self.leases.remove_if(&id, |_, l| l.expires_at <= now))
            .map(|(_, lease)| lease)
            .collect()
    }

    /// Drop `lease`'s lock object from the table so the path can be created again.
    ///
    /// A newer lock object for the same path is left alone.
    pub fn forget(&self, lease: &Lease) -> bool {
        self.locks
            .remove_if(&lease.path, |_, lock| Arc::ptr_eq(lock, &lease.lock))
            .is_some()
    }

    pub fn has_lock(&self, path: &str) -> bool {
        self.locks.contains_key(path)
    }

    pub fn lease(&self, lease: LeaseId) -> Option<(String, OpenMode, Instant)> {
        self.leases
            .get(&lease)
            .map(|held| (held.path.clone(), held.mode, held.expires_at))
    }

    pub fn held(&self) -> usize {
        self.leases.len()
    }
}
