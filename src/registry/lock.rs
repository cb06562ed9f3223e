//! Per-identity leases for concurrent provisioning protection.
//!
//! The existence check and the final registry write of a saga are not
//! atomic. Holding a lease for the identity across the whole saga keeps two
//! calls in the same process from provisioning the same instance; the
//! registry's unique store closes the gap between processes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;
use uuid::Uuid;

use super::types::{AddonIdentity, PartialIdentity};

/// Information about a held lease.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    /// Unique lease identifier.
    pub lock_id: String,
    /// Who holds the lease.
    pub holder: String,
    /// What the holder is doing.
    pub operation: String,
    /// When the lease was acquired.
    pub acquired_at: DateTime<Utc>,
}

impl LockInfo {
    /// Creates a new lease info.
    #[must_use]
    pub fn new(holder: &str, operation: &str) -> Self {
        Self {
            lock_id: Uuid::new_v4().to_string(),
            holder: holder.to_string(),
            operation: operation.to_string(),
            acquired_at: Utc::now(),
        }
    }
}

type LeaseMap = Arc<Mutex<HashMap<AddonIdentity, LockInfo>>>;

/// In-process lease table keyed by identity.
#[derive(Debug, Clone)]
pub struct IdentityLocks {
    holder: String,
    held: LeaseMap,
}

impl Default for IdentityLocks {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityLocks {
    /// Creates an empty lease table owned by this process.
    #[must_use]
    pub fn new() -> Self {
        Self {
            holder: generate_holder_id(),
            held: Arc::default(),
        }
    }

    /// Takes the lease for an identity.
    ///
    /// # Errors
    ///
    /// Returns the existing lease if another call holds it.
    pub fn try_acquire(&self, identity: &AddonIdentity, operation: &str) -> Result<IdentityLease, LockInfo> {
        let mut held = self.held.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(existing) = held.get(identity) {
            return Err(existing.clone());
        }

        let info = LockInfo::new(&self.holder, operation);
        debug!("Acquired lease {} on {identity} for {operation}", info.lock_id);
        held.insert(identity.clone(), info.clone());

        Ok(IdentityLease {
            identity: identity.clone(),
            info,
            held: Arc::clone(&self.held),
        })
    }

    /// Returns the lease currently held on an identity.
    #[must_use]
    pub fn holder_of(&self, identity: &AddonIdentity) -> Option<LockInfo> {
        self.held
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(identity)
            .cloned()
    }

    /// Returns every identity matching the filter that currently holds a
    /// lease.
    #[must_use]
    pub fn held_in(&self, filter: &PartialIdentity) -> Vec<AddonIdentity> {
        self.held
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .keys()
            .filter(|identity| filter.matches(identity))
            .cloned()
            .collect()
    }
}

/// A held lease, released on drop.
#[derive(Debug)]
pub struct IdentityLease {
    identity: AddonIdentity,
    info: LockInfo,
    held: LeaseMap,
}

impl IdentityLease {
    /// Gets the lease info.
    #[must_use]
    pub const fn info(&self) -> &LockInfo {
        &self.info
    }
}

impl Drop for IdentityLease {
    fn drop(&mut self) {
        let mut held = self.held.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if held
            .get(&self.identity)
            .is_some_and(|current| current.lock_id == self.info.lock_id)
        {
            held.remove(&self.identity);
            debug!("Released lease {} on {}", self.info.lock_id, self.identity);
        }
    }
}

/// Generates a unique holder identifier for the current process.
#[must_use]
pub fn generate_holder_id() -> String {
    let hostname = hostname::get().map_or_else(|_| String::from("unknown"), |h| h.to_string_lossy().to_string());

    let pid = std::process::id();
    let uuid = &Uuid::new_v4().to_string()[..8];

    format!("{hostname}-{pid}-{uuid}")
}
