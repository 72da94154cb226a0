//! Keyed mutual exclusion for reconciliation requests
//!
//! Requests that share an identifier, or that touch the same cluster, must not
//! interleave their read-decide-write cycles. Each identifier and each cluster
//! primary gets its own async mutex, created on demand and dropped again once
//! nobody holds or waits for it.
//!
//! Callers take identifier keys first and cluster keys second, each batch in
//! sorted order. Holders of cluster keys never wait for identifier keys, so
//! the wait graph has no cycles.

use dashmap::DashMap;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::types::{ContactId, Observation};

/// Something a request can lock
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockKey {
    Email(String),
    Phone(String),
    Cluster(ContactId),
}

impl LockKey {
    /// Identifier keys for an observation
    pub fn for_observation(observation: &Observation) -> BTreeSet<LockKey> {
        let mut keys = BTreeSet::new();
        if let Some(email) = observation.email() {
            keys.insert(LockKey::Email(email.to_string()));
        }
        if let Some(phone) = observation.phone_number() {
            keys.insert(LockKey::Phone(phone.to_string()));
        }
        keys
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockKey::Email(email) => write!(f, "email:{email}"),
            LockKey::Phone(phone) => write!(f, "phone:{phone}"),
            LockKey::Cluster(id) => write!(f, "cluster:{id}"),
        }
    }
}

type Slots = DashMap<LockKey, Arc<Mutex<()>>>;

/// Table of on-demand async mutexes keyed by [`LockKey`]
#[derive(Clone, Default)]
pub struct KeyedLocks {
    slots: Arc<Slots>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock every key, in sorted order. Released when the returned set drops.
    pub async fn lock_all<I>(&self, keys: I) -> LockSet
    where
        I: IntoIterator<Item = LockKey>,
    {
        let keys: BTreeSet<LockKey> = keys.into_iter().collect();
        let mut held = Vec::with_capacity(keys.len());

        for key in keys {
            let slot = self
                .slots
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone();
            let guard = slot.lock_owned().await;
            held.push((key, guard));
        }

        LockSet {
            slots: self.slots.clone(),
            held,
        }
    }

    /// Number of live lock slots
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }
}

/// Locks held by one request
pub struct LockSet {
    slots: Arc<Slots>,
    held: Vec<(LockKey, OwnedMutexGuard<()>)>,
}

impl LockSet {
    pub fn keys(&self) -> impl Iterator<Item = &LockKey> {
        self.held.iter().map(|(key, _)| key)
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}

impl Drop for LockSet {
    fn drop(&mut self) {
        for (key, guard) in self.held.drain(..) {
            drop(guard);
            // Only the table itself still references an idle slot
            self.slots
                .remove_if(&key, |_, slot| Arc::strong_count(slot) == 1);
        }
    }
}
