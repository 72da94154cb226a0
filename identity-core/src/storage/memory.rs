//! In-memory storage implementation
//!
//! Records live in an ordered map protected by a `parking_lot` lock.
//! Data is lost when the process exits.

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

use crate::types::{Contact, ContactId, LinkPrecedence, NewContact};

use super::traits::{ContactRepository, ContactTransaction};

#[derive(Debug)]
struct Shared {
    contacts: RwLock<BTreeMap<ContactId, Contact>>,
    /// Next id to hand out. Timestamps are taken under the same lock so
    /// `created_at` never runs backwards against id order.
    next_id: Mutex<ContactId>,
    available: AtomicBool,
}

impl Shared {
    fn ensure_available(&self) -> Result<()> {
        if !self.available.load(Ordering::Acquire) {
            bail!("in-memory contact store is offline");
        }
        Ok(())
    }
}

/// In-memory implementation of ContactRepository
///
/// Suitable for development, tests and single-instance deployments.
#[derive(Clone, Debug)]
pub struct InMemoryContactRepository {
    shared: Arc<Shared>,
}

impl InMemoryContactRepository {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                contacts: RwLock::new(BTreeMap::new()),
                next_id: Mutex::new(1),
                available: AtomicBool::new(true),
            }),
        }
    }

    /// Switch the store on or off. While off, every operation fails,
    /// including commits of transactions that are already open.
    pub fn set_available(&self, available: bool) {
        if !available {
            warn!("In-memory contact store taken offline");
        }
        self.shared.available.store(available, Ordering::Release);
    }

    /// Number of committed records
    pub fn len(&self) -> usize {
        self.shared.contacts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryContactRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContactRepository for InMemoryContactRepository {
    async fn begin(&self) -> Result<Box<dyn ContactTransaction>> {
        self.shared.ensure_available()?;
        Ok(Box::new(InMemoryTransaction {
            shared: self.shared.clone(),
            staged: BTreeMap::new(),
        }))
    }

    async fn list_all(&self) -> Result<Vec<Contact>> {
        self.shared.ensure_available()?;
        Ok(self.shared.contacts.read().values().cloned().collect())
    }
}

/// Transaction over the in-memory store
///
/// Writes are staged in an overlay keyed by id and copied into the shared
/// map on commit. Reads see committed records with the overlay on top.
pub struct InMemoryTransaction {
    shared: Arc<Shared>,
    staged: BTreeMap<ContactId, Contact>,
}

impl InMemoryTransaction {
    fn scan<F>(&self, predicate: F) -> Vec<Contact>
    where
        F: Fn(&Contact) -> bool,
    {
        let committed = self.shared.contacts.read();

        let mut found: Vec<Contact> = committed
            .values()
            .map(|c| self.staged.get(&c.id).unwrap_or(c))
            .filter(|c| predicate(c))
            .cloned()
            .collect();

        found.extend(
            self.staged
                .values()
                .filter(|c| !committed.contains_key(&c.id) && predicate(c))
                .cloned(),
        );

        found.sort_by_key(|c| c.id);
        found
    }

    fn current(&self, id: ContactId) -> Option<Contact> {
        self.staged
            .get(&id)
            .cloned()
            .or_else(|| self.shared.contacts.read().get(&id).cloned())
    }
}

#[async_trait]
impl ContactTransaction for InMemoryTransaction {
    async fn find_by_identifiers(
        &mut self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<Vec<Contact>> {
        self.shared.ensure_available()?;

        let found = self.scan(|c| {
            let email_match = email.is_some() && c.email.as_deref() == email;
            let phone_match = phone_number.is_some() && c.phone_number.as_deref() == phone_number;
            email_match || phone_match
        });

        debug!(
            "Matched {} contacts for email={:?} phone={:?}",
            found.len(),
            email,
            phone_number
        );
        Ok(found)
    }

    async fn find_by_id(&mut self, id: ContactId) -> Result<Option<Contact>> {
        self.shared.ensure_available()?;
        Ok(self.current(id))
    }

    async fn find_cluster(&mut self, primary_id: ContactId) -> Result<Vec<Contact>> {
        self.shared.ensure_available()?;
        Ok(self.scan(|c| c.id == primary_id || c.linked_id == Some(primary_id)))
    }

    async fn insert(&mut self, contact: NewContact) -> Result<Contact> {
        self.shared.ensure_available()?;

        // Ids handed out by a transaction that later rolls back are skipped
        let (id, now) = {
            let mut next_id = self.shared.next_id.lock();
            let id = *next_id;
            *next_id += 1;
            (id, Utc::now())
        };

        let stored = Contact {
            id,
            email: contact.email,
            phone_number: contact.phone_number,
            link_precedence: contact.link_precedence,
            linked_id: contact.linked_id,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        self.staged.insert(id, stored.clone());
        Ok(stored)
    }

    async fn demote(&mut self, contact_id: ContactId, linked_id: ContactId) -> Result<()> {
        self.shared.ensure_available()?;

        let Some(mut contact) = self.current(contact_id) else {
            bail!("Contact not found: {}", contact_id);
        };

        contact.link_precedence = LinkPrecedence::Secondary;
        contact.linked_id = Some(linked_id);
        contact.updated_at = Utc::now();

        self.staged.insert(contact_id, contact);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let InMemoryTransaction { shared, staged } = *self;
        shared.ensure_available()?;

        let count = staged.len();
        if count > 0 {
            let mut contacts = shared.contacts.write();
            contacts.extend(staged);
            debug!("Committed {} staged contact writes", count);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        if !self.staged.is_empty() {
            debug!("Discarded {} staged contact writes", self.staged.len());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_assigns_increasing_ids() {
        let repo = InMemoryContactRepository::new();
        let mut tx = repo.begin().await.unwrap();

        let first = tx
            .insert(NewContact::primary(Some("a@x.com".to_string()), None))
            .await
            .unwrap();
        let second = tx
            .insert(NewContact::primary(None, Some("123".to_string())))
            .await
            .unwrap();

        assert!(second.id > first.id);
        assert!(second.created_at >= first.created_at);
        assert!(first.is_primary());
        assert_eq!(first.linked_id, None);
        tx.commit().await.unwrap();

        assert_eq!(repo.len(), 2);
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_private() {
        let repo = InMemoryContactRepository::new();
        let mut tx = repo.begin().await.unwrap();

        tx.insert(NewContact::primary(Some("a@x.com".to_string()), None))
            .await
            .unwrap();

        // Visible inside the transaction
        let own = tx.find_by_identifiers(Some("a@x.com"), None).await.unwrap();
        assert_eq!(own.len(), 1);

        // Not visible outside it
        let mut other = repo.begin().await.unwrap();
        let foreign = other
            .find_by_identifiers(Some("a@x.com"), None)
            .await
            .unwrap();
        assert!(foreign.is_empty());
        assert!(repo.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_find_by_identifiers_matches_either_field() {
        let repo = InMemoryContactRepository::new();
        let mut tx = repo.begin().await.unwrap();
        tx.insert(NewContact::primary(Some("a@x.com".to_string()), None))
            .await
            .unwrap();
        tx.insert(NewContact::primary(None, Some("999".to_string())))
            .await
            .unwrap();
        tx.insert(NewContact::primary(Some("b@x.com".to_string()), Some("111".to_string())))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let mut tx = repo.begin().await.unwrap();
        let both = tx
            .find_by_identifiers(Some("a@x.com"), Some("999"))
            .await
            .unwrap();
        assert_eq!(both.iter().map(|c| c.id).collect::<Vec<_>>(), vec![1, 2]);

        let phone_only = tx.find_by_identifiers(None, Some("111")).await.unwrap();
        assert_eq!(phone_only.len(), 1);
        assert_eq!(phone_only[0].email.as_deref(), Some("b@x.com"));

        // An absent field never matches records where that field is absent
        let none = tx.find_by_identifiers(Some("c@x.com"), None).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_demote_and_find_cluster() {
        let repo = InMemoryContactRepository::new();
        let mut tx = repo.begin().await.unwrap();
        let p1 = tx
            .insert(NewContact::primary(Some("a@x.com".to_string()), None))
            .await
            .unwrap();
        let p2 = tx
            .insert(NewContact::primary(None, Some("999".to_string())))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let mut tx = repo.begin().await.unwrap();
        tx.demote(p2.id, p1.id).await.unwrap();

        let cluster = tx.find_cluster(p1.id).await.unwrap();
        assert_eq!(cluster.len(), 2);
        let demoted = tx.find_by_id(p2.id).await.unwrap().unwrap();
        assert_eq!(demoted.link_precedence, LinkPrecedence::Secondary);
        assert_eq!(demoted.linked_id, Some(p1.id));
        assert!(demoted.updated_at >= p2.updated_at);
        tx.commit().await.unwrap();

        let all = repo.list_all().await.unwrap();
        assert_eq!(all[1].linked_id, Some(p1.id));
    }

    #[tokio::test]
    async fn test_demote_missing_contact_fails() {
        let repo = InMemoryContactRepository::new();
        let mut tx = repo.begin().await.unwrap();
        assert!(tx.demote(42, 1).await.is_err());
    }

    #[tokio::test]
    async fn test_rollback_discards_everything() {
        let repo = InMemoryContactRepository::new();
        let mut tx = repo.begin().await.unwrap();
        let p1 = tx
            .insert(NewContact::primary(Some("a@x.com".to_string()), None))
            .await
            .unwrap();
        let p2 = tx
            .insert(NewContact::primary(None, Some("999".to_string())))
            .await
            .unwrap();
        tx.commit().await.unwrap();
        let before = repo.list_all().await.unwrap();

        let mut tx = repo.begin().await.unwrap();
        tx.demote(p2.id, p1.id).await.unwrap();
        tx.insert(NewContact::secondary(None, Some("555".to_string()), p1.id))
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(repo.list_all().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_offline_store_rejects_commit() {
        let repo = InMemoryContactRepository::new();
        let mut tx = repo.begin().await.unwrap();
        tx.insert(NewContact::primary(Some("a@x.com".to_string()), None))
            .await
            .unwrap();

        repo.set_available(false);
        assert!(tx.commit().await.is_err());
        assert!(repo.begin().await.is_err());
        assert!(repo.list_all().await.is_err());

        repo.set_available(true);
        assert!(repo.is_empty());
    }

    #[tokio::test]
    async fn test_ids_are_not_reused_after_rollback() {
        let repo = InMemoryContactRepository::new();

        let mut tx = repo.begin().await.unwrap();
        let discarded = tx
            .insert(NewContact::primary(Some("a@x.com".to_string()), None))
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        let mut tx = repo.begin().await.unwrap();
        let kept = tx
            .insert(NewContact::primary(Some("a@x.com".to_string()), None))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert!(kept.id > discarded.id);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_inserts_keep_created_at_in_id_order() {
        let repo = InMemoryContactRepository::new();

        let writers = (0..8).map(|writer| {
            let repo = repo.clone();
            tokio::spawn(async move {
                let mut tx = repo.begin().await.unwrap();
                for n in 0..500 {
                    tx.insert(NewContact::primary(None, Some(format!("{writer}-{n}"))))
                        .await
                        .unwrap();
                }
                tx.commit().await.unwrap();
            })
        });
        for writer in writers.collect::<Vec<_>>() {
            writer.await.unwrap();
        }

        let all = repo.list_all().await.unwrap();
        assert_eq!(all.len(), 4000);
        for pair in all.windows(2) {
            assert!(pair[0].id < pair[1].id);
            assert!(
                pair[0].created_at <= pair[1].created_at,
                "contact {} created after contact {}",
                pair[0].id,
                pair[1].id
            );
        }
    }
}
