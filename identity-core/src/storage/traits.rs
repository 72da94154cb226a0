//! Storage trait definitions
//!
//! These traits define the interface for contact storage backends.
//! Implementations can be in-memory, Neo4j-backed, or any other storage system.

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{Contact, ContactId, NewContact};

/// Trait for contact storage backends
///
/// Implementations must be thread-safe (Send + Sync) as they will be
/// shared across multiple async tasks.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContactRepository: Send + Sync {
    /// Open a unit of work. Nothing it writes is visible to others until commit.
    async fn begin(&self) -> Result<Box<dyn ContactTransaction>>;

    /// Every stored record, ordered by id
    async fn list_all(&self) -> Result<Vec<Contact>>;
}

/// A single transaction against a contact store
///
/// Reads observe the transaction's own uncommitted writes. Dropping a
/// transaction without committing discards its writes.
#[async_trait]
pub trait ContactTransaction: Send {
    /// Records whose email equals `email` or whose phone equals `phone_number`,
    /// ordered by id. At least one of the two is present.
    async fn find_by_identifiers(
        &mut self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<Vec<Contact>>;

    /// Get a record by id
    async fn find_by_id(&mut self, id: ContactId) -> Result<Option<Contact>>;

    /// The primary plus every record linked to it, ordered by id
    async fn find_cluster(&mut self, primary_id: ContactId) -> Result<Vec<Contact>>;

    /// Store a new record, assigning its id and timestamps
    async fn insert(&mut self, contact: NewContact) -> Result<Contact>;

    /// Make `contact_id` a secondary of `linked_id` and refresh its `updated_at`
    async fn demote(&mut self, contact_id: ContactId, linked_id: ContactId) -> Result<()>;

    /// Publish all writes atomically
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard all writes
    async fn rollback(self: Box<Self>) -> Result<()>;
}
