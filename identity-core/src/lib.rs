//! # Identity reconciliation core
//!
//! Links contact records that share an email address or a phone number into
//! clusters. Each cluster has exactly one primary record; every other record
//! in it is a secondary pointing straight at that primary.
//!
//! ## Features
//!
//! - **Cluster resolution**: oldest primary wins when an observation bridges
//!   previously separate clusters, and the losers are flattened under it
//! - **Transactional storage**: every request runs in one repository
//!   transaction, so a failed merge leaves nothing behind
//! - **Keyed locking**: overlapping requests are serialized, disjoint ones run
//!   in parallel
//! - **Pluggable backends**: in-memory store and, with the `neo4j` feature,
//!   a Neo4j graph store
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use identity_core::{EngineConfig, InMemoryContactRepository, ReconciliationEngine, Result};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let repository = Arc::new(InMemoryContactRepository::new());
//!     let engine = ReconciliationEngine::new(repository, EngineConfig::default());
//!
//!     let contact = engine
//!         .identify(Some("doc@hillvalley.edu".to_string()), Some("123456".to_string()))
//!         .await?;
//!     println!("primary contact: {}", contact.primary_contact_id);
//!
//!     Ok(())
//! }
//! ```

pub mod cluster;
mod consolidate;
mod engine;
mod errors;
pub mod locks;
pub mod storage;
mod types;

pub use consolidate::OrderedSet;
pub use engine::{EngineConfig, ReconciliationEngine, SecondaryFieldPolicy};
pub use errors::{ReconcileError, Result};
pub use storage::{ContactRepository, ContactTransaction, InMemoryContactRepository};
#[cfg(feature = "neo4j")]
pub use storage::{Neo4jClient, Neo4jConfig, Neo4jContactRepository};
pub use types::{
    ConsolidatedContact, Contact, ContactId, Demotion, LinkPrecedence, NewContact, Observation,
};
