//! Contact storage abstractions
//!
//! This module defines the repository traits the reconciliation engine talks
//! to, allowing it to work with in-memory, Neo4j, or other storage
//! implementations.
//!
//! ## Available Backends
//!
//! - `memory`: In-memory storage behind a `parking_lot` lock (default)
//! - `neo4j`: Neo4j graph database storage (cargo feature `neo4j`)

mod memory;
#[cfg(feature = "neo4j")]
pub mod neo4j;
mod traits;

pub use memory::*;
#[cfg(feature = "neo4j")]
pub use neo4j::{Neo4jClient, Neo4jConfig, Neo4jContactRepository};
pub use traits::*;
