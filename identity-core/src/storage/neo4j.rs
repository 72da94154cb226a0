//! Neo4j storage implementation
//!
//! This module provides a Neo4j-backed implementation of the contact
//! repository. Every request runs inside an explicit Neo4j transaction.
//!
//! ## Schema
//!
//! ```cypher
//! // Nodes
//! (:Contact {
//!     id: Int,
//!     email: String?,
//!     phone_number: String?,
//!     link_precedence: String,  // "primary" | "secondary"
//!     linked_id: Int?,
//!     created_at: String,       // RFC 3339
//!     updated_at: String,
//!     deleted_at: String?
//! })
//!
//! (:ContactSequence { name: "contact", next: Int })
//!
//! // Relationships
//! (:Contact)-[:LINKED_TO]->(:Contact)  // secondary -> primary
//!
//! // Constraints and indexes
//! CREATE CONSTRAINT contact_id IF NOT EXISTS FOR (c:Contact) REQUIRE c.id IS UNIQUE;
//! CREATE CONSTRAINT contact_sequence_name IF NOT EXISTS FOR (s:ContactSequence) REQUIRE s.name IS UNIQUE;
//! CREATE INDEX contact_email IF NOT EXISTS FOR (c:Contact) ON (c.email);
//! CREATE INDEX contact_phone_number IF NOT EXISTS FOR (c:Contact) ON (c.phone_number);
//! CREATE INDEX contact_linked_id IF NOT EXISTS FOR (c:Contact) ON (c.linked_id);
//! ```

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use neo4rs::{Graph, Node, Query, Txn, query};
use std::sync::Arc;
use tracing::{debug, info};

use crate::types::{Contact, ContactId, NewContact};

use super::traits::{ContactRepository, ContactTransaction};

/// Configuration for Neo4j connection
#[derive(Clone, Debug)]
pub struct Neo4jConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
}

impl Default for Neo4jConfig {
    fn default() -> Self {
        Self {
            uri: std::env::var("NEO4J_URI").unwrap_or_else(|_| "bolt://localhost:7687".to_string()),
            user: std::env::var("NEO4J_USER").unwrap_or_else(|_| "neo4j".to_string()),
            password: std::env::var("NEO4J_PASSWORD").unwrap_or_else(|_| "password".to_string()),
        }
    }
}

/// The sequence constraint keeps two first inserts on an empty database from
/// each creating their own `ContactSequence` node.
const SCHEMA_STATEMENTS: [&str; 5] = [
    "CREATE CONSTRAINT contact_id IF NOT EXISTS FOR (c:Contact) REQUIRE c.id IS UNIQUE",
    "CREATE CONSTRAINT contact_sequence_name IF NOT EXISTS FOR (s:ContactSequence) REQUIRE s.name IS UNIQUE",
    "CREATE INDEX contact_email IF NOT EXISTS FOR (c:Contact) ON (c.email)",
    "CREATE INDEX contact_phone_number IF NOT EXISTS FOR (c:Contact) ON (c.phone_number)",
    "CREATE INDEX contact_linked_id IF NOT EXISTS FOR (c:Contact) ON (c.linked_id)",
];

/// Neo4j client wrapper
#[derive(Clone)]
pub struct Neo4jClient {
    graph: Arc<Graph>,
}

impl Neo4jClient {
    /// Connect and make sure the contact schema exists
    pub async fn new(config: Neo4jConfig) -> Result<Self> {
        info!("Connecting to Neo4j at {}", config.uri);

        let graph = Graph::new(&config.uri, &config.user, &config.password)
            .await
            .with_context(|| format!("failed to connect to Neo4j at {}", config.uri))?;

        let client = Self {
            graph: Arc::new(graph),
        };

        client.init_schema().await?;

        info!("Connected to Neo4j successfully");
        Ok(client)
    }

    async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA_STATEMENTS {
            if let Err(e) = self.graph.run(query(statement)).await {
                // Older servers reject IF NOT EXISTS on an existing index name
                debug!("Schema statement result: {:?}", e);
            }
        }

        info!("Neo4j contact schema initialized");
        Ok(())
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }
}

/// Neo4j-backed implementation of ContactRepository
pub struct Neo4jContactRepository {
    client: Neo4jClient,
}

impl Neo4jContactRepository {
    pub fn new(client: Neo4jClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ContactRepository for Neo4jContactRepository {
    async fn begin(&self) -> Result<Box<dyn ContactTransaction>> {
        let txn = self
            .client
            .graph
            .start_txn()
            .await
            .context("failed to start Neo4j transaction")?;
        Ok(Box::new(Neo4jTransaction { txn }))
    }

    async fn list_all(&self) -> Result<Vec<Contact>> {
        let mut result = self
            .client
            .graph
            .execute(query("MATCH (c:Contact) RETURN c ORDER BY c.id"))
            .await?;

        let mut contacts = Vec::new();
        while let Some(row) = result.next().await? {
            let node: Node = row.get("c")?;
            contacts.push(contact_from_node(&node)?);
        }
        Ok(contacts)
    }
}

/// A contact transaction backed by a Neo4j explicit transaction
pub struct Neo4jTransaction {
    txn: Txn,
}

impl Neo4jTransaction {
    async fn fetch(&mut self, q: Query) -> Result<Vec<Contact>> {
        let mut stream = self.txn.execute(q).await?;

        let mut contacts = Vec::new();
        while let Some(row) = stream.next(self.txn.handle()).await? {
            let node: Node = row.get("c")?;
            contacts.push(contact_from_node(&node)?);
        }
        Ok(contacts)
    }
}

#[async_trait]
impl ContactTransaction for Neo4jTransaction {
    async fn find_by_identifiers(
        &mut self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<Vec<Contact>> {
        let q = query(
            "MATCH (c:Contact)
            WHERE ($email IS NOT NULL AND c.email = $email)
               OR ($phone IS NOT NULL AND c.phone_number = $phone)
            RETURN c
            ORDER BY c.id",
        )
        .param("email", email.map(String::from))
        .param("phone", phone_number.map(String::from));

        let contacts = self.fetch(q).await?;
        debug!("Matched {} Neo4j contacts", contacts.len());
        Ok(contacts)
    }

    async fn find_by_id(&mut self, id: ContactId) -> Result<Option<Contact>> {
        let q = query("MATCH (c:Contact {id: $id}) RETURN c").param("id", id);
        Ok(self.fetch(q).await?.into_iter().next())
    }

    async fn find_cluster(&mut self, primary_id: ContactId) -> Result<Vec<Contact>> {
        let q = query(
            "MATCH (c:Contact)
            WHERE c.id = $id OR c.linked_id = $id
            RETURN c
            ORDER BY c.id",
        )
        .param("id", primary_id);

        self.fetch(q).await
    }

    async fn insert(&mut self, contact: NewContact) -> Result<Contact> {
        let now = Utc::now().to_rfc3339();

        // The sequence node is write-locked until commit, so ids stay ordered
        let q = query(
            "MERGE (s:ContactSequence {name: 'contact'})
            ON CREATE SET s.next = 1
            WITH s, s.next AS id
            SET s.next = id + 1
            CREATE (c:Contact {
                id: id,
                email: $email,
                phone_number: $phone,
                link_precedence: $precedence,
                linked_id: $linked_id,
                created_at: $now,
                updated_at: $now
            })
            WITH c
            OPTIONAL MATCH (p:Contact {id: $linked_id})
            FOREACH (_ IN CASE WHEN p IS NULL THEN [] ELSE [1] END |
                CREATE (c)-[:LINKED_TO]->(p))
            RETURN c",
        )
        .param("email", contact.email)
        .param("phone", contact.phone_number)
        .param("precedence", contact.link_precedence.as_str())
        .param("linked_id", contact.linked_id)
        .param("now", now);

        let created = self
            .fetch(q)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Neo4j returned no row for created contact"))?;

        info!(
            "Created Neo4j contact {} ({})",
            created.id, created.link_precedence
        );
        Ok(created)
    }

    async fn demote(&mut self, contact_id: ContactId, linked_id: ContactId) -> Result<()> {
        let now = Utc::now().to_rfc3339();

        let q = query(
            "MATCH (c:Contact {id: $id}), (p:Contact {id: $linked_id})
            OPTIONAL MATCH (c)-[old:LINKED_TO]->()
            DELETE old
            WITH DISTINCT c, p
            SET c.link_precedence = 'secondary',
                c.linked_id = $linked_id,
                c.updated_at = $now
            MERGE (c)-[:LINKED_TO]->(p)
            RETURN c",
        )
        .param("id", contact_id)
        .param("linked_id", linked_id)
        .param("now", now);

        if self.fetch(q).await?.is_empty() {
            return Err(anyhow!(
                "Contact not found: {} (or its new primary {})",
                contact_id,
                linked_id
            ));
        }

        debug!("Demoted Neo4j contact {} under {}", contact_id, linked_id);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.txn
            .commit()
            .await
            .context("failed to commit Neo4j transaction")
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.txn
            .rollback()
            .await
            .context("failed to roll back Neo4j transaction")
    }
}

// ============================================================================
// Helper functions
// ============================================================================

fn contact_from_node(node: &Node) -> Result<Contact> {
    let precedence: String = node.get("link_precedence")?;

    Ok(Contact {
        id: node.get("id")?,
        email: node.get("email").ok(),
        phone_number: node.get("phone_number").ok(),
        link_precedence: precedence.parse().map_err(|e: String| anyhow!(e))?,
        linked_id: node.get("linked_id").ok(),
        created_at: parse_timestamp(node, "created_at")?,
        updated_at: parse_timestamp(node, "updated_at")?,
        deleted_at: parse_timestamp(node, "deleted_at").ok(),
    })
}

fn parse_timestamp(node: &Node, field: &str) -> Result<DateTime<Utc>> {
    let raw: String = node.get(field)?;
    let dt = DateTime::parse_from_rfc3339(&raw)
        .with_context(|| format!("invalid {field} timestamp: {raw}"))?;
    Ok(dt.with_timezone(&Utc))
}
