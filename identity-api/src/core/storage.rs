//! Contact repository selection
//!
//! Builds the repository named by `storage.backend` and hands it to the
//! engine as a trait object.

use anyhow::Result;
use identity_core::{
    ContactRepository, InMemoryContactRepository, Neo4jClient, Neo4jConfig, Neo4jContactRepository,
};
use std::sync::Arc;
use tracing::info;

use crate::core::config::{StorageBackend, StorageConfig};

pub async fn connect(config: &StorageConfig) -> Result<Arc<dyn ContactRepository>> {
    match config.backend {
        StorageBackend::Memory => {
            info!("Using in-memory contact store");
            Ok(Arc::new(InMemoryContactRepository::new()))
        },
        StorageBackend::Neo4j => {
            let client = Neo4jClient::new(Neo4jConfig {
                uri: config.neo4j.uri.clone(),
                user: config.neo4j.user.clone(),
                password: config.neo4j.password.clone(),
            })
            .await?;
            Ok(Arc::new(Neo4jContactRepository::new(client)))
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Neo4jSettings;

    #[tokio::test]
    async fn test_memory_backend_starts_empty() {
        let config = StorageConfig {
            backend: StorageBackend::Memory,
            neo4j: Neo4jSettings {
                uri: "bolt://localhost:7687".to_string(),
                user: "neo4j".to_string(),
                password: "password".to_string(),
            },
        };

        let repository = connect(&config).await.unwrap();
        assert!(repository.list_all().await.unwrap().is_empty());
    }
}
