use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cluster::{self, ClusterPlan, Resolution};
use crate::consolidate::{KnownIdentifiers, consolidate};
use crate::errors::{ReconcileError, Result};
use crate::locks::{KeyedLocks, LockKey, LockSet};
use crate::storage::{ContactRepository, ContactTransaction};
use crate::types::{ConsolidatedContact, Contact, NewContact, Observation};

/// Which fields a new secondary record carries when an observation adds
/// information to an existing cluster
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecondaryFieldPolicy {
    /// Store both submitted fields, even one the cluster already knows
    #[default]
    Observation,
    /// Store only the fields the cluster did not know yet
    NovelOnly,
}

/// Configuration for the reconciliation engine
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub secondary_fields: SecondaryFieldPolicy,
}

/// Orchestrates one reconciliation request per `identify` call
///
/// Each call runs inside a single repository transaction while holding the
/// locks for its identifiers and for every cluster it touches.
#[derive(Clone)]
pub struct ReconciliationEngine {
    repository: Arc<dyn ContactRepository>,
    locks: KeyedLocks,
    config: EngineConfig,
}

impl ReconciliationEngine {
    pub fn new(repository: Arc<dyn ContactRepository>, config: EngineConfig) -> Self {
        Self {
            repository,
            locks: KeyedLocks::new(),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Reconcile an observation and return the consolidated view of its cluster
    pub async fn identify(
        &self,
        email: Option<String>,
        phone_number: Option<String>,
    ) -> Result<ConsolidatedContact> {
        let observation = Observation::new(email, phone_number)?;

        let _identifiers = self
            .locks
            .lock_all(LockKey::for_observation(&observation))
            .await;

        let mut tx = self
            .repository
            .begin()
            .await
            .map_err(ReconcileError::unavailable)?;

        match self.reconcile(tx.as_mut(), &observation).await {
            Ok((contact, _clusters)) => {
                // Cluster locks are released only after the writes are visible
                tx.commit().await.map_err(ReconcileError::unavailable)?;
                Ok(contact)
            },
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("Rollback after failed identify also failed: {:#}", rollback_err);
                }
                Err(err)
            },
        }
    }

    /// Every stored contact, for inspection
    pub async fn list_contacts(&self) -> Result<Vec<Contact>> {
        self.repository
            .list_all()
            .await
            .map_err(ReconcileError::unavailable)
    }

    async fn reconcile(
        &self,
        tx: &mut dyn ContactTransaction,
        observation: &Observation,
    ) -> Result<(ConsolidatedContact, LockSet)> {
        let (resolution, clusters) = self.resolve_locked(tx, observation).await?;

        let plan = match resolution {
            Resolution::NoCluster => {
                let primary = tx
                    .insert(NewContact::primary(
                        observation.email().map(String::from),
                        observation.phone_number().map(String::from),
                    ))
                    .await
                    .map_err(ReconcileError::unavailable)?;

                info!("Created primary contact {}", primary.id);
                return Ok((consolidate(&primary, std::slice::from_ref(&primary)), clusters));
            },
            Resolution::Cluster(plan) => plan,
        };

        self.apply_demotions(tx, &plan).await?;

        let known = KnownIdentifiers::collect(&plan.primary, &plan.members);
        if let Some(secondary) = self.secondary_for(&plan, &known, observation) {
            let created = tx
                .insert(secondary)
                .await
                .map_err(ReconcileError::unavailable)?;
            info!(
                "Created secondary contact {} under primary {}",
                created.id, plan.primary.id
            );
        }

        let members = tx
            .find_cluster(plan.primary.id)
            .await
            .map_err(ReconcileError::unavailable)?;

        Ok((consolidate(&plan.primary, &members), clusters))
    }

    /// Resolve the observation's cluster while holding the locks of every
    /// touched primary. Retries if a concurrent merge changed the touched
    /// primaries while this request was waiting for their locks.
    async fn resolve_locked(
        &self,
        tx: &mut dyn ContactTransaction,
        observation: &Observation,
    ) -> Result<(Resolution, LockSet)> {
        let mut primaries = self.touched_primaries(tx, observation).await?;

        loop {
            let clusters = self
                .locks
                .lock_all(primaries.iter().map(|p| LockKey::Cluster(p.id)))
                .await;

            let current = self.touched_primaries(tx, observation).await?;
            if same_ids(&current, &primaries) {
                let resolution = cluster::plan(tx, current).await?;
                return Ok((resolution, clusters));
            }

            debug!("Touched clusters changed while waiting for locks, retrying");
            drop(clusters);
            primaries = current;
        }
    }

    async fn touched_primaries(
        &self,
        tx: &mut dyn ContactTransaction,
        observation: &Observation,
    ) -> Result<Vec<Contact>> {
        let matches = tx
            .find_by_identifiers(observation.email(), observation.phone_number())
            .await
            .map_err(ReconcileError::unavailable)?;

        cluster::touched_primaries(tx, &matches).await
    }

    async fn apply_demotions(&self, tx: &mut dyn ContactTransaction, plan: &ClusterPlan) -> Result<()> {
        if !plan.is_merge() {
            return Ok(());
        }

        for demotion in &plan.demotions {
            tx.demote(demotion.contact_id, demotion.linked_id)
                .await
                .map_err(ReconcileError::unavailable)?;
        }

        info!(
            "Merged {} contacts into primary {}",
            plan.demotions.len(),
            plan.primary.id
        );
        Ok(())
    }

    fn secondary_for(
        &self,
        plan: &ClusterPlan,
        known: &KnownIdentifiers,
        observation: &Observation,
    ) -> Option<NewContact> {
        let novel_email = observation.email().filter(|e| !known.knows_email(e));
        let novel_phone = observation.phone_number().filter(|p| !known.knows_phone(p));

        if novel_email.is_none() && novel_phone.is_none() {
            return None;
        }

        let (email, phone_number) = match self.config.secondary_fields {
            SecondaryFieldPolicy::Observation => (observation.email(), observation.phone_number()),
            SecondaryFieldPolicy::NovelOnly => (novel_email, novel_phone),
        };

        Some(NewContact::secondary(
            email.map(String::from),
            phone_number.map(String::from),
            plan.primary.id,
        ))
    }
}

fn same_ids(a: &[Contact], b: &[Contact]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.id == y.id)
}
