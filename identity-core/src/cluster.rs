//! # Cluster resolution
//!
//! Turns the records matched by an observation into a plan for one cluster:
//! which primary is canonical, which records belong to the cluster, and which
//! records must be demoted or re-pointed when the observation bridges several
//! clusters.
//!
//! The canonical primary is the oldest touched primary by `created_at`, ties
//! broken by the smaller id. The choice never depends on the order in which
//! records were matched.

use std::collections::BTreeMap;
use tracing::debug;

use crate::errors::{ReconcileError, Result};
use crate::storage::ContactTransaction;
use crate::types::{Contact, ContactId, Demotion, LinkPrecedence};

/// Outcome of resolving a match set
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Nothing matched; the observation starts a new cluster
    NoCluster,
    Cluster(ClusterPlan),
}

/// Resolved cluster and the writes needed to make it whole
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterPlan {
    /// Canonical primary, as stored before any demotion
    pub primary: Contact,
    /// Every member with demotions applied, ordered by id
    pub members: Vec<Contact>,
    /// Empty unless several clusters are being merged
    pub demotions: Vec<Demotion>,
}

impl ClusterPlan {
    pub fn is_merge(&self) -> bool {
        !self.demotions.is_empty()
    }
}

/// Resolve a match set all the way to a cluster plan
pub async fn resolve(tx: &mut dyn ContactTransaction, matches: &[Contact]) -> Result<Resolution> {
    let primaries = touched_primaries(tx, matches).await?;
    plan(tx, primaries).await
}

/// Distinct primaries owning the matched records, ordered by id
pub async fn touched_primaries(
    tx: &mut dyn ContactTransaction,
    matches: &[Contact],
) -> Result<Vec<Contact>> {
    let mut primaries: BTreeMap<ContactId, Contact> = BTreeMap::new();

    for contact in matches {
        let owner = match contact.link_precedence {
            LinkPrecedence::Primary => {
                ensure_primary_shape(contact)?;
                contact.clone()
            },
            LinkPrecedence::Secondary => {
                let linked_id = contact.linked_id.ok_or_else(|| {
                    ReconcileError::inconsistent(format!(
                        "secondary contact {} has no linked id",
                        contact.id
                    ))
                })?;

                if let Some(known) = primaries.get(&linked_id) {
                    known.clone()
                } else {
                    fetch_primary(tx, contact.id, linked_id).await?
                }
            },
        };

        primaries.entry(owner.id).or_insert(owner);
    }

    debug!(
        "{} matched contacts resolve to primaries {:?}",
        matches.len(),
        primaries.keys().collect::<Vec<_>>()
    );
    Ok(primaries.into_values().collect())
}

/// Build the cluster plan for a set of touched primaries
pub async fn plan(tx: &mut dyn ContactTransaction, primaries: Vec<Contact>) -> Result<Resolution> {
    let Some(canonical) = select_canonical(&primaries).cloned() else {
        return Ok(Resolution::NoCluster);
    };

    let mut clusters = Vec::with_capacity(primaries.len());
    for primary in &primaries {
        let members = tx
            .find_cluster(primary.id)
            .await
            .map_err(ReconcileError::unavailable)?;
        check_cluster(primary, &members)?;
        clusters.push(members);
    }

    Ok(Resolution::Cluster(merge_plan(canonical, clusters)))
}

/// Oldest primary by creation time, smaller id on ties
pub fn select_canonical(primaries: &[Contact]) -> Option<&Contact> {
    primaries.iter().min_by_key(|p| (p.created_at, p.id))
}

/// Fold several clusters into the canonical one.
///
/// Every record of a losing cluster, its former primary included, is linked
/// straight to the canonical primary, so no secondary ever points at another
/// secondary.
pub fn merge_plan(canonical: Contact, clusters: Vec<Vec<Contact>>) -> ClusterPlan {
    let mut members = Vec::new();
    let mut demotions = Vec::new();

    for cluster in clusters {
        for mut member in cluster {
            let foreign = member.id != canonical.id && member.cluster_id() != canonical.id;
            if foreign {
                demotions.push(Demotion {
                    contact_id: member.id,
                    linked_id: canonical.id,
                });
                member.link_precedence = LinkPrecedence::Secondary;
                member.linked_id = Some(canonical.id);
            }
            members.push(member);
        }
    }

    members.sort_by_key(|m| m.id);
    members.dedup_by_key(|m| m.id);

    ClusterPlan {
        primary: canonical,
        members,
        demotions,
    }
}

async fn fetch_primary(
    tx: &mut dyn ContactTransaction,
    secondary_id: ContactId,
    linked_id: ContactId,
) -> Result<Contact> {
    let linked = tx
        .find_by_id(linked_id)
        .await
        .map_err(ReconcileError::unavailable)?
        .ok_or_else(|| {
            ReconcileError::inconsistent(format!(
                "secondary contact {secondary_id} links to missing contact {linked_id}"
            ))
        })?;

    if !linked.is_primary() {
        return Err(ReconcileError::inconsistent(format!(
            "secondary contact {secondary_id} links to contact {linked_id}, which is itself secondary"
        )));
    }
    ensure_primary_shape(&linked)?;

    Ok(linked)
}

fn ensure_primary_shape(contact: &Contact) -> Result<()> {
    if let Some(linked_id) = contact.linked_id {
        return Err(ReconcileError::inconsistent(format!(
            "primary contact {} carries linked id {}",
            contact.id, linked_id
        )));
    }
    Ok(())
}

fn check_cluster(primary: &Contact, members: &[Contact]) -> Result<()> {
    let mut saw_primary = false;

    for member in members {
        if member.id == primary.id {
            if !member.is_primary() {
                return Err(ReconcileError::inconsistent(format!(
                    "contact {} was resolved as a primary but is stored as secondary",
                    primary.id
                )));
            }
            saw_primary = true;
        } else if member.is_primary() {
            return Err(ReconcileError::inconsistent(format!(
                "contact {} links to {} but is stored as primary",
                member.id, primary.id
            )));
        }
    }

    if !saw_primary {
        return Err(ReconcileError::inconsistent(format!(
            "cluster of contact {} does not contain its primary",
            primary.id
        )));
    }
    Ok(())
}
