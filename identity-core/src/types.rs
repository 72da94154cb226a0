use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{ReconcileError, Result};

/// Contact ids are assigned by the repository in creation order
pub type ContactId = i64;

/// Position of a record within its cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkPrecedence {
    Primary,
    Secondary,
}

impl LinkPrecedence {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkPrecedence::Primary => "primary",
            LinkPrecedence::Secondary => "secondary",
        }
    }
}

impl fmt::Display for LinkPrecedence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LinkPrecedence {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "primary" => Ok(LinkPrecedence::Primary),
            "secondary" => Ok(LinkPrecedence::Secondary),
            other => Err(format!("unknown link precedence: {other}")),
        }
    }
}

/// A stored contact record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: ContactId,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub link_precedence: LinkPrecedence,
    /// Id of the cluster's primary; set iff this record is a secondary
    pub linked_id: Option<ContactId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Reserved soft-delete marker, never set
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Contact {
    pub fn is_primary(&self) -> bool {
        self.link_precedence == LinkPrecedence::Primary
    }

    /// Id of the primary owning this record
    pub fn cluster_id(&self) -> ContactId {
        match self.link_precedence {
            LinkPrecedence::Primary => self.id,
            LinkPrecedence::Secondary => self.linked_id.unwrap_or(self.id),
        }
    }
}

/// Insert payload for a new contact record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContact {
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub linked_id: Option<ContactId>,
    pub link_precedence: LinkPrecedence,
}

impl NewContact {
    pub fn primary(email: Option<String>, phone_number: Option<String>) -> Self {
        Self {
            email,
            phone_number,
            linked_id: None,
            link_precedence: LinkPrecedence::Primary,
        }
    }

    pub fn secondary(
        email: Option<String>,
        phone_number: Option<String>,
        primary_id: ContactId,
    ) -> Self {
        Self {
            email,
            phone_number,
            linked_id: Some(primary_id),
            link_precedence: LinkPrecedence::Secondary,
        }
    }
}

/// Merge command: turn `contact_id` into a secondary of `linked_id`
///
/// Applies to losing primaries as well as to their secondaries, which get
/// re-pointed at the surviving primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Demotion {
    pub contact_id: ContactId,
    pub linked_id: ContactId,
}

/// A validated `(email, phone)` pair submitted for reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    email: Option<String>,
    phone_number: Option<String>,
}

impl Observation {
    /// Empty strings count as absent. At least one identifier must remain.
    pub fn new(email: Option<String>, phone_number: Option<String>) -> Result<Self> {
        let email = email.filter(|e| !e.is_empty());
        let phone_number = phone_number.filter(|p| !p.is_empty());

        if email.is_none() && phone_number.is_none() {
            return Err(ReconcileError::InvalidRequest(
                "either email or phoneNumber must be provided".to_string(),
            ));
        }

        Ok(Self {
            email,
            phone_number,
        })
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn phone_number(&self) -> Option<&str> {
        self.phone_number.as_deref()
    }
}

/// Consolidated view of one cluster, as returned by `identify`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidatedContact {
    pub primary_contact_id: ContactId,
    pub emails: Vec<String>,
    pub phone_numbers: Vec<String>,
    pub secondary_contact_ids: Vec<ContactId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observation_rejects_missing_identifiers() {
        let err = Observation::new(None, None).unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidRequest(_)));

        let err = Observation::new(Some(String::new()), Some(String::new())).unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidRequest(_)));
    }

    #[test]
    fn test_observation_drops_empty_fields() {
        let obs = Observation::new(Some(String::new()), Some("123".to_string())).unwrap();
        assert_eq!(obs.email(), None);
        assert_eq!(obs.phone_number(), Some("123"));
    }

    #[test]
    fn test_contact_serializes_camel_case() {
        let now = Utc::now();
        let contact = Contact {
            id: 7,
            email: Some("lorraine@hillvalley.edu".to_string()),
            phone_number: None,
            link_precedence: LinkPrecedence::Secondary,
            linked_id: Some(1),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        let json = serde_json::to_value(&contact).unwrap();
        assert_eq!(json["phoneNumber"], serde_json::Value::Null);
        assert_eq!(json["linkPrecedence"], "secondary");
        assert_eq!(json["linkedId"], 1);
        assert!(json.get("createdAt").is_some());
        assert_eq!(contact.cluster_id(), 1);
    }

    #[test]
    fn test_link_precedence_parse() {
        assert_eq!("primary".parse::<LinkPrecedence>(), Ok(LinkPrecedence::Primary));
        assert_eq!("secondary".parse::<LinkPrecedence>(), Ok(LinkPrecedence::Secondary));
        assert!("tertiary".parse::<LinkPrecedence>().is_err());
    }
}
