//! Builds the consolidated response view of a cluster

use std::borrow::Borrow;
use std::collections::HashSet;
use std::hash::Hash;

use crate::types::{ConsolidatedContact, Contact};

/// Set of distinct values that remembers first-insertion order
#[derive(Debug, Clone)]
pub struct OrderedSet<T> {
    seen: HashSet<T>,
    items: Vec<T>,
}

impl<T: Eq + Hash + Clone> OrderedSet<T> {
    pub fn new() -> Self {
        Self {
            seen: HashSet::new(),
            items: Vec::new(),
        }
    }

    /// Returns false if the value was already present
    pub fn insert(&mut self, value: T) -> bool {
        if self.seen.contains(&value) {
            return false;
        }
        self.seen.insert(value.clone());
        self.items.push(value);
        true
    }

    pub fn contains<Q>(&self, value: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.seen.contains(value)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn into_vec(self) -> Vec<T> {
        self.items
    }
}

impl<T: Eq + Hash + Clone> Default for OrderedSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Eq + Hash + Clone> FromIterator<T> for OrderedSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut set = Self::new();
        for value in iter {
            set.insert(value);
        }
        set
    }
}

/// Emails and phone numbers already recorded somewhere in a cluster
#[derive(Debug, Default)]
pub(crate) struct KnownIdentifiers {
    pub emails: OrderedSet<String>,
    pub phone_numbers: OrderedSet<String>,
}

impl KnownIdentifiers {
    /// Collects the identifiers of `members`, primary first
    pub(crate) fn collect(primary: &Contact, members: &[Contact]) -> Self {
        let ordered = std::iter::once(primary).chain(members.iter().filter(|m| m.id != primary.id));

        let mut known = Self::default();
        for contact in ordered {
            if let Some(email) = contact.email.as_deref().filter(|e| !e.is_empty()) {
                known.emails.insert(email.to_string());
            }
            if let Some(phone) = contact.phone_number.as_deref().filter(|p| !p.is_empty()) {
                known.phone_numbers.insert(phone.to_string());
            }
        }
        known
    }

    pub(crate) fn knows_email(&self, email: &str) -> bool {
        self.emails.contains(email)
    }

    pub(crate) fn knows_phone(&self, phone: &str) -> bool {
        self.phone_numbers.contains(phone)
    }
}

/// Response view: the primary's identifiers lead, then every other member's in
/// id order, duplicates dropped.
pub(crate) fn consolidate(primary: &Contact, members: &[Contact]) -> ConsolidatedContact {
    let known = KnownIdentifiers::collect(primary, members);

    let secondary_contact_ids = members
        .iter()
        .filter(|m| m.id != primary.id)
        .map(|m| m.id)
        .collect();

    ConsolidatedContact {
        primary_contact_id: primary.id,
        emails: known.emails.into_vec(),
        phone_numbers: known.phone_numbers.into_vec(),
        secondary_contact_ids,
    }
}
