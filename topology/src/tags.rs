// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! NAT tag interning and value-typed tag sets.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Interned NAT tag name.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TagId(u32);

/// The per-run intern table for NAT tag names.
#[derive(Debug, Default)]
pub struct TagTable {
    names: Vec<String>,
    by_name: BTreeMap<String, TagId>,
}

impl TagTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, name: &str) -> TagId {
        if let Some(&id) = self.by_name.get(name) {
            return id;
        }
        let Ok(raw) = u32::try_from(self.names.len()) else {
            unreachable!("tag table exceeds key space")
        };
        let id = TagId(raw);
        self.names.push(name.to_string());
        self.by_name.insert(name.to_string(), id);
        id
    }

    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<TagId> {
        self.by_name.get(name).copied()
    }

    #[must_use]
    pub fn name(&self, tag: TagId) -> &str {
        &self.names[tag.0 as usize]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// The set of NAT tags active somewhere, e.g. within one NAT domain.
///
/// This is a plain value type: equality, ordering and hashing look at the
/// contained tags, never at any identity, so sets can serve as lookup and
/// merge keys.
#[derive(
    Debug, Default, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct NatSet(BTreeSet<TagId>);

impl NatSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn contains(&self, tag: TagId) -> bool {
        self.0.contains(&tag)
    }

    pub fn insert(&mut self, tag: TagId) -> bool {
        self.0.insert(tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = TagId> {
        self.0.iter().copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Tag names in sorted order, for user-visible output.
    #[must_use]
    pub fn names<'t>(&self, tags: &'t TagTable) -> Vec<&'t str> {
        let mut names: Vec<&str> = self.0.iter().map(|&t| tags.name(t)).collect();
        names.sort_unstable();
        names
    }
}

impl FromIterator<TagId> for NatSet {
    fn from_iter<I: IntoIterator<Item = TagId>>(iter: I) -> Self {
        NatSet(iter.into_iter().collect())
    }
}
