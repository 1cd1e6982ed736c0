//! Groups - named computation namespaces owning a set of labels.

use serde::{Deserialize, Serialize};

use super::GroupId;

/// A named computation namespace.
///
/// A group corresponds to a test or a target schema: it owns the labels
/// computed for runs of that test, and label names resolve within it first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    /// Display name of the group
    pub name: String,
    /// Owner (team or user) this group belongs to
    pub owner: String,
}

impl Group {
    /// Create a new group with a fresh id.
    pub fn new(name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            id: GroupId::new(),
            name: name.into(),
            owner: owner.into(),
        }
    }
}
