//! ACL descriptors attached to records and groups.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::time::epoch_ms;

/// The kind of principal a permission names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    User,
    Group,
    Org,
    Domain,
    Anyone,
    AnyoneWithLink,
}

/// Access level granted by a permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PermissionType {
    Owner,
    Write,
    Comment,
    Read,
}

/// A directed ACL entry: principal -> resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    pub entity_type: EntityType,
    #[serde(rename = "type")]
    pub permission_type: PermissionType,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl Permission {
    #[must_use]
    pub fn new(entity_type: EntityType, permission_type: PermissionType) -> Self {
        Self {
            entity_type,
            permission_type,
            external_id: None,
            email: None,
        }
    }

    /// Owner permission for a user identified by id + email.
    #[must_use]
    pub fn owner(external_id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            entity_type: EntityType::User,
            permission_type: PermissionType::Owner,
            external_id: Some(external_id.into()),
            email: Some(email.into()),
        }
    }

    /// Reader permission for a user identified by email.
    #[must_use]
    pub fn user_reader(email: impl Into<String>) -> Self {
        Self {
            entity_type: EntityType::User,
            permission_type: PermissionType::Read,
            external_id: None,
            email: Some(email.into()),
        }
    }

    /// Permission for a group identified by its external id.
    #[must_use]
    pub fn group(external_id: impl Into<String>, permission_type: PermissionType) -> Self {
        Self {
            entity_type: EntityType::Group,
            permission_type,
            external_id: Some(external_id.into()),
            email: None,
        }
    }

    /// Identity used for set comparison: who is named, regardless of which
    /// identifier field carried the name.
    #[must_use]
    pub fn identity(&self) -> (EntityType, String, PermissionType) {
        let subject = self
            .external_id
            .clone()
            .or_else(|| self.email.clone())
            .unwrap_or_default();
        (self.entity_type, subject, self.permission_type)
    }

    /// Multiset equality over `(entity_type, external_id|email, type)` tuples.
    #[must_use]
    pub fn sets_equal(a: &[Permission], b: &[Permission]) -> bool {
        if a.len() != b.len() {
            return false;
        }
        let mut left: Vec<_> = a.iter().map(Permission::identity).collect();
        let mut right: Vec<_> = b.iter().map(Permission::identity).collect();
        left.sort();
        right.sort();
        left == right
    }

    /// Edge document for the permission collection.
    #[must_use]
    pub fn to_edge_attrs(&self) -> Value {
        let now = epoch_ms();
        serde_json::json!({
            "type": self.permission_type,
            "entityType": self.entity_type,
            "externalPermissionId": self.external_id,
            "email": self.email,
            "createdAtTimestamp": now,
            "updatedAtTimestamp": now,
        })
    }
}
