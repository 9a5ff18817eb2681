//! Typed models for the RBAC service API.

use gatehouse_core::UserId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user known to the RBAC service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RbacUser {
    pub id: UserId,
}

/// A group in the RBAC service. Companies and tenants are both represented
/// as groups keyed by their own IDs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RbacGroup {
    pub id: Uuid,
}

/// A user's role-bearing membership in a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub group_id: Uuid,
    pub user_id: UserId,
    pub role: String,
}
