//! Invite keys.
//!
//! An invite key binds an emailed invitation to a company role grant. A key
//! is bound to at most one user; depending on its type it is consumed at
//! bind time or by a later explicit action.

use chrono::{DateTime, Utc};
use gatehouse_core::{CompanyId, InviteId, TenantId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::InviteError;

/// Role granting administrative rights on a company or tenant.
pub const ADMIN_ROLE: &str = "_admin";

/// Role granting ordinary membership on a company or tenant.
pub const MEMBER_ROLE: &str = "_member";

/// The kind of invite, which controls when the key is consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InviteKeyType {
    Unknown,
    /// Invite to join an existing company; consumed as soon as it is bound.
    ExistingCompany,
}

impl InviteKeyType {
    /// Returns true if binding the invite should immediately mark it used.
    ///
    /// Other types are consumed when a later action is finalized, not at
    /// bind time.
    #[must_use]
    pub fn consumes_on_bind(self) -> bool {
        matches!(self, Self::ExistingCompany)
    }

    /// Decodes from the stored integer discriminant.
    ///
    /// Discriminant 1 belonged to a retired new-company invite type and maps
    /// to `Unknown`.
    #[must_use]
    pub fn from_stored(value: i16) -> Self {
        match value {
            2 => Self::ExistingCompany,
            _ => Self::Unknown,
        }
    }

    /// Encodes to the stored integer discriminant.
    #[must_use]
    pub fn to_stored(self) -> i16 {
        match self {
            Self::Unknown => 0,
            Self::ExistingCompany => 2,
        }
    }
}

/// Per-tenant roles granted by an invite.
pub type TenantRoles = HashMap<TenantId, String>;

/// Validates that every tenant role is one of the known roles.
pub fn validate_tenant_roles(roles: &TenantRoles) -> Result<(), InviteError> {
    for role in roles.values() {
        if role != ADMIN_ROLE && role != MEMBER_ROLE {
            return Err(InviteError::InvalidRole { role: role.clone() });
        }
    }
    Ok(())
}

/// State and privileges for an invitation sent from the console.
#[derive(Debug, Clone, PartialEq)]
pub struct InviteKey {
    pub id: InviteId,
    pub invite_type: InviteKeyType,
    pub key: String,
    pub expires: DateTime<Utc>,
    pub used: bool,
    pub company_id: CompanyId,
    pub role: String,
    pub tenant_roles: TenantRoles,
    pub invitee_email: String,
    /// Set when a user accepts the invite. The key may not yet be `used`,
    /// but it can never be re-bound to a different user.
    pub invitee_user_id: Option<UserId>,
}

impl InviteKey {
    /// Creates a fresh, unbound invite key.
    #[must_use]
    pub fn new(
        invite_type: InviteKeyType,
        key: impl Into<String>,
        expires: DateTime<Utc>,
        company_id: CompanyId,
        role: impl Into<String>,
        tenant_roles: TenantRoles,
        invitee_email: impl Into<String>,
    ) -> Self {
        Self {
            id: InviteId::new(),
            invite_type,
            key: key.into(),
            expires,
            used: false,
            company_id,
            role: role.into(),
            tenant_roles,
            invitee_email: invitee_email.into(),
            invitee_user_id: None,
        }
    }

    /// Returns true if the invite's expiry is in the past.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires <= Utc::now()
    }

    /// Binds the invite to the accepting user.
    ///
    /// Fails when the key is used, expired, or bound to a different user.
    /// Auto-consuming types are marked used here; the caller persists the
    /// key even if a subsequent grant fails, so a key can never be replayed.
    pub fn bind(&mut self, user_id: UserId) -> Result<(), InviteError> {
        if self.used {
            return Err(InviteError::AlreadyUsed);
        }
        if self.is_expired() {
            return Err(InviteError::Expired);
        }
        if let Some(existing) = self.invitee_user_id
            && existing != user_id
        {
            return Err(InviteError::BoundToAnotherUser);
        }

        self.invitee_user_id = Some(user_id);
        if self.invite_type.consumes_on_bind() {
            self.used = true;
        }
        Ok(())
    }
}
