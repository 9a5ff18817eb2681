//! Storage traits for sessions, invite keys, and tenants.
//!
//! The console talks to these traits; the Postgres implementations live in
//! the server crate, and the in-memory implementations here back tests.
//!
//! There is no cross-request locking: concurrent requests carrying the same
//! cookie each load, mutate, and save their own copy of the row, and the
//! last write wins.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gatehouse_core::{CompanyId, SessionId, TenantId};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::invite::InviteKey;
use crate::session::Session;
use crate::tenant::Tenant;

/// Persistence for session rows.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Loads a session row by ID.
    async fn get_session(&self, id: SessionId) -> Result<Option<Session>, StoreError>;

    /// Upserts a session row, stamping `created` on first save.
    async fn save_session(&self, session: &mut Session) -> Result<(), StoreError>;

    /// Deletes a session row.
    async fn delete_session(&self, id: SessionId) -> Result<(), StoreError>;

    /// Deletes rows last saved before `cutoff`; returns how many were
    /// removed. Used by the background sweep that cleans up rows whose
    /// cookies have long expired.
    async fn delete_sessions_older_than(&self, cutoff: DateTime<Utc>)
    -> Result<u64, StoreError>;
}

/// Persistence for invite keys.
#[async_trait]
pub trait InviteKeyStore: Send + Sync {
    /// Loads an invite key by key string. Used and expired keys are not
    /// resolvable.
    async fn get_valid_invite_key(&self, key: &str) -> Result<Option<InviteKey>, StoreError>;

    /// Upserts an invite key.
    async fn save_invite_key(&self, invite: &InviteKey) -> Result<(), StoreError>;
}

/// Read access to tenant records.
#[async_trait]
pub trait TenantStore: Send + Sync {
    /// Loads a tenant by ID.
    async fn get_tenant(&self, id: TenantId) -> Result<Option<Tenant>, StoreError>;

    /// Lists the tenants belonging to a company.
    async fn list_tenants_for_company(
        &self,
        company_id: CompanyId,
    ) -> Result<Vec<Tenant>, StoreError>;
}

/// In-memory session store for tests.
#[derive(Default)]
pub struct MemorySessionStore {
    rows: RwLock<HashMap<SessionId, (Session, DateTime<Utc>)>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get_session(&self, id: SessionId) -> Result<Option<Session>, StoreError> {
        Ok(self.rows.read().await.get(&id).map(|(s, _)| s.clone()))
    }

    async fn save_session(&self, session: &mut Session) -> Result<(), StoreError> {
        let now = Utc::now();
        session.mark_created(now);
        self.rows
            .write()
            .await
            .insert(session.id(), (session.clone(), now));
        Ok(())
    }

    async fn delete_session(&self, id: SessionId) -> Result<(), StoreError> {
        self.rows.write().await.remove(&id);
        Ok(())
    }

    async fn delete_sessions_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|_, (_, saved)| *saved >= cutoff);
        Ok((before - rows.len()) as u64)
    }
}

/// In-memory invite-key store for tests.
#[derive(Default)]
pub struct MemoryInviteKeyStore {
    rows: RwLock<HashMap<String, InviteKey>>,
}

impl MemoryInviteKeyStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InviteKeyStore for MemoryInviteKeyStore {
    async fn get_valid_invite_key(&self, key: &str) -> Result<Option<InviteKey>, StoreError> {
        Ok(self
            .rows
            .read()
            .await
            .get(key)
            .filter(|invite| !invite.used && !invite.is_expired())
            .cloned())
    }

    async fn save_invite_key(&self, invite: &InviteKey) -> Result<(), StoreError> {
        self.rows
            .write()
            .await
            .insert(invite.key.clone(), invite.clone());
        Ok(())
    }
}

/// In-memory tenant store for tests.
#[derive(Default)]
pub struct MemoryTenantStore {
    rows: RwLock<HashMap<TenantId, Tenant>>,
}

impl MemoryTenantStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a tenant record.
    pub async fn add_tenant(&self, tenant: Tenant) {
        self.rows.write().await.insert(tenant.id, tenant);
    }
}

#[async_trait]
impl TenantStore for MemoryTenantStore {
    async fn get_tenant(&self, id: TenantId) -> Result<Option<Tenant>, StoreError> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn list_tenants_for_company(
        &self,
        company_id: CompanyId,
    ) -> Result<Vec<Tenant>, StoreError> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .filter(|t| t.company_id == company_id)
            .cloned()
            .collect())
    }
}
