//! Postgres implementations of the session, invite-key, and tenant stores.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gatehouse_access::{
    Impersonation, InviteKey, InviteKeyStore, InviteKeyType, Session, SessionStore, StoreError,
    Tenant, TenantRoles, TenantStore, TokenSet,
};
use gatehouse_core::{CompanyId, InviteId, SessionId, TenantId, UserId};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend {
        details: e.to_string(),
    }
}

/// Row type for session queries.
#[derive(FromRow)]
struct SessionRow {
    id: Uuid,
    created: DateTime<Utc>,
    state: Option<String>,
    id_token: String,
    access_token: String,
    refresh_token: String,
    impersonator_id_token: String,
    impersonator_access_token: String,
    impersonator_refresh_token: String,
}

impl SessionRow {
    fn into_session(self) -> Session {
        Session::from_stored(
            SessionId::from_uuid(self.id),
            self.created,
            self.state,
            TokenSet {
                id_token: self.id_token,
                access_token: self.access_token,
                refresh_token: self.refresh_token,
            },
            Impersonation::from_stored(
                self.impersonator_id_token,
                self.impersonator_access_token,
                self.impersonator_refresh_token,
            ),
        )
    }
}

/// Session store backed by the console database.
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    /// Creates a new session store over the given pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn get_session(&self, id: SessionId) -> Result<Option<Session>, StoreError> {
        let row: Option<SessionRow> = sqlx::query_as(
            r#"
            SELECT id, created, state, id_token, access_token, refresh_token,
                   impersonator_id_token, impersonator_access_token, impersonator_refresh_token
            FROM sessions
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        Ok(row.map(SessionRow::into_session))
    }

    async fn save_session(&self, session: &mut Session) -> Result<(), StoreError> {
        let now = Utc::now();
        session.mark_created(now);
        let (imp_id, imp_access, imp_refresh) = session.impersonation().to_stored();

        sqlx::query(
            r#"
            INSERT INTO sessions (id, created, updated, state, id_token, access_token, refresh_token,
                                  impersonator_id_token, impersonator_access_token, impersonator_refresh_token)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                updated = EXCLUDED.updated,
                state = EXCLUDED.state,
                id_token = EXCLUDED.id_token,
                access_token = EXCLUDED.access_token,
                refresh_token = EXCLUDED.refresh_token,
                impersonator_id_token = EXCLUDED.impersonator_id_token,
                impersonator_access_token = EXCLUDED.impersonator_access_token,
                impersonator_refresh_token = EXCLUDED.impersonator_refresh_token
            "#,
        )
        .bind(session.id().as_uuid())
        .bind(session.created().unwrap_or(now))
        .bind(now)
        .bind(session.state())
        .bind(&session.tokens().id_token)
        .bind(&session.tokens().access_token)
        .bind(&session.tokens().refresh_token)
        .bind(&imp_id)
        .bind(&imp_access)
        .bind(&imp_refresh)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    async fn delete_session(&self, id: SessionId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn delete_sessions_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM sessions WHERE updated < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected())
    }
}

/// Row type for invite-key queries.
#[derive(FromRow)]
struct InviteKeyRow {
    id: Uuid,
    invite_type: i16,
    key: String,
    expires: DateTime<Utc>,
    used: bool,
    company_id: Uuid,
    role: String,
    tenant_roles: serde_json::Value,
    invitee_email: String,
    invitee_user_id: Option<Uuid>,
}

impl InviteKeyRow {
    fn into_invite_key(self) -> InviteKey {
        let tenant_roles: TenantRoles =
            serde_json::from_value(self.tenant_roles).unwrap_or_default();
        InviteKey {
            id: InviteId::from_uuid(self.id),
            invite_type: InviteKeyType::from_stored(self.invite_type),
            key: self.key,
            expires: self.expires,
            used: self.used,
            company_id: CompanyId::from_uuid(self.company_id),
            role: self.role,
            tenant_roles,
            invitee_email: self.invitee_email,
            invitee_user_id: self.invitee_user_id.map(UserId::from_uuid),
        }
    }
}

/// Invite-key store backed by the console database.
pub struct PgInviteKeyStore {
    pool: PgPool,
}

impl PgInviteKeyStore {
    /// Creates a new invite-key store over the given pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InviteKeyStore for PgInviteKeyStore {
    async fn get_valid_invite_key(&self, key: &str) -> Result<Option<InviteKey>, StoreError> {
        // Used and expired keys are filtered here, not by the caller.
        let row: Option<InviteKeyRow> = sqlx::query_as(
            r#"
            SELECT id, invite_type, key, expires, used, company_id, role, tenant_roles,
                   invitee_email, invitee_user_id
            FROM invite_keys
            WHERE key = $1 AND expires > NOW() AND used = FALSE
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        Ok(row.map(InviteKeyRow::into_invite_key))
    }

    async fn save_invite_key(&self, invite: &InviteKey) -> Result<(), StoreError> {
        let tenant_roles = serde_json::to_value(&invite.tenant_roles).map_err(|e| {
            StoreError::Backend {
                details: format!("unserializable tenant roles: {e}"),
            }
        })?;

        sqlx::query(
            r#"
            INSERT INTO invite_keys (id, invite_type, key, expires, used, company_id, role,
                                     tenant_roles, invitee_email, invitee_user_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                used = EXCLUDED.used,
                invitee_user_id = EXCLUDED.invitee_user_id
            "#,
        )
        .bind(invite.id.as_uuid())
        .bind(invite.invite_type.to_stored())
        .bind(&invite.key)
        .bind(invite.expires)
        .bind(invite.used)
        .bind(invite.company_id.as_uuid())
        .bind(&invite.role)
        .bind(tenant_roles)
        .bind(&invite.invitee_email)
        .bind(invite.invitee_user_id.map(|id| id.as_uuid()))
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }
}

/// Row type for tenant queries.
#[derive(FromRow)]
struct TenantRow {
    id: Uuid,
    company_id: Uuid,
    tenant_url: String,
}

impl TenantRow {
    fn into_tenant(self) -> Tenant {
        Tenant {
            id: TenantId::from_uuid(self.id),
            company_id: CompanyId::from_uuid(self.company_id),
            tenant_url: self.tenant_url,
        }
    }
}

/// Tenant store backed by the console database.
pub struct PgTenantStore {
    pool: PgPool,
}

impl PgTenantStore {
    /// Creates a new tenant store over the given pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TenantStore for PgTenantStore {
    async fn get_tenant(&self, id: TenantId) -> Result<Option<Tenant>, StoreError> {
        let row: Option<TenantRow> = sqlx::query_as(
            "SELECT id, company_id, tenant_url FROM tenants WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        Ok(row.map(TenantRow::into_tenant))
    }

    async fn list_tenants_for_company(
        &self,
        company_id: CompanyId,
    ) -> Result<Vec<Tenant>, StoreError> {
        let rows: Vec<TenantRow> = sqlx::query_as(
            "SELECT id, company_id, tenant_url FROM tenants WHERE company_id = $1",
        )
        .bind(company_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        Ok(rows.into_iter().map(TenantRow::into_tenant).collect())
    }
}
