//! Machine-to-machine secrets.
//!
//! Each tenant gets one opaque secret per issuing service, created at tenant
//! provisioning time and read by every service instance that makes trusted
//! cross-service calls. Secrets are read-shared and never mutated on the
//! request path, so no locking is needed for reads.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use gatehouse_core::TenantId;
use rand::Rng;
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::error::SecretError;
use crate::store::{Secret, SecretStore};

/// Storage name for a tenant's M2M secret.
fn secret_name(tenant_id: TenantId) -> String {
    format!("m2m-secret-{tenant_id}")
}

/// Minter and validator for per-tenant M2M secrets.
#[derive(Clone)]
pub struct M2mSecrets {
    store: Arc<dyn SecretStore>,
    service: String,
}

impl M2mSecrets {
    /// Creates an M2M secret source for the given issuing service.
    #[must_use]
    pub fn new(store: Arc<dyn SecretStore>, service: impl Into<String>) -> Self {
        Self {
            store,
            service: service.into(),
        }
    }

    /// Resolves the M2M secret for a tenant.
    pub async fn secret_for_tenant(&self, tenant_id: TenantId) -> Result<Secret, SecretError> {
        self.store
            .resolve(&self.service, &secret_name(tenant_id))
            .await
    }

    /// Formats the Authorization header value for outbound trusted calls.
    pub async fn auth_header_for_tenant(
        &self,
        tenant_id: TenantId,
    ) -> Result<String, SecretError> {
        let secret = self.secret_for_tenant(tenant_id).await?;
        Ok(format!("AccessToken {}", secret.expose()))
    }

    /// Validates a presented M2M token against the tenant's stored secret.
    ///
    /// The comparison is constant-time so response timing leaks nothing
    /// about the stored secret.
    pub async fn validate(&self, tenant_id: TenantId, presented: &str) -> Result<(), SecretError> {
        let secret = self.secret_for_tenant(tenant_id).await?;
        let matches: bool = secret
            .expose()
            .as_bytes()
            .ct_eq(presented.as_bytes())
            .into();
        if matches {
            Ok(())
        } else {
            Err(SecretError::ValidationFailed)
        }
    }

    /// Generates and stores a tenant's M2M secret.
    ///
    /// Called once at tenant provisioning, never on the request path.
    pub async fn create_for_tenant(&self, tenant_id: TenantId) -> Result<Secret, SecretError> {
        let random_bytes: [u8; 32] = rand::rng().random();
        let secret = Secret::new(URL_SAFE_NO_PAD.encode(random_bytes));
        self.store
            .put(&self.service, &secret_name(tenant_id), secret.clone())
            .await?;
        Ok(secret)
    }
}
