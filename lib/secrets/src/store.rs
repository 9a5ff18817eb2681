//! Secret storage backends.
//!
//! Secrets live at deterministic `(service, name)` locations so that any
//! service instance can resolve them without coordination. No plaintext
//! secrets appear in configuration or logs.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use tokio::sync::RwLock;

use crate::error::SecretError;

/// An opaque secret value.
///
/// `Debug` never prints the contents; call [`Secret::expose`] at the point
/// of use.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    /// Wraps a secret value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the secret value.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret(****)")
    }
}

/// Trait for secret storage.
///
/// Implementations must encrypt secrets at rest.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Stores a secret at the location derived from `(service, name)`.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails or the backend is read-only.
    async fn put(&self, service: &str, name: &str, value: Secret) -> Result<(), SecretError>;

    /// Resolves the secret stored at `(service, name)`.
    async fn resolve(&self, service: &str, name: &str) -> Result<Secret, SecretError>;
}

fn location(service: &str, name: &str) -> String {
    format!("{service}/{name}")
}

/// In-memory secret store for tests and local development.
#[derive(Default)]
pub struct MemorySecretStore {
    secrets: RwLock<HashMap<String, Secret>>,
}

impl MemorySecretStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn put(&self, service: &str, name: &str, value: Secret) -> Result<(), SecretError> {
        self.secrets
            .write()
            .await
            .insert(location(service, name), value);
        Ok(())
    }

    async fn resolve(&self, service: &str, name: &str) -> Result<Secret, SecretError> {
        self.secrets
            .read()
            .await
            .get(&location(service, name))
            .cloned()
            .ok_or_else(|| SecretError::NotFound {
                location: location(service, name),
            })
    }
}

/// Read-only secret store backed by environment variables.
///
/// `(service, name)` maps to `GATEHOUSE_SECRET_<SERVICE>_<NAME>` with
/// non-alphanumeric characters replaced by underscores.
#[derive(Default)]
pub struct EnvSecretStore;

impl EnvSecretStore {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn var_name(service: &str, name: &str) -> String {
        let sanitize = |s: &str| {
            s.chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() {
                        c.to_ascii_uppercase()
                    } else {
                        '_'
                    }
                })
                .collect::<String>()
        };
        format!(
            "GATEHOUSE_SECRET_{}_{}",
            sanitize(service),
            sanitize(name)
        )
    }
}

#[async_trait]
impl SecretStore for EnvSecretStore {
    async fn put(&self, service: &str, name: &str, _value: Secret) -> Result<(), SecretError> {
        Err(SecretError::Unsupported {
            details: format!(
                "environment store is read-only; cannot write {}",
                location(service, name)
            ),
        })
    }

    async fn resolve(&self, service: &str, name: &str) -> Result<Secret, SecretError> {
        std::env::var(Self::var_name(service, name))
            .map(Secret::new)
            .map_err(|_| SecretError::NotFound {
                location: location(service, name),
            })
    }
}
