//! Centralized server configuration.
//!
//! This module provides strongly-typed configuration for the console,
//! loaded via the `config` crate from environment variables.

use gatehouse_core::{CompanyId, TenantId};
use serde::Deserialize;

/// The deployment universe the console runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Universe {
    Dev,
    Container,
    Staging,
    #[default]
    Prod,
}

impl Universe {
    /// Dev-like universes allow arbitrary post-login redirect targets so
    /// frontend dev servers on other origins keep working. Everywhere else
    /// only rooted paths are accepted.
    #[must_use]
    pub fn allows_external_redirects(self) -> bool {
        matches!(self, Self::Dev | Self::Container)
    }
}

/// Server configuration composed from library configs.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// PostgreSQL database connection URL.
    pub database_url: String,

    /// Address to bind the HTTP listener to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Session configuration.
    #[serde(default)]
    pub session: SessionConfig,

    /// Console login-app registration with the console tenant's IDP.
    pub auth: AuthConfig,

    /// Deployment environment.
    pub environment: EnvironmentConfig,
}

/// Session cookie and sweep configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Session cookie lifetime in days.
    #[serde(default = "default_cookie_days")]
    pub cookie_days: i64,

    /// Interval between stale-session sweeps, in seconds.
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,

    /// Whether to set the Secure flag on cookies (requires HTTPS).
    /// Defaults to true for production safety; set to false for local HTTP
    /// development.
    #[serde(default = "default_secure_cookies")]
    pub secure_cookies: bool,
}

fn default_listen_addr() -> String {
    "0.0.0.0:3010".to_string()
}

fn default_cookie_days() -> i64 {
    30
}

fn default_sweep_interval_seconds() -> u64 {
    3600
}

fn default_secure_cookies() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_days: default_cookie_days(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
            secure_cookies: default_secure_cookies(),
        }
    }
}

/// OIDC client registration used for console logins against the console
/// tenant, plus the company that owns it.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub tenant_id: TenantId,
    pub tenant_url: String,
    pub company_id: CompanyId,
    pub client_id: String,
    pub client_secret: String,
}

/// Where this console instance runs; drives redirect validation and
/// regional host handling.
#[derive(Debug, Clone, Deserialize)]
pub struct EnvironmentConfig {
    /// Deployment universe.
    #[serde(default)]
    pub universe: Universe,

    /// Region this instance serves (e.g. "aws-us-east-1").
    pub region: String,

    /// Whether the instance runs behind Kubernetes ingress, which uses the
    /// `-eks` regional host naming.
    #[serde(default)]
    pub kubernetes: bool,

    /// Canonical console URL (e.g. "https://console.example.com").
    pub console_url: String,
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
