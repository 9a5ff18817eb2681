//! Authentication module for the gatehouse console server.
//!
//! This module provides:
//! - Database-backed session management fronted by an opaque cookie
//! - The OIDC login round trip against the console tenant's IDP
//! - Operator impersonation with automatic reversion on expiry
//! - Invite-key binding with RBAC role grants
//! - Authentication extractors for Axum routes
//!
//! # Session model
//!
//! The cookie holds only a session ID. The session row holds the active
//! principal's ID/access/refresh token triple and, during an impersonation,
//! the operator's original triple. Expiry is decided by decoding the stored
//! refresh token's claims; no network call is involved on the request path.
//!
//! # Trust model
//!
//! Tokens land in the session only via the IDP code exchange, so claims are
//! decoded without signature re-verification. Anything derived from a
//! session row is trusted as much as the row itself.

pub mod db;
pub mod impersonate;
pub mod invite;
pub mod oidc;
pub mod routes;
pub mod session;

use axum::Router;
use axum::routing::{get, post};
use gatehouse_access::{InviteKeyStore, TenantStore, regional_tenant_url};
use gatehouse_rbac::RbacService;
use gatehouse_secrets::M2mSecrets;
use std::sync::Arc;

use crate::config::{AuthConfig, EnvironmentConfig};
pub use oidc::{Authenticator, AuthenticatorFactory, IdpClient, OidcError};
pub use session::{PageAuth, RequestIdentity, RequireAuth, SessionManager};

/// Destination for unexpected failures (the 500 class). Routine
/// authentication failures never reach this.
pub trait ErrorReporter: Send + Sync {
    /// Reports a failure worth alerting on. Implementations must not panic.
    fn report(&self, context: &str, error: &dyn std::fmt::Display);
}

/// Reporter that only writes to the log; the default outside production.
#[derive(Default)]
pub struct LogErrorReporter;

impl ErrorReporter for LogErrorReporter {
    fn report(&self, context: &str, error: &dyn std::fmt::Display) {
        tracing::error!(context, error = %error, "reported failure");
    }
}

/// Shared application state.
pub struct AppState {
    /// Session manager over the session store.
    pub sessions: SessionManager,
    /// Invite key storage.
    pub invites: Arc<dyn InviteKeyStore>,
    /// Tenant records.
    pub tenants: Arc<dyn TenantStore>,
    /// Builds authenticators for tenant IDPs.
    pub authenticators: Arc<dyn AuthenticatorFactory>,
    /// IDP operations beyond the code exchange.
    pub idp: Arc<dyn IdpClient>,
    /// Per-tenant M2M secrets for trusted service-to-service calls.
    pub m2m: M2mSecrets,
    /// RBAC client bound to the console tenant.
    pub rbac: Arc<dyn RbacService>,
    /// Console login-app registration.
    pub auth_config: AuthConfig,
    /// Deployment environment.
    pub env: EnvironmentConfig,
    /// Error reporter for 500-class failures.
    pub reporter: Arc<dyn ErrorReporter>,
}

impl AppState {
    /// Logs an unexpected failure at error level and forwards it to the
    /// reporter.
    pub fn report_internal(&self, context: &str, error: &dyn std::fmt::Display) {
        tracing::error!(context, error = %error, "unexpected failure");
        self.reporter.report(context, error);
    }

    /// Builds an authenticator for the console tenant, pinned to the
    /// region-local tenant URL when the request arrived on a regional host.
    pub fn authenticator_for_host(
        &self,
        request_host: &str,
        callback_path: &str,
    ) -> Result<Box<dyn Authenticator>, OidcError> {
        let mut tenant_url = self.auth_config.tenant_url.clone();
        if request_host.contains(&format!(".{}.", self.env.region)) {
            // Request came in on a regional host; keep the token exchange
            // region-local too.
            tenant_url = regional_tenant_url(&tenant_url, &self.env.region, false);
            tracing::debug!(%tenant_url, request_host, "using regional tenant URL");
        } else if request_host.contains(&format!(".{}-eks.", self.env.region)) {
            tenant_url = regional_tenant_url(&tenant_url, &self.env.region, true);
            tracing::debug!(%tenant_url, request_host, "using EKS regional tenant URL");
        }

        let redirect_url = format!("{}{}", self.console_base_for_host(request_host), callback_path);
        self.authenticators.authenticator(
            &tenant_url,
            &self.auth_config.client_id,
            &self.auth_config.client_secret,
            &redirect_url,
        )
    }

    /// Returns the console base URL matching the requested host.
    ///
    /// When a request arrives on the regional console host (e.g.
    /// `console.aws-us-east-1.example.com`), redirects must keep the user
    /// in that region instead of bouncing to the canonical host.
    pub fn console_base_for_host(&self, request_host: &str) -> String {
        let console_url = self.env.console_url.trim_end_matches('/');
        let Some((scheme, host)) = console_url.split_once("://") else {
            return console_url.to_string();
        };
        if host == request_host {
            return console_url.to_string();
        }

        let suffix = host.strip_prefix("console.").unwrap_or(host);
        let regional_host = if self.env.kubernetes {
            format!("console.{}-eks.{suffix}", self.env.region)
        } else {
            format!("console.{}.{suffix}", self.env.region)
        };

        if request_host == regional_host {
            format!("{scheme}://{regional_host}")
        } else {
            console_url.to_string()
        }
    }
}

/// Builds the `/auth` router over the shared state.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Redirects to the IDP for login.
        .route("/auth/redirect", get(routes::login_redirect))
        // The IDP redirects back here after login.
        .route("/auth/callback", get(routes::login_callback))
        // The IDP redirects here after an invited user logs in.
        .route("/auth/invitecallback", get(routes::invite_callback))
        // Federated employee login handoff; requires an existing session.
        .route("/auth/employee/login", get(routes::employee_login))
        // Logs out of the underlying IDP.
        .route("/auth/logout", get(routes::logout))
        // Info about the currently logged-in (and impersonating) user.
        .route("/auth/userinfo", get(routes::user_info))
        .route("/auth/impersonateuser", post(impersonate::impersonate_user))
        // Restore the session of the impersonating operator.
        .route(
            "/auth/unimpersonateuser",
            post(impersonate::unimpersonate_user),
        )
        .with_state(state)
}
