//! OIDC code exchange against a tenant's identity provider.
//!
//! The exchange itself is a black box to the session subsystem: handlers
//! see only the [`Authenticator`] trait, which validates the callback state
//! and turns an authorization code into a token triple. The oauth2-backed
//! implementation lives here; tests substitute stubs.

use async_trait::async_trait;
use gatehouse_access::TokenSet;
use gatehouse_core::UserId;
use oauth2::basic::BasicClient;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, RedirectUrl, Scope, TokenResponse,
    TokenUrl,
};
use serde::{Deserialize, Serialize};

/// Query parameters delivered to an auth callback by the provider.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub state: String,
}

/// Drives the authorization-code round trip against a tenant IDP.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Returns the provider URL that starts a login bound to `state`.
    fn auth_code_url(&self, state: &str) -> String;

    /// Validates the callback's state against `expected_state` and
    /// exchanges its code for a token triple.
    async fn process_auth_code_callback(
        &self,
        params: &CallbackParams,
        expected_state: &str,
    ) -> Result<TokenSet, OidcError>;
}

/// Builds authenticators bound to a request's tenant URL and redirect URL.
///
/// A fresh authenticator is built per request because the tenant URL can be
/// rewritten to a region-local variant depending on the host the request
/// arrived on.
pub trait AuthenticatorFactory: Send + Sync {
    fn authenticator(
        &self,
        tenant_url: &str,
        client_id: &str,
        client_secret: &str,
        redirect_url: &str,
    ) -> Result<Box<dyn Authenticator>, OidcError>;
}

/// OIDC-related errors.
#[derive(Debug)]
pub enum OidcError {
    /// Configuration error (invalid URLs, etc.)
    Configuration(String),
    /// The callback state does not match the expected value.
    StateMismatch,
    /// Token exchange failed.
    ExchangeFailed(String),
    /// The token response carried no ID token.
    MissingIdToken,
    /// A downstream IDP request failed.
    IdpRequest(String),
}

impl std::fmt::Display for OidcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configuration(msg) => write!(f, "OIDC configuration error: {}", msg),
            Self::StateMismatch => write!(f, "invalid state parameter value"),
            Self::ExchangeFailed(msg) => write!(f, "OIDC token exchange error: {}", msg),
            Self::MissingIdToken => write!(f, "no id_token field in oauth2 token"),
            Self::IdpRequest(msg) => write!(f, "IDP request error: {}", msg),
        }
    }
}

impl std::error::Error for OidcError {}

/// Authenticator for a tenant IDP, using the platform's fixed OIDC endpoint
/// layout under the tenant URL.
#[derive(Debug)]
pub struct TenantAuthenticator {
    tenant_url: String,
    client_id: String,
    client_secret: String,
    redirect_url: String,
}

impl TenantAuthenticator {
    /// Creates an authenticator for the given tenant URL and client
    /// registration.
    pub fn new(
        tenant_url: &str,
        client_id: &str,
        client_secret: &str,
        redirect_url: &str,
    ) -> Result<Self, OidcError> {
        // Validate up front so handler-time failures are exchange failures,
        // not URL parse errors.
        let _ = RedirectUrl::new(redirect_url.to_string())
            .map_err(|e| OidcError::Configuration(format!("invalid redirect URL: {}", e)))?;
        let _ = AuthUrl::new(format!("{tenant_url}/oidc/authorize"))
            .map_err(|e| OidcError::Configuration(format!("invalid tenant URL: {}", e)))?;

        Ok(Self {
            tenant_url: tenant_url.trim_end_matches('/').to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            redirect_url: redirect_url.to_string(),
        })
    }

    fn client(&self) -> Result<ConfiguredClient, OidcError> {
        let client = BasicClient::new(ClientId::new(self.client_id.clone()))
            .set_client_secret(ClientSecret::new(self.client_secret.clone()))
            .set_auth_uri(
                AuthUrl::new(format!("{}/oidc/authorize", self.tenant_url))
                    .map_err(|e| OidcError::Configuration(format!("invalid auth URL: {}", e)))?,
            )
            .set_token_uri(
                TokenUrl::new(format!("{}/oidc/token", self.tenant_url))
                    .map_err(|e| OidcError::Configuration(format!("invalid token URL: {}", e)))?,
            )
            .set_redirect_uri(
                RedirectUrl::new(self.redirect_url.clone())
                    .map_err(|e| OidcError::Configuration(format!("invalid redirect URL: {}", e)))?,
            );
        Ok(client)
    }
}

type ConfiguredClient = oauth2::Client<
    oauth2::basic::BasicErrorResponse,
    oauth2::basic::BasicTokenResponse,
    oauth2::basic::BasicTokenIntrospectionResponse,
    oauth2::StandardRevocableToken,
    oauth2::basic::BasicRevocationErrorResponse,
    oauth2::EndpointSet,
    oauth2::EndpointNotSet,
    oauth2::EndpointNotSet,
    oauth2::EndpointNotSet,
    oauth2::EndpointSet,
>;

#[async_trait]
impl Authenticator for TenantAuthenticator {
    fn auth_code_url(&self, state: &str) -> String {
        let state = state.to_string();
        match self.client() {
            Ok(client) => {
                let (url, _csrf) = client
                    .authorize_url(move || CsrfToken::new(state))
                    .add_scope(Scope::new("openid".to_string()))
                    .add_scope(Scope::new("profile".to_string()))
                    .add_scope(Scope::new("email".to_string()))
                    .url();
                url.to_string()
            }
            // new() validated the URLs, so this arm is unreachable in
            // practice; fall back to the bare authorize endpoint.
            Err(_) => format!("{}/oidc/authorize", self.tenant_url),
        }
    }

    async fn process_auth_code_callback(
        &self,
        params: &CallbackParams,
        expected_state: &str,
    ) -> Result<TokenSet, OidcError> {
        if params.state != expected_state {
            return Err(OidcError::StateMismatch);
        }

        let http_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| OidcError::ExchangeFailed(format!("HTTP client error: {}", e)))?;

        let token_response = self
            .client()?
            .exchange_code(AuthorizationCode::new(params.code.clone()))
            .request_async(&http_client)
            .await
            .map_err(|e| OidcError::ExchangeFailed(e.to_string()))?;

        // The basic token response does not surface id_token as a typed
        // field; pull it out of the raw response body.
        let response_json = serde_json::to_value(&token_response)
            .map_err(|e| OidcError::ExchangeFailed(format!("unserializable response: {}", e)))?;
        let id_token = response_json
            .get("id_token")
            .and_then(|v| v.as_str())
            .ok_or(OidcError::MissingIdToken)?;

        Ok(TokenSet::new(
            id_token,
            token_response.access_token().secret().clone(),
            token_response
                .refresh_token()
                .map(|t| t.secret().clone())
                .unwrap_or_default(),
        ))
    }
}

/// Factory producing [`TenantAuthenticator`]s.
#[derive(Default)]
pub struct OAuthAuthenticatorFactory;

impl AuthenticatorFactory for OAuthAuthenticatorFactory {
    fn authenticator(
        &self,
        tenant_url: &str,
        client_id: &str,
        client_secret: &str,
        redirect_url: &str,
    ) -> Result<Box<dyn Authenticator>, OidcError> {
        Ok(Box::new(TenantAuthenticator::new(
            tenant_url,
            client_id,
            client_secret,
            redirect_url,
        )?))
    }
}

/// Response from the IDP's delegated-impersonation endpoint. The browser
/// follows `redirect_to` to complete the federated re-login, which lands on
/// the console's auth callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpersonateResponse {
    pub redirect_to: String,
}

/// An audit event reported to the tenant's user-event log.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub event_type: String,
    pub user_alias: String,
    pub payload: serde_json::Value,
}

/// Operations the console drives against a tenant's IDP beyond the code
/// exchange. Calls authenticate with the tenant's M2M header, not a user
/// session.
#[async_trait]
pub trait IdpClient: Send + Sync {
    /// Asks the IDP to begin a federated login as `target_user_id`, using
    /// the operator's refresh token as authority.
    async fn impersonate_user(
        &self,
        tenant_url: &str,
        auth_header: &str,
        refresh_token: &str,
        target_user_id: UserId,
    ) -> Result<ImpersonateResponse, OidcError>;

    /// Records an audit event with the tenant.
    async fn report_event(
        &self,
        tenant_url: &str,
        auth_header: &str,
        event: AuditEvent,
    ) -> Result<(), OidcError>;
}

#[derive(Serialize)]
struct ImpersonateRequest<'a> {
    refresh_token: &'a str,
    target_user_id: UserId,
}

/// HTTP implementation of [`IdpClient`].
#[derive(Default)]
pub struct HttpIdpClient {
    http: reqwest::Client,
}

impl HttpIdpClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdpClient for HttpIdpClient {
    async fn impersonate_user(
        &self,
        tenant_url: &str,
        auth_header: &str,
        refresh_token: &str,
        target_user_id: UserId,
    ) -> Result<ImpersonateResponse, OidcError> {
        let response = self
            .http
            .post(format!("{tenant_url}/impersonate"))
            .header(reqwest::header::AUTHORIZATION, auth_header)
            .json(&ImpersonateRequest {
                refresh_token,
                target_user_id,
            })
            .send()
            .await
            .map_err(|e| OidcError::IdpRequest(e.to_string()))?;

        if !response.status().is_success() {
            return Err(OidcError::IdpRequest(format!(
                "impersonation request returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| OidcError::IdpRequest(e.to_string()))
    }

    async fn report_event(
        &self,
        tenant_url: &str,
        auth_header: &str,
        event: AuditEvent,
    ) -> Result<(), OidcError> {
        let response = self
            .http
            .post(format!("{tenant_url}/userevents"))
            .header(reqwest::header::AUTHORIZATION, auth_header)
            .json(&[event])
            .send()
            .await
            .map_err(|e| OidcError::IdpRequest(e.to_string()))?;

        if !response.status().is_success() {
            return Err(OidcError::IdpRequest(format!(
                "event report returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}
