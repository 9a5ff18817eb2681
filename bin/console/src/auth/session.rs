//! Session management: cookie ⇄ session store ⇄ request identity.
//!
//! The cookie carries only an opaque session ID; everything else lives in
//! the session row. The manager owns the expiry/fallback decision: when the
//! active refresh token has expired but an impersonation is active with an
//! unexpired operator token, the operator's session is restored
//! automatically instead of failing the request.

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use gatehouse_access::{
    Impersonation, Session, SessionStore, StoreError, UserInfo, token_expired,
};
use gatehouse_core::SessionId;
use std::str::FromStr;
use std::sync::Arc;
use time::Duration as TimeDuration;

use super::AppState;
use super::routes::REDIRECT_PATH;
use crate::config::SessionConfig;

/// Name of the cookie set on the client to associate it with the server
/// session. The value is the session ID, never token material.
pub const SESSION_COOKIE: &str = "auth-session-id";

/// Why a request has no authenticated identity.
#[derive(Debug)]
pub enum IdentityError {
    /// No cookie, or a session that has never been persisted: the normal
    /// anonymous state, logged quietly.
    NotLoggedIn,
    /// The cookie does not resolve to a stored session row.
    UnknownSession { details: String },
    /// The refresh token (and any impersonator refresh token) has expired.
    Expired,
    /// The session row exists but its contents do not parse.
    CorruptSession { details: String },
    /// The session store failed.
    Store { details: String },
}

impl std::fmt::Display for IdentityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotLoggedIn => write!(f, "no session found"),
            Self::UnknownSession { details } => {
                write!(f, "failed to load '{SESSION_COOKIE}' cookie: {details}")
            }
            Self::Expired => write!(f, "token expired"),
            Self::CorruptSession { details } => {
                write!(f, "unusable session: {details}")
            }
            Self::Store { details } => write!(f, "session store error: {details}"),
        }
    }
}

impl std::error::Error for IdentityError {}

/// The authenticated identity the auth extractors inject into handlers.
///
/// Handlers receive this struct explicitly instead of fishing values out of
/// request extensions, so a route that forgets the extractor has no
/// identity to use at all.
#[derive(Debug, Clone)]
pub struct RequestIdentity {
    /// The active principal (the impersonated user during impersonation).
    pub user: UserInfo,
    /// The operator behind an active impersonation, if any.
    pub impersonator: Option<UserInfo>,
    pub access_token: String,
    pub refresh_token: String,
    /// The backing session row as loaded for this request.
    pub session: Session,
}

/// Handles console sessions over a [`SessionStore`].
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    config: SessionConfig,
}

impl SessionManager {
    /// Creates a new cookie session manager for managing client web
    /// sessions.
    pub fn new(store: Arc<dyn SessionStore>, config: SessionConfig) -> Self {
        Self { store, config }
    }

    /// Loads the session referenced by the request's cookie.
    ///
    /// No cookie yields a new, unsaved session: the anonymous starting
    /// state. A cookie that does not resolve to a stored row is an error;
    /// callers treat it as unauthenticated.
    pub async fn get_auth_session(&self, jar: &CookieJar) -> Result<Session, IdentityError> {
        let Some(cookie) = jar.get(SESSION_COOKIE) else {
            return Ok(Session::new());
        };

        let id = SessionId::from_str(cookie.value()).map_err(|e| IdentityError::UnknownSession {
            details: e.to_string(),
        })?;

        match self.store.get_session(id).await {
            Ok(Some(session)) => Ok(session),
            Ok(None) => Err(IdentityError::UnknownSession {
                details: format!("no session row for {id}"),
            }),
            Err(e) => Err(IdentityError::Store {
                details: e.to_string(),
            }),
        }
    }

    /// Upserts the session row, then points the cookie at it.
    ///
    /// Must be called after every mutation of token fields.
    pub async fn save_session(
        &self,
        session: &mut Session,
        jar: CookieJar,
    ) -> Result<CookieJar, StoreError> {
        self.store.save_session(session).await?;

        let cookie = Cookie::build((SESSION_COOKIE, session.id().to_string()))
            .path("/")
            .http_only(true)
            .secure(self.config.secure_cookies)
            .same_site(SameSite::Lax)
            .max_age(TimeDuration::days(self.config.cookie_days));
        Ok(jar.add(cookie))
    }

    /// Upserts the session row without touching the cookie. Used on paths
    /// that have no response cookie jar in hand (automatic reversion,
    /// rollback of a failed impersonation request).
    pub(crate) async fn persist(&self, session: &mut Session) -> Result<(), StoreError> {
        self.store.save_session(session).await
    }

    /// Tells the client to drop the session cookie.
    ///
    /// The session row is not deleted eagerly; the background sweep collects
    /// rows whose cookies have long expired.
    pub fn clear_session_cookie(&self, jar: CookieJar) -> CookieJar {
        let removal = Cookie::build((SESSION_COOKIE, ""))
            .path("/")
            .max_age(TimeDuration::ZERO);
        jar.add(removal)
    }

    /// Resolves the request cookie into an authenticated identity.
    ///
    /// Expiry is decided from token claims alone, with one fallback: if the
    /// active refresh token has expired while an impersonation is active
    /// and the operator's refresh token is still valid, the operator's
    /// triple is promoted back to active, the row is persisted, and the
    /// request proceeds as the operator.
    pub async fn session_identity(&self, jar: &CookieJar) -> Result<RequestIdentity, IdentityError> {
        let mut session = self.get_auth_session(jar).await?;

        if session.is_new() {
            return Err(IdentityError::NotLoggedIn);
        }

        let mut expired = token_expired(&session.tokens().refresh_token).map_err(|e| {
            IdentityError::CorruptSession {
                details: format!("error parsing refresh token: {e}"),
            }
        })?;

        if expired {
            if let Some(operator) = session.impersonation().operator_tokens() {
                let operator_expired = token_expired(&operator.refresh_token).map_err(|e| {
                    IdentityError::CorruptSession {
                        details: format!("error parsing impersonator refresh token: {e}"),
                    }
                })?;
                if !operator_expired {
                    // The impersonated credential ran out; fall back to the
                    // operator's session instead of logging them out.
                    session
                        .revert_impersonation()
                        .map_err(|e| IdentityError::CorruptSession {
                            details: e.to_string(),
                        })?;
                    self.persist(&mut session)
                        .await
                        .map_err(|e| IdentityError::Store {
                            details: e.to_string(),
                        })?;
                    expired = false;
                }
            }
            if expired {
                return Err(IdentityError::Expired);
            }
        }

        let user = UserInfo::from_id_token(&session.tokens().id_token).map_err(|e| {
            IdentityError::CorruptSession {
                details: format!("error parsing ID token: {e}"),
            }
        })?;

        if session.tokens().access_token.is_empty() {
            return Err(IdentityError::CorruptSession {
                details: "no access token in session".to_string(),
            });
        }
        if session.tokens().refresh_token.is_empty() {
            return Err(IdentityError::CorruptSession {
                details: "no refresh token in session".to_string(),
            });
        }

        let impersonator = match session.impersonation() {
            Impersonation::Active(operator) => Some(
                UserInfo::from_id_token(&operator.id_token).map_err(|e| {
                    IdentityError::CorruptSession {
                        details: format!("error parsing impersonator ID token: {e}"),
                    }
                })?,
            ),
            _ => None,
        };

        Ok(RequestIdentity {
            user,
            impersonator,
            access_token: session.tokens().access_token.clone(),
            refresh_token: session.tokens().refresh_token.clone(),
            session,
        })
    }
}

/// Extractor for API routes: rejects with 401 when the request has no
/// authenticated identity. Authorization checks happen downstream; a 403
/// belongs to callers that find the authenticated user lacks permissions.
pub struct RequireAuth(pub RequestIdentity);

impl<S> FromRequestParts<S> for RequireAuth
where
    Arc<AppState>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = Arc::<AppState>::from_ref(state);
        let jar = CookieJar::from_request_parts(parts, state)
            .await
            .map_err(|_| AuthRejection::Internal)?;

        match app_state.sessions.session_identity(&jar).await {
            Ok(identity) => Ok(RequireAuth(identity)),
            Err(e) => Err(reject(&app_state, e, || AuthRejection::Unauthorized)),
        }
    }
}

/// Extractor for interactive pages: redirects to the login endpoint when
/// the request has no authenticated identity, preserving the original URI
/// so the user lands back where they started.
pub struct PageAuth(pub RequestIdentity);

impl<S> FromRequestParts<S> for PageAuth
where
    Arc<AppState>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = Arc::<AppState>::from_ref(state);
        let jar = CookieJar::from_request_parts(parts, state)
            .await
            .map_err(|_| AuthRejection::Internal)?;

        // Original URI (path?query); middleware does not strip it.
        let original_uri = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());

        match app_state.sessions.session_identity(&jar).await {
            Ok(identity) => Ok(PageAuth(identity)),
            Err(e) => Err(reject(&app_state, e, || AuthRejection::RedirectToLogin {
                original_uri,
            })),
        }
    }
}

/// Logs an identity failure at the appropriate level and maps it to the
/// extractor's rejection. Authentication failures are routine and log at
/// warn/debug so alerting does not treat every logout as degradation;
/// store failures are real faults and are reported.
fn reject(
    app_state: &AppState,
    error: IdentityError,
    unauthenticated: impl FnOnce() -> AuthRejection,
) -> AuthRejection {
    match &error {
        IdentityError::NotLoggedIn => {
            tracing::debug!("no session, treating request as unauthenticated");
            unauthenticated()
        }
        IdentityError::Expired => {
            tracing::warn!("session credential expired");
            unauthenticated()
        }
        IdentityError::UnknownSession { details } | IdentityError::CorruptSession { details } => {
            tracing::warn!(%details, "unusable session cookie");
            unauthenticated()
        }
        IdentityError::Store { .. } => {
            app_state.report_internal("loading session for request", &error);
            AuthRejection::Internal
        }
    }
}

/// Rejection type for the authentication extractors.
#[derive(Debug)]
pub enum AuthRejection {
    Unauthorized,
    RedirectToLogin { original_uri: String },
    Internal,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        match self {
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "not logged in").into_response(),
            Self::RedirectToLogin { original_uri } => {
                let target = format!(
                    "{REDIRECT_PATH}?redirect_to={}",
                    urlencoding::encode(&original_uri)
                );
                Redirect::temporary(&target).into_response()
            }
            Self::Internal => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
            }
        }
    }
}
