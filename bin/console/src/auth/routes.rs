//! Authentication routes: login round trip, invite callback, employee
//! login handoff, logout, and userinfo.

use axum::{
    Json,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::CookieJar;
use gatehouse_access::{LoginState, UserInfo, parse_invite_state};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use super::oidc::{CallbackParams, OidcError};
use super::session::{PageAuth, RequireAuth};
use super::{AppState, invite};
use crate::config::Universe;

/// Root path of the console auth handler.
pub const ROOT_PATH: &str = "/auth";

/// Path to the endpoint that starts a login.
pub const REDIRECT_PATH: &str = "/auth/redirect";

/// Path the IDP redirects back to after login.
pub const AUTH_CALLBACK_PATH: &str = "/auth/callback";

/// Path the IDP redirects to after an invited user logs in for the first
/// time via the invite.
pub const INVITE_CALLBACK_PATH: &str = "/auth/invitecallback";

/// Failure responses for the auth handlers.
#[derive(Debug)]
pub enum AuthFailure {
    /// A state value did not parse into the expected two-part format.
    MalformedState { state: String },
    /// The `redirect_to` target is not acceptable in this universe.
    InvalidRedirect { redirect_to: String },
    /// A generic client error.
    BadRequest { message: String },
    /// The authenticated user may not perform the operation.
    Forbidden { message: String },
    /// The code exchange with the IDP failed.
    Exchange { status: StatusCode },
    /// The invite key is expired, used, or bound elsewhere.
    InviteInvalid { message: String },
    /// An unexpected failure; details were already logged and reported.
    Internal,
}

impl AuthFailure {
    /// Maps an exchange error onto the status the original callback
    /// contract uses: 400 for protocol violations, 401 for a rejected
    /// code, 500 for everything unexpected.
    fn from_oidc(error: &OidcError) -> Self {
        let status = match error {
            OidcError::StateMismatch | OidcError::MissingIdToken => StatusCode::BAD_REQUEST,
            OidcError::ExchangeFailed(_) => StatusCode::UNAUTHORIZED,
            OidcError::Configuration(_) | OidcError::IdpRequest(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::Exchange { status }
    }
}

impl IntoResponse for AuthFailure {
    fn into_response(self) -> Response {
        match self {
            Self::MalformedState { state } => (
                StatusCode::BAD_REQUEST,
                format!("malformed state: {state}"),
            )
                .into_response(),
            Self::InvalidRedirect { redirect_to } => (
                StatusCode::BAD_REQUEST,
                format!("invalid console redirect url: {redirect_to}"),
            )
                .into_response(),
            Self::BadRequest { message } => (StatusCode::BAD_REQUEST, message).into_response(),
            Self::Forbidden { message } => (StatusCode::FORBIDDEN, message).into_response(),
            Self::Exchange { status } => (status, "authentication failed").into_response(),
            Self::InviteInvalid { message } => (StatusCode::BAD_REQUEST, message).into_response(),
            Self::Internal => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
            }
        }
    }
}

/// Rejects redirect targets that could bounce the browser off-site.
///
/// Anything goes in dev-like universes to support frontend dev servers on
/// other origins; elsewhere only rooted paths are allowed.
pub fn validate_redirect_to(universe: Universe, redirect_to: &str) -> Result<(), AuthFailure> {
    if universe.allows_external_redirects()
        || redirect_to.is_empty()
        || redirect_to.starts_with('/')
    {
        return Ok(());
    }
    Err(AuthFailure::InvalidRedirect {
        redirect_to: redirect_to.to_string(),
    })
}

/// Host the request was addressed to, for regional URL handling.
fn request_host(headers: &HeaderMap) -> String {
    headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

#[derive(Debug, Default, Deserialize)]
pub struct RedirectQuery {
    #[serde(default)]
    pub redirect_to: String,
}

/// Starts a login: binds a state value to the session and redirects to the
/// IDP's authorization URL.
pub async fn login_redirect(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RedirectQuery>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Response, AuthFailure> {
    let host = request_host(&headers);
    let authr = state
        .authenticator_for_host(&host, AUTH_CALLBACK_PATH)
        .map_err(|e| {
            state.report_internal("building login authenticator", &e);
            AuthFailure::Internal
        })?;

    let mut session = match state.sessions.get_auth_session(&jar).await {
        Ok(session) => session,
        Err(e) => {
            // A cookie that doesn't resolve anymore; drop it and restart
            // the login from scratch.
            tracing::warn!(error = %e, "clearing unusable session cookie");
            let jar = state.sessions.clear_session_cookie(jar);
            return Ok((jar, Redirect::to(REDIRECT_PATH)).into_response());
        }
    };

    validate_redirect_to(state.env.universe, &query.redirect_to)?;

    let (jar, login_state) = match session.state() {
        // A login is already in flight; reuse its state so we keep
        // redirecting to the first URL handed to us.
        Some(existing) => (jar, existing.to_string()),
        None => {
            let fresh = LoginState::new(&query.redirect_to).encode();
            session.set_state(Some(fresh.clone()));
            let jar = state
                .sessions
                .save_session(&mut session, jar)
                .await
                .map_err(|e| {
                    state.report_internal("saving session for login", &e);
                    AuthFailure::Internal
                })?;
            (jar, fresh)
        }
    };

    let auth_code_url = authr.auth_code_url(&login_state);
    tracing::info!(url = %auth_code_url, "redirecting to login");
    Ok((jar, Redirect::temporary(&auth_code_url)).into_response())
}

/// Completes a login: exchanges the code for tokens, preserving the
/// operator's triple when an impersonation was pending, and sends the
/// browser to the original redirect target.
pub async fn login_callback(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Response, AuthFailure> {
    let mut session = state.sessions.get_auth_session(&jar).await.map_err(|e| {
        state.report_internal("loading session for callback", &e);
        AuthFailure::Internal
    })?;

    let raw_state = session.state().unwrap_or_default().to_string();
    let login_state = LoginState::parse(&raw_state).map_err(|_| AuthFailure::MalformedState {
        state: raw_state.clone(),
    })?;

    let mut redirect_to = login_state.redirect_to().to_string();
    if redirect_to.is_empty() {
        redirect_to = "/".to_string(); // default
    }

    let host = request_host(&headers);
    let authr = state
        .authenticator_for_host(&host, AUTH_CALLBACK_PATH)
        .map_err(|e| {
            state.report_internal("building callback authenticator", &e);
            AuthFailure::Internal
        })?;

    let tokens = authr
        .process_auth_code_callback(&params, &raw_state)
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, "auth code callback failed");
            AuthFailure::from_oidc(&e)
        })?;

    if session.install_tokens(tokens) == gatehouse_access::TokenInstall::ReplacedUnexpectedly {
        tracing::error!("impersonation session not requested but ID token already set");
    }

    let jar = state
        .sessions
        .save_session(&mut session, jar)
        .await
        .map_err(|e| {
            state.report_internal("saving session after callback", &e);
            AuthFailure::Internal
        })?;

    Ok((jar, Redirect::to(&redirect_to)).into_response())
}

/// Completes an invited user's first login: exchanges the code, binds the
/// invite to the resulting principal, and grants the invite's roles.
pub async fn invite_callback(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Response, AuthFailure> {
    tracing::debug!(state = %params.state, "invite callback");

    let mut session = match state.sessions.get_auth_session(&jar).await {
        Ok(session) => session,
        Err(_) => {
            // Landed here without a usable session; go create one.
            return Ok(Redirect::to("/").into_response());
        }
    };

    if params.state.is_empty() {
        // Not sent here by the IDP; redirect to login to create a session.
        return Ok(Redirect::to("/").into_response());
    }

    let key = parse_invite_state(&params.state).map_err(|_| AuthFailure::MalformedState {
        state: params.state.clone(),
    })?;

    let mut invite = state
        .invites
        .get_valid_invite_key(key)
        .await
        .map_err(|e| {
            state.report_internal("loading invite key", &e);
            AuthFailure::Internal
        })?
        .ok_or_else(|| AuthFailure::InviteInvalid {
            message: "invite is expired, already used, or unknown".to_string(),
        })?;

    let host = request_host(&headers);
    let authr = state
        .authenticator_for_host(&host, INVITE_CALLBACK_PATH)
        .map_err(|e| {
            state.report_internal("building invite authenticator", &e);
            AuthFailure::Internal
        })?;

    let tokens = authr
        .process_auth_code_callback(&params, &params.state)
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, "invite callback exchange failed");
            AuthFailure::from_oidc(&e)
        })?;

    let user = UserInfo::from_id_token(&tokens.id_token).map_err(|e| {
        state.report_internal("parsing invited user's ID token", &e);
        AuthFailure::Internal
    })?;
    let user_id = user.user_id().map_err(|e| {
        state.report_internal("parsing invited user's subject", &e);
        AuthFailure::Internal
    })?;

    session.install_tokens(tokens);
    let jar = state
        .sessions
        .save_session(&mut session, jar)
        .await
        .map_err(|e| {
            state.report_internal("saving session after invite login", &e);
            AuthFailure::Internal
        })?;

    // Bind (and for auto-consuming types, consume) the invite before the
    // role grant: if the grant fails we still must never let the key be
    // replayed.
    invite.bind(user_id).map_err(|e| AuthFailure::InviteInvalid {
        message: e.to_string(),
    })?;
    state.invites.save_invite_key(&invite).await.map_err(|e| {
        state.report_internal("saving bound invite key", &e);
        AuthFailure::Internal
    })?;

    if invite.invite_type == gatehouse_access::InviteKeyType::ExistingCompany {
        let tenants = state
            .tenants
            .list_tenants_for_company(invite.company_id)
            .await
            .map_err(|e| {
                state.report_internal("listing company tenants for invite", &e);
                AuthFailure::Internal
            })?;

        invite::grant_invite_roles(state.rbac.as_ref(), user_id, &invite, &tenants)
            .await
            .map_err(|e| {
                // User and company were validated already, so this is on us.
                state.report_internal("granting invite roles", &e);
                AuthFailure::Internal
            })?;
    }

    // Back to the root page after accepting the invite.
    Ok((jar, Redirect::to("/")).into_response())
}

#[derive(Debug, Default, Deserialize)]
pub struct EmployeeLoginQuery {
    #[serde(default)]
    pub request_session_id: String,
    #[serde(default)]
    pub request_state: String,
    #[serde(default)]
    pub request_tenant_id: String,
}

/// Federated employee login handoff: forwards the console identity to a
/// tenant's employee auth callback.
pub async fn employee_login(
    State(state): State<Arc<AppState>>,
    PageAuth(identity): PageAuth,
    Query(query): Query<EmployeeLoginQuery>,
) -> Result<Response, AuthFailure> {
    let request_session_id =
        Uuid::from_str(&query.request_session_id).map_err(|_| AuthFailure::BadRequest {
            message: "request_session_id missing or malformed in request".to_string(),
        })?;

    if query.request_state.is_empty() {
        return Err(AuthFailure::BadRequest {
            message: "request_state missing or malformed in request".to_string(),
        });
    }

    let tenant_id = gatehouse_core::TenantId::from_str(&query.request_tenant_id).map_err(|_| {
        AuthFailure::BadRequest {
            message: "request_tenant_id missing or malformed in request".to_string(),
        }
    })?;

    let tenant = state
        .tenants
        .get_tenant(tenant_id)
        .await
        .map_err(|e| {
            state.report_internal("loading tenant for employee login", &e);
            AuthFailure::Internal
        })?
        .ok_or_else(|| AuthFailure::BadRequest {
            message: format!("tenant ID unrecognized: {tenant_id}"),
        })?;

    // Redirect back to the tenant, passing the request session, state, and
    // the console identity's ID token.
    let query_string: String = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("request_session_id", &request_session_id.to_string())
        .append_pair("request_state", &query.request_state)
        .append_pair("id_token", identity.user.raw_id_token())
        .finish();
    let redirect_uri = format!("{}/employee/authcallback?{query_string}", tenant.tenant_url);

    Ok(Redirect::to(&redirect_uri).into_response())
}

/// Logs out: clears the session cookie and sends the browser through the
/// IDP's logout endpoint.
pub async fn logout(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RedirectQuery>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Response, AuthFailure> {
    // Clear auth cookies locally; the row is left for the sweep.
    let jar = state.sessions.clear_session_cookie(jar);

    validate_redirect_to(state.env.universe, &query.redirect_to)?;

    let host = request_host(&headers);
    let redirect_to = if query.redirect_to.is_empty() || query.redirect_to.starts_with('/') {
        // Relative to the console base for this host.
        format!("{}{}", state.console_base_for_host(&host), query.redirect_to)
    } else {
        query.redirect_to.clone()
    };

    let logout_query: String = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("client_id", &state.auth_config.client_id)
        .append_pair("redirect_url", &redirect_to)
        .finish();
    let logout_url = format!("{}/logout?{logout_query}", state.auth_config.tenant_url);

    Ok((jar, Redirect::temporary(&logout_url)).into_response())
}

#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub email_verified: bool,
    pub picture: String,
}

impl UserProfile {
    fn from_user_info(info: &UserInfo) -> Self {
        let claims = info.claims();
        Self {
            // The platform IDP always issues UUID subjects.
            id: Uuid::from_str(&claims.subject).unwrap_or(Uuid::nil()),
            name: claims.name.clone(),
            email: claims.email.clone(),
            email_verified: claims.email_verified,
            picture: claims.picture.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UserInfoResponse {
    pub user_profile: UserProfile,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impersonator_profile: Option<UserProfile>,
}

/// Returns the logged-in user's profile, plus the operator's profile when
/// the request is made under an impersonation.
pub async fn user_info(RequireAuth(identity): RequireAuth) -> Json<UserInfoResponse> {
    Json(UserInfoResponse {
        user_profile: UserProfile::from_user_info(&identity.user),
        impersonator_profile: identity
            .impersonator
            .as_ref()
            .map(UserProfile::from_user_info),
    })
}
