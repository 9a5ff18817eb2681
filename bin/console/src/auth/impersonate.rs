//! Operator impersonation endpoints.
//!
//! Impersonation rides on the ordinary login machinery: the console marks
//! the session as impersonation-pending, asks the IDP to begin a federated
//! login as the target user (authorized by the operator's refresh token),
//! and the resulting callback lands in the login callback, which preserves
//! the operator's triple in the impersonator slot.

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use gatehouse_access::TokenClaims;
use gatehouse_core::{TenantId, UserId};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use super::oidc::AuditEvent;
use super::routes::AuthFailure;
use super::session::RequireAuth;
use super::AppState;

#[derive(Debug, Deserialize)]
pub struct ImpersonateUserRequest {
    pub tenant_id: TenantId,
    pub target_user_id: UserId,
}

/// Begins impersonating another user in the operator's login tenant.
///
/// The pending marker is persisted *before* the IDP call so a concurrent
/// duplicate request observes an impersonation in progress rather than
/// racing. If the IDP call fails, the marker is rolled back; otherwise the
/// response carries the federated-login URL that completes the switch.
pub async fn impersonate_user(
    State(state): State<Arc<AppState>>,
    RequireAuth(identity): RequireAuth,
    jar: CookieJar,
    Json(req): Json<ImpersonateUserRequest>,
) -> Result<Response, AuthFailure> {
    let tenant = state
        .tenants
        .get_tenant(req.tenant_id)
        .await
        .map_err(|e| {
            state.report_internal("loading tenant for impersonation", &e);
            AuthFailure::Internal
        })?
        .ok_or_else(|| AuthFailure::BadRequest {
            message: format!("tenant ID unrecognized: {}", req.tenant_id),
        })?;

    let auth_header = state
        .m2m
        .auth_header_for_tenant(tenant.id)
        .await
        .map_err(|e| AuthFailure::BadRequest {
            message: format!("no M2M credential for tenant: {e}"),
        })?;

    let event = AuditEvent {
        event_type: "impersonate_user".to_string(),
        user_alias: identity.user.claims().subject.clone(),
        payload: json!({
            "TargetID": req.target_user_id.to_string(),
            "TenantID": req.tenant_id.to_string(),
        }),
    };
    if let Err(e) = state
        .idp
        .report_event(&tenant.tenant_url, &auth_header, event)
        .await
    {
        tracing::error!(error = %e, "error reporting impersonate_user event");
    }

    let mut session = identity.session;

    let claims =
        TokenClaims::decode_unverified(&session.tokens().refresh_token).map_err(|e| {
            state.report_internal("parsing refresh token for impersonation", &e);
            AuthFailure::Internal
        })?;

    // Impersonation must not cross tenants relative to the issuer the
    // operator logged in through.
    if tenant.tenant_url != claims.issuer {
        return Err(AuthFailure::Forbidden {
            message: "unable to impersonate a user in a different tenant than the one used to log in"
                .to_string(),
        });
    }

    session
        .request_impersonation()
        .map_err(|_| AuthFailure::BadRequest {
            message: "already impersonating a user".to_string(),
        })?;
    let jar = state
        .sessions
        .save_session(&mut session, jar)
        .await
        .map_err(|e| {
            state.report_internal("saving impersonation-pending session", &e);
            AuthFailure::Internal
        })?;

    match state
        .idp
        .impersonate_user(
            &tenant.tenant_url,
            &auth_header,
            &session.tokens().refresh_token,
            req.target_user_id,
        )
        .await
    {
        Ok(response) => Ok((jar, Json(response)).into_response()),
        Err(e) => {
            state.report_internal("impersonation login exchange", &e);
            // Roll the pending marker back so a failed or canceled attempt
            // does not permanently block impersonation for this session.
            session.cancel_pending_impersonation();
            if let Err(save_err) = state.sessions.persist(&mut session).await {
                state.report_internal("rolling back impersonation request", &save_err);
            }
            Err(AuthFailure::BadRequest {
                message: "impersonation request failed".to_string(),
            })
        }
    }
}

/// Stops impersonating: restores the operator's token triple.
pub async fn unimpersonate_user(
    State(state): State<Arc<AppState>>,
    RequireAuth(identity): RequireAuth,
    jar: CookieJar,
) -> Result<Response, AuthFailure> {
    let mut session = identity.session;

    session
        .revert_impersonation()
        .map_err(|_| AuthFailure::BadRequest {
            message: "no impersonation session to revert".to_string(),
        })?;

    let jar = state
        .sessions
        .save_session(&mut session, jar)
        .await
        .map_err(|e| {
            state.report_internal("saving reverted session", &e);
            AuthFailure::Internal
        })?;

    Ok((jar, StatusCode::NO_CONTENT).into_response())
}
