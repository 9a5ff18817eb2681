//! End-to-end tests for the auth HTTP surface, wired to in-memory stores
//! and a stubbed IDP.

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode, header};
use axum::routing::get;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{Duration, Utc};
use gatehouse_access::{
    InviteKey, InviteKeyStore, InviteKeyType, LoginState, MEMBER_ROLE, MemoryInviteKeyStore,
    MemorySessionStore, MemoryTenantStore, Session, SessionStore, Tenant, TenantRoles, TokenSet,
    invite_state,
};
use gatehouse_console::auth::oidc::{
    AuditEvent, Authenticator, AuthenticatorFactory, CallbackParams, IdpClient,
    ImpersonateResponse, OidcError,
};
use gatehouse_console::auth::{
    self, AppState, LogErrorReporter, PageAuth, RequireAuth, SessionManager,
};
use gatehouse_console::config::{AuthConfig, EnvironmentConfig, SessionConfig, Universe};
use gatehouse_core::{CompanyId, SessionId, TenantId, UserId};
use gatehouse_rbac::{Membership, RbacError, RbacGroup, RbacService, RbacUser};
use gatehouse_secrets::{M2mSecrets, MemorySecretStore};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;
use uuid::Uuid;

const TENANT_URL: &str = "https://acme.tenant.example.com";

/// Mints an unsigned JWT for `subject`, issued by `issuer`, expiring
/// `lifetime` from now.
fn unsigned_token(subject: &str, issuer: &str, lifetime: Duration) -> String {
    let claims = json!({
        "sub": subject,
        "iss": issuer,
        "name": "Test User",
        "email": "user@example.com",
        "email_verified": true,
        "picture": "https://example.com/pic.png",
        "exp": (Utc::now() + lifetime).timestamp(),
    });
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string().as_bytes());
    format!("{header}.{payload}.")
}

/// A token triple where every slot holds the same JWT.
fn triple(subject: &str, issuer: &str, lifetime: Duration) -> TokenSet {
    let token = unsigned_token(subject, issuer, lifetime);
    TokenSet::new(token.clone(), token.clone(), token)
}

/// Queue of token triples the stub authenticator hands out on exchange.
#[derive(Clone, Default)]
struct StubExchange {
    queued: Arc<Mutex<Vec<TokenSet>>>,
}

impl StubExchange {
    fn push(&self, tokens: TokenSet) {
        self.queued.lock().expect("lock").push(tokens);
    }
}

struct StubAuthenticator {
    exchange: StubExchange,
}

#[async_trait]
impl Authenticator for StubAuthenticator {
    fn auth_code_url(&self, state: &str) -> String {
        format!(
            "https://idp.example.com/oidc/authorize?state={}",
            urlencoding::encode(state)
        )
    }

    async fn process_auth_code_callback(
        &self,
        params: &CallbackParams,
        expected_state: &str,
    ) -> Result<TokenSet, OidcError> {
        if params.state != expected_state {
            return Err(OidcError::StateMismatch);
        }
        let mut queued = self.exchange.queued.lock().expect("lock");
        if queued.is_empty() {
            return Err(OidcError::ExchangeFailed("no stubbed tokens".to_string()));
        }
        Ok(queued.remove(0))
    }
}

struct StubAuthenticatorFactory(StubExchange);

impl AuthenticatorFactory for StubAuthenticatorFactory {
    fn authenticator(
        &self,
        _tenant_url: &str,
        _client_id: &str,
        _client_secret: &str,
        _redirect_url: &str,
    ) -> Result<Box<dyn Authenticator>, OidcError> {
        Ok(Box::new(StubAuthenticator {
            exchange: self.0.clone(),
        }))
    }
}

/// IDP stub: hands back a federated-login URL, or fails when told to.
#[derive(Default)]
struct StubIdp {
    fail: AtomicBool,
}

#[async_trait]
impl IdpClient for StubIdp {
    async fn impersonate_user(
        &self,
        tenant_url: &str,
        _auth_header: &str,
        _refresh_token: &str,
        target_user_id: UserId,
    ) -> Result<ImpersonateResponse, OidcError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(OidcError::IdpRequest("injected failure".to_string()));
        }
        Ok(ImpersonateResponse {
            redirect_to: format!("{tenant_url}/employee/login?target={target_user_id}"),
        })
    }

    async fn report_event(
        &self,
        _tenant_url: &str,
        _auth_header: &str,
        _event: AuditEvent,
    ) -> Result<(), OidcError> {
        Ok(())
    }
}

/// Records role grants.
#[derive(Default)]
struct RecordingRbac {
    grants: Mutex<Vec<(Uuid, String)>>,
}

#[async_trait]
impl RbacService for RecordingRbac {
    async fn get_user(&self, user_id: UserId) -> Result<RbacUser, RbacError> {
        Ok(RbacUser { id: user_id })
    }

    async fn get_group(&self, group_id: Uuid) -> Result<RbacGroup, RbacError> {
        Ok(RbacGroup { id: group_id })
    }

    async fn add_user_role(
        &self,
        group_id: Uuid,
        user_id: UserId,
        role: &str,
    ) -> Result<Membership, RbacError> {
        self.grants
            .lock()
            .expect("lock")
            .push((group_id, role.to_string()));
        Ok(Membership {
            group_id,
            user_id,
            role: role.to_string(),
        })
    }

    async fn remove_user(&self, _group_id: Uuid, _user_id: UserId) -> Result<(), RbacError> {
        Ok(())
    }
}

async fn page_ok(PageAuth(_): PageAuth) -> StatusCode {
    StatusCode::ACCEPTED
}

async fn api_ok(RequireAuth(_): RequireAuth) -> StatusCode {
    StatusCode::ACCEPTED
}

struct Harness {
    app: Router,
    sessions: Arc<MemorySessionStore>,
    invites: Arc<MemoryInviteKeyStore>,
    tenants: Arc<MemoryTenantStore>,
    exchange: StubExchange,
    idp: Arc<StubIdp>,
    rbac: Arc<RecordingRbac>,
    m2m: M2mSecrets,
    tenant: Tenant,
}

impl Harness {
    async fn new() -> Self {
        let sessions = Arc::new(MemorySessionStore::new());
        let invites = Arc::new(MemoryInviteKeyStore::new());
        let tenants = Arc::new(MemoryTenantStore::new());
        let exchange = StubExchange::default();
        let idp = Arc::new(StubIdp::default());
        let rbac = Arc::new(RecordingRbac::default());
        let m2m = M2mSecrets::new(Arc::new(MemorySecretStore::new()), "console");

        let tenant_id = TenantId::new();
        let company_id = CompanyId::new();
        let tenant = Tenant {
            id: tenant_id,
            company_id,
            tenant_url: TENANT_URL.to_string(),
        };
        tenants.add_tenant(tenant.clone()).await;
        m2m.create_for_tenant(tenant_id).await.expect("m2m secret");

        let state = Arc::new(AppState {
            sessions: SessionManager::new(
                sessions.clone(),
                SessionConfig {
                    secure_cookies: false,
                    ..SessionConfig::default()
                },
            ),
            invites: invites.clone(),
            tenants: tenants.clone(),
            authenticators: Arc::new(StubAuthenticatorFactory(exchange.clone())),
            idp: idp.clone(),
            m2m: m2m.clone(),
            rbac: rbac.clone(),
            auth_config: AuthConfig {
                tenant_id,
                tenant_url: TENANT_URL.to_string(),
                company_id,
                client_id: "console-client".to_string(),
                client_secret: "console-secret".to_string(),
            },
            env: EnvironmentConfig {
                universe: Universe::Prod,
                region: "aws-us-east-1".to_string(),
                kubernetes: false,
                console_url: "https://console.example.com".to_string(),
            },
            reporter: Arc::new(LogErrorReporter),
        });

        let protected = Router::new()
            .route("/some/path", get(page_ok))
            .route("/api/data", get(api_ok))
            .with_state(state.clone());
        let app = auth::router(state).merge(protected);

        Self {
            app,
            sessions,
            invites,
            tenants,
            exchange,
            idp,
            rbac,
            m2m,
            tenant,
        }
    }

    async fn get(&self, uri: &str, cookie: Option<&str>) -> Response<Body> {
        let mut builder = Request::builder().uri(uri).header(header::HOST, "console.example.com");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.app
            .clone()
            .oneshot(builder.body(Body::empty()).expect("request"))
            .await
            .expect("response")
    }

    async fn post_json(
        &self,
        uri: &str,
        cookie: Option<&str>,
        body: serde_json::Value,
    ) -> Response<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::HOST, "console.example.com")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.app
            .clone()
            .oneshot(builder.body(Body::from(body.to_string())).expect("request"))
            .await
            .expect("response")
    }

    /// Seeds a logged-in session directly in the store.
    async fn seed_session(&self, tokens: TokenSet, state: Option<String>) -> Session {
        let mut session = Session::new();
        session.install_tokens(tokens);
        session.set_state(state);
        self.sessions
            .save_session(&mut session)
            .await
            .expect("save");
        session
    }

    async fn reload(&self, id: SessionId) -> Session {
        self.sessions
            .get_session(id)
            .await
            .expect("load")
            .expect("present")
    }
}

fn cookie_for(id: SessionId) -> String {
    format!("auth-session-id={id}")
}

fn location(response: &Response<Body>) -> &str {
    response
        .headers()
        .get(header::LOCATION)
        .expect("location header")
        .to_str()
        .expect("utf8")
}

async fn json_body(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

#[tokio::test]
async fn page_without_cookie_redirects_to_login() {
    let harness = Harness::new().await;
    let response = harness.get("/some/path", None).await;

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        location(&response),
        "/auth/redirect?redirect_to=%2Fsome%2Fpath"
    );
}

#[tokio::test]
async fn api_without_cookie_is_unauthorized() {
    let harness = Harness::new().await;
    let response = harness.get("/api/data", None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn authenticated_requests_pass_both_extractors() {
    let harness = Harness::new().await;
    let subject = Uuid::new_v4().to_string();
    let session = harness
        .seed_session(triple(&subject, TENANT_URL, Duration::hours(1)), None)
        .await;
    let cookie = cookie_for(session.id());

    let response = harness.get("/api/data", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let response = harness.get("/some/path", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn expired_session_fails_closed() {
    let harness = Harness::new().await;
    let subject = Uuid::new_v4().to_string();
    let session = harness
        .seed_session(triple(&subject, TENANT_URL, Duration::hours(-1)), None)
        .await;
    let cookie = cookie_for(session.id());

    let response = harness.get("/api/data", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = harness.get("/some/path", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
}

#[tokio::test]
async fn login_roundtrip_preserves_redirect_target() {
    let harness = Harness::new().await;

    let response = harness
        .get("/auth/redirect?redirect_to=%2Fsome%2Fpath", None)
        .await;
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    let auth_url = location(&response).to_string();
    assert!(auth_url.starts_with("https://idp.example.com/oidc/authorize?state="));

    // The state the IDP got back must match the session's stored state.
    let encoded_state = auth_url.split_once("state=").expect("state param").1;
    let state_value = urlencoding::decode(encoded_state).expect("decode").into_owned();

    let session_cookie = response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("auth-session-id="))
        .expect("session cookie")
        .split(';')
        .next()
        .expect("cookie pair")
        .to_string();

    let subject = Uuid::new_v4().to_string();
    let exchanged = triple(&subject, TENANT_URL, Duration::hours(1));
    harness.exchange.push(exchanged.clone());

    let callback_uri = format!(
        "/auth/callback?code=authcode&state={}",
        urlencoding::encode(&state_value)
    );
    let response = harness.get(&callback_uri, Some(&session_cookie)).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/some/path");

    // Round-trip: the stored row holds exactly the exchanged triple.
    let session_id: SessionId = session_cookie
        .split_once('=')
        .expect("pair")
        .1
        .parse()
        .expect("session id");
    let stored = harness.reload(session_id).await;
    assert_eq!(stored.tokens(), &exchanged);
}

#[tokio::test]
async fn external_redirect_target_is_rejected() {
    let harness = Harness::new().await;
    let response = harness
        .get(
            "/auth/redirect?redirect_to=http%3A%2F%2Fevil.example.com",
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn callback_with_malformed_state_is_rejected() {
    let harness = Harness::new().await;
    let subject = Uuid::new_v4().to_string();
    let session = harness
        .seed_session(
            triple(&subject, TENANT_URL, Duration::hours(1)),
            Some("no-separator".to_string()),
        )
        .await;

    let response = harness
        .get(
            "/auth/callback?code=x&state=no-separator",
            Some(&cookie_for(session.id())),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn expired_impersonation_reverts_to_operator() {
    let harness = Harness::new().await;
    let operator_subject = Uuid::new_v4().to_string();
    let target_subject = Uuid::new_v4().to_string();

    let operator_tokens = triple(&operator_subject, TENANT_URL, Duration::hours(2));
    let mut session = Session::new();
    session.install_tokens(operator_tokens.clone());
    session.request_impersonation().expect("request");
    session.install_tokens(triple(&target_subject, TENANT_URL, Duration::hours(-1)));
    harness
        .sessions
        .save_session(&mut session)
        .await
        .expect("save");
    let cookie = cookie_for(session.id());

    // The expired impersonated credential falls back to the operator.
    let response = harness.get("/auth/userinfo", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["user_profile"]["id"], operator_subject);
    assert!(body.get("impersonator_profile").is_none());

    // And the reversion was persisted.
    let stored = harness.reload(session.id()).await;
    assert_eq!(stored.tokens(), &operator_tokens);
    assert_eq!(stored.impersonation(), &gatehouse_access::Impersonation::None);
}

#[tokio::test]
async fn impersonation_lifecycle() {
    let harness = Harness::new().await;
    let operator_subject = Uuid::new_v4().to_string();
    let target_subject = Uuid::new_v4().to_string();
    let target_user = UserId::new();

    let operator_tokens = triple(&operator_subject, TENANT_URL, Duration::hours(2));
    let login_state = LoginState::new("/").encode();
    let session = harness
        .seed_session(operator_tokens.clone(), Some(login_state.clone()))
        .await;
    let cookie = cookie_for(session.id());

    // Begin impersonation: pending marker persisted, federated-login URL
    // returned.
    let response = harness
        .post_json(
            "/auth/impersonateuser",
            Some(&cookie),
            json!({
                "tenant_id": harness.tenant.id,
                "target_user_id": target_user,
            }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert!(
        body["redirect_to"]
            .as_str()
            .expect("redirect_to")
            .starts_with(TENANT_URL)
    );
    assert!(harness.reload(session.id()).await.impersonation().is_pending());

    // Completing the federated re-login flips the session to the target
    // while preserving the operator's triple.
    let target_tokens = triple(&target_subject, TENANT_URL, Duration::hours(1));
    harness.exchange.push(target_tokens.clone());
    let callback_uri = format!(
        "/auth/callback?code=imp&state={}",
        urlencoding::encode(&login_state)
    );
    let response = harness.get(&callback_uri, Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let stored = harness.reload(session.id()).await;
    assert!(stored.impersonation().is_active());
    assert_eq!(stored.tokens(), &target_tokens);

    // Userinfo shows both principals.
    let response = harness.get("/auth/userinfo", Some(&cookie)).await;
    let body = json_body(response).await;
    assert_eq!(body["user_profile"]["id"], target_subject);
    assert_eq!(body["impersonator_profile"]["id"], operator_subject);

    // No nesting: a second impersonation while one is active is a client
    // error.
    let response = harness
        .post_json(
            "/auth/impersonateuser",
            Some(&cookie),
            json!({
                "tenant_id": harness.tenant.id,
                "target_user_id": UserId::new(),
            }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Revert restores the operator.
    let response = harness
        .post_json("/auth/unimpersonateuser", Some(&cookie), json!({}))
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let stored = harness.reload(session.id()).await;
    assert_eq!(stored.tokens(), &operator_tokens);
    assert_eq!(stored.impersonation(), &gatehouse_access::Impersonation::None);

    // Nothing left to revert.
    let response = harness
        .post_json("/auth/unimpersonateuser", Some(&cookie), json!({}))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn impersonation_cannot_cross_tenants() {
    let harness = Harness::new().await;
    let other_tenant = Tenant {
        id: TenantId::new(),
        company_id: harness.tenant.company_id,
        tenant_url: "https://other.tenant.example.com".to_string(),
    };
    harness.tenants.add_tenant(other_tenant.clone()).await;
    harness
        .m2m
        .create_for_tenant(other_tenant.id)
        .await
        .expect("m2m");

    let operator_subject = Uuid::new_v4().to_string();
    let session = harness
        .seed_session(triple(&operator_subject, TENANT_URL, Duration::hours(1)), None)
        .await;

    let response = harness
        .post_json(
            "/auth/impersonateuser",
            Some(&cookie_for(session.id())),
            json!({
                "tenant_id": other_tenant.id,
                "target_user_id": UserId::new(),
            }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn failed_impersonation_rolls_back_pending_marker() {
    let harness = Harness::new().await;
    harness.idp.fail.store(true, Ordering::SeqCst);

    let operator_subject = Uuid::new_v4().to_string();
    let session = harness
        .seed_session(triple(&operator_subject, TENANT_URL, Duration::hours(1)), None)
        .await;

    let response = harness
        .post_json(
            "/auth/impersonateuser",
            Some(&cookie_for(session.id())),
            json!({
                "tenant_id": harness.tenant.id,
                "target_user_id": UserId::new(),
            }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // The pending marker did not leak into the stored session, so a retry
    // stays possible.
    let stored = harness.reload(session.id()).await;
    assert_eq!(stored.impersonation(), &gatehouse_access::Impersonation::None);
}

#[tokio::test]
async fn invite_callback_binds_and_grants_roles() {
    let harness = Harness::new().await;

    let mut tenant_roles = TenantRoles::new();
    tenant_roles.insert(harness.tenant.id, MEMBER_ROLE.to_string());
    let invite = InviteKey::new(
        InviteKeyType::ExistingCompany,
        "welcome-key",
        Utc::now() + Duration::days(7),
        harness.tenant.company_id,
        MEMBER_ROLE,
        tenant_roles,
        "invitee@example.com",
    );
    harness.invites.save_invite_key(&invite).await.expect("seed");

    let invitee = Uuid::new_v4().to_string();
    harness
        .exchange
        .push(triple(&invitee, TENANT_URL, Duration::hours(1)));

    let uri = format!(
        "/auth/invitecallback?code=x&state={}",
        urlencoding::encode(&invite_state("welcome-key"))
    );
    let response = harness.get(&uri, None).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/");

    // The key is consumed and bound, and the grants went out: company
    // first, then the tenant from the invite's role map.
    let grants = harness.rbac.grants.lock().expect("lock");
    assert_eq!(
        grants.as_slice(),
        &[
            (harness.tenant.company_id.as_uuid(), MEMBER_ROLE.to_string()),
            (harness.tenant.id.as_uuid(), MEMBER_ROLE.to_string()),
        ]
    );
    drop(grants);

    // A consumed key is no longer resolvable, so replaying the callback
    // fails even with a fresh login.
    harness
        .exchange
        .push(triple(&invitee, TENANT_URL, Duration::hours(1)));
    let response = harness.get(&uri, None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn invite_cannot_bind_to_second_user() {
    let harness = Harness::new().await;

    // Non-consuming invite type: the key survives the first bind.
    let invite = InviteKey::new(
        InviteKeyType::Unknown,
        "pending-key",
        Utc::now() + Duration::days(7),
        harness.tenant.company_id,
        MEMBER_ROLE,
        TenantRoles::new(),
        "invitee@example.com",
    );
    harness.invites.save_invite_key(&invite).await.expect("seed");

    let uri = format!(
        "/auth/invitecallback?code=x&state={}",
        urlencoding::encode(&invite_state("pending-key"))
    );

    let first = Uuid::new_v4().to_string();
    harness
        .exchange
        .push(triple(&first, TENANT_URL, Duration::hours(1)));
    let response = harness.get(&uri, None).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let second = Uuid::new_v4().to_string();
    harness
        .exchange
        .push(triple(&second, TENANT_URL, Duration::hours(1)));
    let response = harness.get(&uri, None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn logout_clears_cookie_and_routes_through_idp() {
    let harness = Harness::new().await;
    let subject = Uuid::new_v4().to_string();
    let session = harness
        .seed_session(triple(&subject, TENANT_URL, Duration::hours(1)), None)
        .await;

    let response = harness
        .get("/auth/logout", Some(&cookie_for(session.id())))
        .await;
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert!(location(&response).starts_with(&format!("{TENANT_URL}/logout?")));

    let cleared = response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("auth-session-id="))
        .expect("removal cookie");
    assert!(cleared.contains("Max-Age=0"));
}
