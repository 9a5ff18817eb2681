use gatehouse_access::SessionStore;
use gatehouse_console::{
    auth::{
        self, AppState, LogErrorReporter, SessionManager,
        db::{PgInviteKeyStore, PgSessionStore, PgTenantStore},
        oidc::{HttpIdpClient, OAuthAuthenticatorFactory},
    },
    config::ServerConfig,
};
use gatehouse_rbac::HttpRbacClient;
use gatehouse_secrets::{EnvSecretStore, M2mSecrets, SecretStore};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Service name under which the console's secrets are stored.
const SERVICE_NAME: &str = "console";

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = ServerConfig::from_env().expect("failed to load configuration");
    tracing::info!("Loaded configuration");

    // Create database connection pool
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    // Run migrations
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .expect("failed to run migrations");

    let session_store = Arc::new(PgSessionStore::new(db_pool.clone()));

    // Sweep session rows whose cookies have long expired, on startup and
    // then periodically.
    let stale_after = chrono::Duration::days(config.session.cookie_days);
    match session_store
        .delete_sessions_older_than(chrono::Utc::now() - stale_after)
        .await
    {
        Ok(count) if count > 0 => {
            tracing::info!(deleted_sessions = count, "Cleaned up stale sessions on startup");
        }
        Ok(_) => {}
        Err(e) => {
            tracing::warn!(error = %e, "Failed to clean up stale sessions on startup");
        }
    }

    let sweep_store = Arc::new(PgSessionStore::new(db_pool.clone()));
    let sweep_interval_secs = config.session.sweep_interval_seconds;
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(sweep_interval_secs));
        loop {
            interval.tick().await;
            match sweep_store
                .delete_sessions_older_than(chrono::Utc::now() - stale_after)
                .await
            {
                Ok(count) if count > 0 => {
                    tracing::debug!(deleted_sessions = count, "Periodic session sweep");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to sweep stale sessions");
                }
            }
        }
    });

    // Per-tenant M2M secrets, and an RBAC client authorized as the console
    // tenant for role grants.
    let secret_store: Arc<dyn SecretStore> = Arc::new(EnvSecretStore::new());
    let m2m = M2mSecrets::new(secret_store, SERVICE_NAME);
    let rbac_auth_header = m2m
        .auth_header_for_tenant(config.auth.tenant_id)
        .await
        .expect("console tenant M2M secret not provisioned");
    let rbac = Arc::new(HttpRbacClient::new(
        config.auth.tenant_url.clone(),
        rbac_auth_header,
    ));

    let state = Arc::new(AppState {
        sessions: SessionManager::new(session_store, config.session.clone()),
        invites: Arc::new(PgInviteKeyStore::new(db_pool.clone())),
        tenants: Arc::new(PgTenantStore::new(db_pool)),
        authenticators: Arc::new(OAuthAuthenticatorFactory),
        idp: Arc::new(HttpIdpClient::new()),
        m2m,
        rbac,
        auth_config: config.auth,
        env: config.environment,
        reporter: Arc::new(LogErrorReporter),
    });

    let app = auth::router(state).layer(tower_http::trace::TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .expect("failed to bind to address");

    tracing::info!("listening on http://{}", config.listen_addr);

    axum::serve(listener, app.into_make_service())
        .await
        .expect("server error");
}
