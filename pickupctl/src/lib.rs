//! # pickupctl: School pickup authorization service
//!
//! `pickupctl` decides who may collect a student from school, proves it at the gate, and keeps an
//! append-only record of every decision.
//!
//! ## Overview
//!
//! A guardian asks for a pickup. Staff confirm it, which issues a signed verification token the
//! collecting adult shows as a QR code. A guard at the gate scans the token (or looks the student
//! up), sees who is authorized, and releases the student. Guest pickups, where someone outside the
//! guardian list collects the student, first need one of the student's guardians to approve them.
//! When none of that is possible a guard can record an emergency release, which an administrator
//! reviews afterwards.
//!
//! ## Architecture
//!
//! The HTTP layer is [Axum](https://github.com/tokio-rs/axum). State lives behind the
//! [`db::store::Store`] trait, implemented in memory (development and tests) and on PostgreSQL.
//! People, students and guardianships are read through [`directory::Directory`], which is either a
//! YAML fixture or the same PostgreSQL database.
//!
//! ### Core Components
//!
//! The **pickup services** ([`pickup`]) own the request state machine. Every change goes through a
//! versioned compare-and-swap so concurrent confirms, cancels and releases cannot both win.
//!
//! The **authentication layer** ([`auth`]) verifies passwords against the directory, locks
//! identities after repeated failures, and issues bearer sessions.
//!
//! The **audit trail** ([`audit`]) records every state change and every denied action. Writes on
//! the request path never fail the request; authentication events are the exception.
//!
//! **Notifications** ([`notify`]) are delivered to a signed webhook in the background.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use pickupctl::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = pickupctl::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     pickupctl::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.
pub mod api;
pub mod audit;
pub mod auth;
pub mod clock;
pub mod config;
mod crypto;
pub mod db;
pub mod directory;
pub mod errors;
pub mod notify;
mod openapi;
pub mod pickup;
pub mod telemetry;
mod types;

#[cfg(test)]
mod test_utils;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::HeaderValue;
use axum::{
    Router, http,
    routing::{delete, get, post},
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::api::handlers::{approvals, audit as audit_handlers, auth as auth_handlers, requests, sessions, verify};
use crate::audit::AuditTrail;
use crate::auth::identity::DirectoryVerifier;
use crate::auth::lockout::LockoutGuard;
use crate::auth::login::Authenticator;
use crate::auth::session::SessionRegistry;
use crate::clock::{Clock, SystemClock};
use crate::config::{CorsOrigin, DatabaseConfig, DirectoryConfig};
use crate::db::in_memory::InMemoryStore;
use crate::db::postgres::PostgresStore;
use crate::db::store::Store;
use crate::directory::Directory;
use crate::directory::fixture::StaticDirectory;
use crate::directory::postgres::PostgresDirectory;
use crate::notify::webhook::WebhookNotifier;
use crate::notify::{LogNotifier, NotificationDispatcher, Notifier};
use crate::openapi::ApiDoc;
use crate::pickup::PickupContext;
use crate::pickup::approvals::GuestApprovalCoordinator;
use crate::pickup::release::ReleaseVerifier;
use crate::pickup::tokens::VerificationTokenService;
use crate::pickup::workflow::PickupWorkflow;

pub use config::Config;
pub use types::{ApprovalId, PickupRequestId, SessionId, StudentId, UserId};

/// Application state shared across all request handlers.
///
/// Every service holds its own clones of the store, directory, audit trail and clock, so handlers
/// only ever reach for the service they need.
///
/// # Example
///
/// ```ignore
/// let state = AppState::wire(config, store, directory, clock, notifier)?;
/// let router = build_router(&state)?;
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub directory: Arc<dyn Directory>,
    pub audit: AuditTrail,
    pub sessions: SessionRegistry,
    pub authenticator: Authenticator,
    pub workflow: PickupWorkflow,
    pub approvals: GuestApprovalCoordinator,
    pub tokens: VerificationTokenService,
    pub release: ReleaseVerifier,
}

impl AppState {
    /// Construct every service over the given storage, directory, clock and notifier.
    pub fn wire(
        config: Arc<Config>,
        store: Arc<dyn Store>,
        directory: Arc<dyn Directory>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
    ) -> anyhow::Result<Self> {
        let secret_key = config
            .secret_key
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("secret_key is required to sign verification tokens"))?;

        let audit = AuditTrail::new(store.clone(), clock.clone());
        let ctx = PickupContext {
            store: store.clone(),
            directory: directory.clone(),
            audit: audit.clone(),
            notifications: NotificationDispatcher::new(notifier),
            clock: clock.clone(),
        };

        let tokens = VerificationTokenService::new(ctx.clone(), secret_key, &config.tokens);
        let sessions = SessionRegistry::new(store.clone(), audit.clone(), clock.clone(), &config.auth.session);
        let lockout = LockoutGuard::new(store.clone(), audit.clone(), clock.clone(), &config.auth.lockout);
        let authenticator = Authenticator::new(
            Arc::new(DirectoryVerifier::new(directory.clone())),
            lockout,
            sessions.clone(),
            audit.clone(),
            clock,
        );

        Ok(AppState::builder()
            .config(config)
            .store(store)
            .directory(directory)
            .audit(audit)
            .sessions(sessions)
            .authenticator(authenticator)
            .workflow(PickupWorkflow::new(ctx.clone(), tokens.clone()))
            .approvals(GuestApprovalCoordinator::new(ctx.clone()))
            .release(ReleaseVerifier::new(ctx, tokens.clone()))
            .tokens(tokens)
            .build())
    }
}

/// Get the pickupctl database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Create CORS layer from configuration
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let mut origins = Vec::new();
    let mut any_origin = false;
    for origin in &config.auth.security.cors.allowed_origins {
        match origin {
            CorsOrigin::Wildcard => any_origin = true,
            CorsOrigin::Url(url) => origins.push(url.as_str().trim_end_matches('/').parse::<HeaderValue>()?),
        }
    }

    // tower-http rejects `*` inside an origin list
    let allow_origin = if any_origin { AllowOrigin::any() } else { AllowOrigin::list(origins) };

    let mut cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([http::Method::GET, http::Method::POST, http::Method::DELETE])
        .allow_headers([http::header::AUTHORIZATION, http::header::CONTENT_TYPE])
        .allow_credentials(config.auth.security.cors.allow_credentials)
        .expose_headers(vec![http::header::LOCATION, http::header::RETRY_AFTER]);

    if let Some(max_age) = config.auth.security.cors.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application router with all endpoints and middleware.
///
/// - `/api/v1/*`: the pickup API, including authentication
/// - `/docs`: interactive API reference
/// - `/healthz`: liveness
/// - `/internal/metrics`: Prometheus metrics, when enabled
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    let api_routes = Router::new()
        // Authentication
        .route("/authentication/login", post(auth_handlers::login))
        .route("/authentication/logout", post(auth_handlers::logout))
        .route("/sessions", get(sessions::list_sessions))
        .route("/sessions/revoke-others", post(sessions::revoke_other_sessions))
        .route("/sessions/{id}", delete(sessions::revoke_session))
        // Pickup requests
        .route("/requests", get(requests::list_requests).post(requests::create_request))
        .route("/requests/{id}", get(requests::get_request))
        .route("/requests/{id}/confirm", post(requests::confirm_request))
        .route("/requests/{id}/reject", post(requests::reject_request))
        .route("/requests/{id}/cancel", post(requests::cancel_request))
        .route("/requests/{id}/complete", post(requests::complete_request))
        .route("/requests/{id}/review", post(requests::review_request))
        .route("/requests/{id}/token", get(requests::get_token).post(requests::reissue_token))
        .route("/requests/{id}/approvals", get(requests::list_request_approvals))
        // Guest approvals
        .route("/approvals/pending", get(approvals::list_pending_approvals))
        .route("/approvals/{id}/respond", post(approvals::respond_to_approval))
        // Gate
        .route("/verify/token", post(verify::verify_token))
        .route("/verify/student", post(verify::verify_student))
        .route("/emergency-releases", post(verify::create_emergency_release))
        // Audit
        .route("/audit-logs", get(audit_handlers::list_audit_logs))
        .with_state(state.clone());

    let router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .nest("/api/v1", api_routes)
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()));

    let mut router = router.layer(create_cors_layer(&state.config)?);

    if state.config.enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(|| async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    let router = router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// Open the configured store, connecting and migrating PostgreSQL when external.
#[instrument(skip_all)]
async fn setup_store(config: &Config) -> anyhow::Result<(Arc<dyn Store>, Option<sqlx::PgPool>)> {
    match &config.database {
        DatabaseConfig::Memory => {
            info!("Using in-memory store; all state is lost on shutdown");
            Ok((Arc::new(InMemoryStore::new()), None))
        }
        DatabaseConfig::External { url, pool } => {
            let pg = PgPoolOptions::new()
                .max_connections(pool.max_connections)
                .min_connections(pool.min_connections)
                .acquire_timeout(std::time::Duration::from_secs(pool.acquire_timeout_secs))
                .connect(url)
                .await?;
            migrator().run(&pg).await?;
            info!("Connected to PostgreSQL and applied migrations");
            Ok((Arc::new(PostgresStore::new(pg.clone())), Some(pg)))
        }
    }
}

fn setup_directory(config: &Config, pool: Option<&sqlx::PgPool>) -> anyhow::Result<Arc<dyn Directory>> {
    match &config.directory {
        DirectoryConfig::File { path } => {
            let directory = StaticDirectory::load(path, config.auth.password.argon2_params())?;
            info!(path = %path.display(), "Loaded directory fixture");
            Ok(Arc::new(directory))
        }
        DirectoryConfig::Database => {
            let pool = pool.ok_or_else(|| anyhow::anyhow!("directory.source=database requires an external database"))?;
            Ok(Arc::new(PostgresDirectory::new(pool.clone())))
        }
    }
}

/// The configured service, ready to serve.
///
/// 1. **Create**: [`Application::new`] opens storage, loads the directory and wires the services
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and handles requests
/// 3. **Shutdown**: When the shutdown signal resolves, drains connections and closes the pool
pub struct Application {
    router: Router,
    config: Arc<Config>,
    pool: Option<sqlx::PgPool>,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting pickup service with configuration: {:#?}", config);

        let (store, pool) = setup_store(&config).await?;
        let directory = setup_directory(&config, pool.as_ref())?;

        let notifier: Arc<dyn Notifier> = match &config.notifications.webhook {
            Some(webhook) => {
                info!(url = %webhook.url, "Delivering notifications by webhook");
                Arc::new(WebhookNotifier::new(webhook)?)
            }
            None => Arc::new(LogNotifier),
        };

        let config = Arc::new(config);
        let state = AppState::wire(config.clone(), store, directory, Arc::new(SystemClock), notifier)?;
        let router = build_router(&state)?;

        Ok(Self { router, config, pool })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "Pickup service listening on http://{}, docs at http://localhost:{}/docs",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(shutdown)
            .await?;

        if let Some(pool) = self.pool {
            info!("Closing database connections...");
            pool.close().await;
        }

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use crate::test_utils::*;

    #[tokio::test]
    async fn test_application_with_memory_store() {
        let (config, _dir) = test_config_with_fixture();

        let app = crate::Application::new(config).await;
        assert!(app.is_ok(), "Application::new should succeed");
        let server = app.unwrap().into_test_server();

        let health = server.get("/healthz").await;
        assert_eq!(health.status_code().as_u16(), 200);
        assert_eq!(health.text(), "OK");

        // API routes need a session
        let requests = server.get("/api/v1/requests").await;
        assert_eq!(requests.status_code().as_u16(), 401);

        let docs = server.get("/docs").await;
        assert_eq!(docs.status_code().as_u16(), 200);
    }

    #[tokio::test]
    async fn test_build_router_with_metrics_disabled() {
        let fixture = TestApp::new();
        let mut config = (*fixture.state.config).clone();
        config.enable_metrics = false;
        let state = crate::AppState {
            config: std::sync::Arc::new(config),
            ..fixture.state.clone()
        };

        let router = super::build_router(&state).expect("Failed to build router");
        let server = axum_test::TestServer::new(router).expect("Failed to create test server");

        let metrics = server.get("/internal/metrics").await;
        assert_eq!(metrics.status_code().as_u16(), 404);
    }

    #[tokio::test]
    async fn test_build_router_with_metrics_enabled() {
        let fixture = TestApp::new();
        let mut config = (*fixture.state.config).clone();
        config.enable_metrics = true;
        let state = crate::AppState {
            config: std::sync::Arc::new(config),
            ..fixture.state.clone()
        };

        let router = super::build_router(&state).expect("Failed to build router");
        let server = axum_test::TestServer::new(router).expect("Failed to create test server");

        // Generate at least one request so there is something to report
        server.get("/healthz").await;
        let metrics = server.get("/internal/metrics").await;
        assert_eq!(metrics.status_code().as_u16(), 200);
        assert!(metrics.text().contains("# TYPE"));
    }
}
