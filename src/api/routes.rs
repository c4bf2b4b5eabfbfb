//! Router assembly and server lifecycle.

use std::sync::Arc;
use std::time::Duration;

use axum::middleware;
use axum::{http::StatusCode, response::Json, routing::get, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::accounts::{self, User};
use crate::config::Config;
use crate::geo::GeoNamesClient;
use crate::jobs::{JobContext, Scheduler};
use crate::notify::{ExpoPushClient, Mailer, Notifier};
use crate::store::Database;
use crate::weather::{OpenMeteoClient, WeatherProvider};

use super::{account, admin, auth, community, geo, walks};

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub db: Arc<Database>,
    pub notifier: Notifier,
    pub weather: Arc<dyn WeatherProvider>,
    /// GeoNames proxy for country and city pickers
    pub geonames: GeoNamesClient,
    /// Outbound client for the hosted OAuth session exchange
    pub http: reqwest::Client,
}

impl AppState {
    pub fn is_admin(&self, user: &User) -> bool {
        accounts::is_admin(user, &self.config)
    }

    /// Reject non-admin callers with 403.
    pub fn require_admin(&self, user: &User) -> Result<(), (StatusCode, String)> {
        if self.is_admin(user) {
            Ok(())
        } else {
            Err((StatusCode::FORBIDDEN, "Admin access required".to_string()))
        }
    }

    pub fn jobs(&self) -> JobContext {
        JobContext {
            db: Arc::clone(&self.db),
            notifier: self.notifier.clone(),
            weather: Arc::clone(&self.weather),
            retention_delay: Duration::from_millis(self.config.retention_send_delay_ms),
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// GET /api/health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Build the full application router.
pub fn router(state: Arc<AppState>) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health))
        .merge(auth::public_routes())
        .merge(geo::public_routes());

    let protected_routes = Router::new()
        .merge(auth::routes())
        .merge(account::routes())
        .merge(walks::routes())
        .merge(community::routes())
        .merge(geo::routes())
        .merge(admin::routes())
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::require_auth,
        ));

    let api = Router::new().merge(public_routes).merge(protected_routes);

    Router::new()
        .nest("/api", api)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let db = Arc::new(Database::open(&config.data_dir).await?);
    let http = reqwest::Client::new();

    let push = Arc::new(ExpoPushClient::new(
        http.clone(),
        config.expo_access_token.clone(),
    ));
    let mailer = Mailer::new(http.clone(), config.email.clone());
    if !config.email.is_configured() {
        tracing::warn!("SendGrid not configured, emails will only be logged");
    }
    let notifier = Notifier::new(Arc::clone(&db), push, mailer);

    let state = Arc::new(AppState {
        geonames: GeoNamesClient::new(http.clone(), config.geonames_username.clone()),
        weather: Arc::new(OpenMeteoClient::new(http.clone())),
        config: config.clone(),
        db,
        notifier,
        http,
    });

    let scheduler = if config.jobs_enabled {
        Some(Scheduler::start(state.jobs()))
    } else {
        tracing::info!("Background jobs disabled");
        None
    };

    let app = router(Arc::clone(&state));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(scheduler) = scheduler {
        scheduler.shutdown();
    }
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}


#[cfg(test)]
mod tests {
    use super::test_support::TestApp;
    use super::*;
    use axum::http::Method;

    #[tokio::test]
    async fn test_health_is_public() {
        let app = TestApp::new();
        let (status, body) = app.call(Method::GET, "/api/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_protected_routes_need_a_session() {
        let app = TestApp::new();
        let (status, _) = app.call(Method::GET, "/api/walks", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = app.get("/api/walks", "sess_unknown").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_admin_routes_reject_regular_users() {
        let app = TestApp::new();
        let token = app.login_as("walker", "Lyon").await;
        let (status, body) = app.get("/api/admin/statistics", &token).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body, "Admin access required");

        let admin = app.login_admin("boss").await;
        let (status, body) = app.get("/api/admin/check", &admin).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["is_admin"], true);
    }
}
