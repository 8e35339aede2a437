use anyhow::Context;
use axum::{
    Router, middleware,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tower_sessions::{
    Expiry, SessionManagerLayer,
    cookie::{Key, SameSite},
};
use tower_sessions_sqlx_store::SqliteStore;
use tracing::warn;

use crate::config::Config;
use crate::services::AccountService;
use crate::state::SharedState;

pub mod account;
mod error;
pub mod flash;
mod observability;
pub mod views;

pub use error::ApiError;

use metrics_exporter_prometheus::PrometheusHandle;

/// Name of the signed session cookie.
pub const SESSION_COOKIE_NAME: &str = "useradmin.sid";

#[derive(Clone)]
pub struct AppState {
    pub shared: Arc<SharedState>,

    pub prometheus_handle: Option<PrometheusHandle>,
}

impl AppState {
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    #[must_use]
    pub fn store(&self) -> &crate::db::Store {
        &self.shared.store
    }

    #[must_use]
    pub fn accounts(&self) -> &Arc<dyn AccountService> {
        &self.shared.account_service
    }
}

#[must_use]
pub fn create_app_state(
    shared: Arc<SharedState>,
    prometheus_handle: Option<PrometheusHandle>,
) -> Arc<AppState> {
    Arc::new(AppState {
        shared,
        prometheus_handle,
    })
}

pub async fn create_app_state_from_config(
    config: Config,
    prometheus_handle: Option<PrometheusHandle>,
) -> anyhow::Result<Arc<AppState>> {
    let shared = Arc::new(SharedState::new(config).await?);
    Ok(create_app_state(shared, prometheus_handle))
}

/// Builds the application router. Sessions live in the same SQLite database
/// as the users; their table is created here if missing.
pub async fn router(state: Arc<AppState>) -> anyhow::Result<Router> {
    let server = state.config().server.clone();

    let session_store = SqliteStore::new(state.store().sqlite_pool().clone());
    session_store
        .migrate()
        .await
        .context("Failed to migrate session store")?;

    let key = match &server.session_secret {
        Some(secret) => Key::try_from(secret.as_bytes())
            .map_err(|e| anyhow::anyhow!("Invalid server.session_secret: {e}"))?,
        None => {
            warn!("server.session_secret is not set, sessions will not survive a restart");
            Key::generate()
        }
    };

    let session_layer = SessionManagerLayer::new(session_store)
        .with_name(SESSION_COOKIE_NAME)
        .with_secure(server.secure_cookies)
        .with_http_only(true)
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::minutes(
            server.session_inactivity_minutes,
        )))
        .with_signed(key);

    let protected_routes = create_protected_router(state.clone());

    Ok(Router::new()
        .merge(protected_routes)
        .route("/", get(account::index))
        .route(
            "/register",
            get(account::register_form).post(account::register),
        )
        .route("/login", get(account::login_form).post(account::login))
        .route("/logout", post(account::logout))
        .route("/metrics", get(observability::get_metrics))
        .fallback(account::not_found)
        .layer(session_layer)
        .layer(middleware::from_fn(
            observability::security_headers_middleware,
        ))
        .layer(middleware::from_fn(observability::logging_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

fn create_protected_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/users", get(account::list_users))
        .route("/users/block", post(account::block_users))
        .route("/users/unblock", post(account::unblock_users))
        .route("/users/delete", post(account::delete_users))
        .route_layer(middleware::from_fn_with_state(
            state,
            account::auth_middleware,
        ))
}
