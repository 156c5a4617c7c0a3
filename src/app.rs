use std::sync::Arc;

use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::authz::Authorizer;
use crate::config::AuthzConfig;
use crate::db::SqliteStore;
use crate::errors::{AppError, AppResult};
use crate::events::{init_event_bus, start_activity_listener, EventBus};
use crate::jwt::{AuthUser, JwtConfig};
use crate::routes::{auth, groups, health, rbac};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub jwt: Arc<JwtConfig>,
    pub event_bus: EventBus,
    pub authz: Arc<Authorizer>,
    pub authz_config: Arc<AuthzConfig>,
}

impl AppState {
    pub fn new(pool: SqlitePool, jwt: JwtConfig, authz_config: AuthzConfig, event_bus: EventBus) -> Self {
        let store = Arc::new(SqliteStore::new(pool.clone()));
        let authz = Authorizer::from_config(store, &authz_config);
        Self {
            pool,
            jwt: Arc::new(jwt),
            event_bus,
            authz: Arc::new(authz),
            authz_config: Arc::new(authz_config),
        }
    }

    /// Gate a handler on `permission` under the configured enforcement mode.
    pub async fn require(&self, auth: &AuthUser, permission: &str) -> AppResult<()> {
        self.authz
            .enforce(self.authz_config.mode, auth.user_id, permission)
            .await
    }
}

pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    let jwt_config = JwtConfig::from_env()?;
    let authz_config = AuthzConfig::from_env()?;
    Ok(create_app_with(pool, jwt_config, authz_config))
}

pub fn create_app_with(pool: SqlitePool, jwt: JwtConfig, authz_config: AuthzConfig) -> Router {
    let (event_bus, rx) = init_event_bus();
    tokio::spawn(start_activity_listener(rx, pool.clone()));

    let state = AppState::new(pool, jwt, authz_config, event_bus);
    router(state)
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/me", get(auth::me))
        .route("/me/permissions", get(auth::my_permissions));

    Router::new()
        .route("/api/health", get(health::health))
        .nest("/auth", auth_routes)
        .nest("/groups", groups::routes())
        .nest("/rbac", rbac::routes())
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
