use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header::{AUTHORIZATION, CONTENT_TYPE}, HeaderValue, Method, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, put},
    Extension, Json, Router,
};
use dotenvy::dotenv;
use sea_orm::Database;
use serde::Deserialize;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use syspanel::auth::{api_permission_middleware, auth_middleware, AuthenticatedUser, JwtService};
use syspanel::cache::MemoryStore;
use syspanel::{AccessControl, AppConfig, AuthzError};

#[derive(Clone)]
struct AppState {
    access: AccessControl,
}

struct ApiError(AuthzError);

impl From<AuthzError> for ApiError {
    fn from(err: AuthzError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            AuthzError::NotFound { .. } => StatusCode::NOT_FOUND,
            AuthzError::InvalidReference { .. } => StatusCode::BAD_REQUEST,
            AuthzError::AlreadyExists { .. } => StatusCode::CONFLICT,
            AuthzError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            AuthzError::CacheUnavailable(_)
            | AuthzError::MaterializationFailed(_)
            | AuthzError::Database(_) => {
                error!(error = %self.0, "request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

#[derive(Deserialize)]
struct MenuIdsInput {
    menu_ids: Vec<i64>,
}

#[derive(Deserialize)]
struct ApiIdsInput {
    api_ids: Vec<i64>,
}

async fn health() -> impl IntoResponse {
    "OK"
}

async fn assign_role_menus(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(role_id): Path<i64>,
    Json(input): Json<MenuIdsInput>,
) -> Result<Response, ApiError> {
    let rows = state
        .access
        .assign_menus_to_role(user.id, role_id, &input.menu_ids)
        .await?;
    Ok(Json(serde_json::json!({ "role_id": role_id, "permissions": rows })).into_response())
}

async fn bind_menu_apis(
    State(state): State<AppState>,
    Path(menu_id): Path<i64>,
    Json(input): Json<ApiIdsInput>,
) -> Result<Response, ApiError> {
    let roles = state.access.bind_apis_to_menu(menu_id, &input.api_ids).await?;
    Ok(Json(serde_json::json!({ "menu_id": menu_id, "rebuilt_roles": roles })).into_response())
}

async fn my_menus(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Response, ApiError> {
    let menus = state.access.get_user_menus(user.id).await?;
    Ok(Json(menus).into_response())
}

async fn my_permissions(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Response, ApiError> {
    let keys = state.access.get_user_permission_keys(user.id).await?;
    Ok(Json(keys).into_response())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "syspanel=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;
    info!(
        data_scope = config.authz.data_scope_enabled,
        cache_ttl_secs = config.authz.cache_ttl.as_secs(),
        "Starting syspanel"
    );

    info!("Connecting to database...");
    let db = Database::connect(&config.database_url).await?;
    info!("Database connected successfully");

    let jwt_service = JwtService::new(&config.jwt_secret, config.jwt_expiration_hours);
    let access = AccessControl::new(db, Arc::new(MemoryStore::new()), config.authz.clone());
    let state = AppState {
        access: access.clone(),
    };

    // Setup CORS
    let cors = if config.cors_origins.trim() == "*" {
        warn!("CORS set to accept ANY origin (*) - only use in development!");
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .split(',')
            .filter_map(|origin| origin.trim().parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
            .allow_headers([CONTENT_TYPE, AUTHORIZATION])
            .allow_credentials(true)
    };

    // Routes gated by materialized API permissions
    let guarded = Router::new()
        .route("/roles/{role_id}/menus", put(assign_role_menus))
        .route("/menus/{menu_id}/apis", put(bind_menu_apis))
        .route_layer(middleware::from_fn_with_state(access, api_permission_middleware));

    // Routes any authenticated user may call
    let personal = Router::new()
        .route("/me/menus", get(my_menus))
        .route("/me/permissions", get(my_permissions));

    let app = Router::new()
        .merge(guarded)
        .merge(personal)
        .layer(middleware::from_fn_with_state(jwt_service, auth_middleware))
        .route("/health", get(health))
        .layer(cors)
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Server starting on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
