use axum::{
    extract::{MatchedPath, Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::Response,
};
use tracing::{error, warn};

use crate::access::AccessControl;
use crate::auth::{AuthenticatedUser, JwtService};

pub async fn auth_middleware(
    State(jwt_service): State<JwtService>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "));

    let token = match auth_header {
        Some(token) => token,
        None => return Err(StatusCode::UNAUTHORIZED),
    };

    let claims = jwt_service
        .verify_token(token)
        .map_err(|_| StatusCode::UNAUTHORIZED)?;

    let user = AuthenticatedUser::from(claims);
    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}

/// API resource key for a route: `"{METHOD} {route template}"`, e.g. `PUT /roles/{role_id}/menus`.
pub fn api_resource_key(method: &str, path: &str) -> String {
    format!("{} {}", method.to_ascii_uppercase(), path)
}

/// Gate a route on the caller's materialized API permissions.
///
/// Must run after `auth_middleware`, as a route layer so the matched path is known.
pub async fn api_permission_middleware(
    State(access): State<AccessControl>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let user = request
        .extensions()
        .get::<AuthenticatedUser>()
        .cloned()
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let resource_key = api_resource_key(request.method().as_str(), &path);

    match access.check_permission(user.id, &resource_key).await {
        Ok(true) => Ok(next.run(request).await),
        Ok(false) => {
            warn!(user_id = user.id, %resource_key, "api permission denied");
            Err(StatusCode::FORBIDDEN)
        }
        Err(e) => {
            error!(user_id = user.id, %resource_key, error = %e, "api permission check failed");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
