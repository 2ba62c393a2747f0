//! services/api/src/web/middleware.rs
//!
//! Authentication middleware for protecting routes.

use axum::{extract::Request, middleware::Next, response::Response};
use uuid::Uuid;

use crate::error::ApiError;

/// Header set by the authenticating proxy in front of the service.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Middleware that extracts the authenticated user id forwarded by the proxy.
///
/// If valid, inserts the user_id into request extensions for handlers to use.
/// If invalid or missing, returns 401 Unauthorized.
pub async fn require_auth(mut req: Request, next: Next) -> Result<Response, ApiError> {
    // 1. Extract the header
    let raw = req
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized(format!("{USER_ID_HEADER} header is required")))?;

    // 2. Parse the user id
    let user_id = Uuid::parse_str(raw.trim())
        .map_err(|_| ApiError::Unauthorized(format!("{USER_ID_HEADER} is not a UUID")))?;

    // 3. Insert user_id into request extensions
    req.extensions_mut().insert(user_id);

    // 4. Continue to the handler
    Ok(next.run(req).await)
}
