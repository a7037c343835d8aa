use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};

use parley_types::api::Claims;

use crate::error::ApiError;
use crate::state::AppState;

/// Extract and validate the bearer JWT from the Authorization header. The
/// token subject is the identity provider's user id; handlers resolve it
/// to an internal user record themselves.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::NotAuthenticated)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(ApiError::NotAuthenticated)?;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| ApiError::NotAuthenticated)?;

    req.extensions_mut().insert(token_data.claims);
    Ok(next.run(req).await)
}
