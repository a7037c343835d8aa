use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

/// Error taxonomy surfaced to callers. Reads with an unresolvable identity
/// degrade to empty results instead of erroring; everything here is a
/// synchronous failure with no automatic retry.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not authenticated")]
    NotAuthenticated,

    #[error("{0}")]
    Forbidden(&'static str),

    #[error("{0}")]
    NotFound(&'static str),

    #[error("{0}")]
    BadRequest(&'static str),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::NotAuthenticated => (StatusCode::UNAUTHORIZED, self.to_string()),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            Self::Internal(e) => {
                error!("Internal error: {:#}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::NotAuthenticated.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::Forbidden("nope").into_response().status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::NotFound("gone").into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Internal(anyhow::anyhow!("db")).into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
