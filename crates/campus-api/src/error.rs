use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

/// Route-layer error taxonomy. Every variant renders the
/// `{"success": false, "message": ...}` envelope; store failures are logged
/// server-side and surface as an opaque 500.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("{0} is invalid")]
    InvalidField(&'static str),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("authentication required")]
    Unauthorized,

    #[error("not permitted")]
    Forbidden,

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::MissingField(_) | ApiError::InvalidField(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::Internal(e) => {
                error!("request failed: {:#}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(serde_json::json!({
            "success": false,
            "message": self.to_string(),
        }));

        (status, body).into_response()
    }
}

/// Pull a required field out of a request body before touching the store.
pub fn require<T>(field: Option<T>, name: &'static str) -> ApiResult<T> {
    field.ok_or(ApiError::MissingField(name))
}

/// Required field that must also parse as a UUID.
pub fn require_uuid(field: Option<String>, name: &'static str) -> ApiResult<Uuid> {
    require(field, name)?
        .parse()
        .map_err(|_| ApiError::InvalidField(name))
}

/// Optional field that must parse as a UUID when present.
pub fn optional_uuid(field: Option<String>, name: &'static str) -> ApiResult<Option<Uuid>> {
    match field {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ApiError::InvalidField(name)),
        None => Ok(None),
    }
}

/// Join-error-aware wrapper for blocking DB work, mirroring how the rest of
/// the handlers hop off the async runtime.
pub async fn run_blocking<T, F>(f: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    let joined = tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("spawn_blocking join error: {}", e)))?;
    joined.map_err(ApiError::Internal)
}

/// Like `run_blocking`, for write paths whose closures surface typed route
/// errors (not-found, forbidden) from inside the blocking section.
pub async fn run_blocking_api<T, F>(f: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> ApiResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("spawn_blocking join error: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn missing_field_renders_the_envelope() {
        let resp = ApiError::MissingField("channel_id").into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let json = body_json(resp).await;
        assert_eq!(json["success"], false);
        assert_eq!(json["message"], "channel_id is required");
    }

    #[tokio::test]
    async fn internal_error_does_not_leak_details() {
        let resp = ApiError::Internal(anyhow::anyhow!("disk exploded at /var/db")).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let json = body_json(resp).await;
        assert_eq!(json["success"], false);
        assert_eq!(json["message"], "internal error");
    }

    #[test]
    fn require_prefers_missing_over_invalid() {
        assert!(matches!(
            require_uuid(None, "channel_id"),
            Err(ApiError::MissingField("channel_id"))
        ));
        assert!(matches!(
            require_uuid(Some("not-a-uuid".into()), "channel_id"),
            Err(ApiError::InvalidField("channel_id"))
        ));
    }
}
