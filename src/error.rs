use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::{error, warn};

use crate::{auth::repo::StoreError, classify::ClassifyError};

/// Every failure a handler can surface. The `Display` text is what the client
/// sees, so internal detail stays in the `#[source]` fields and the logs.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Email already exists")]
    DuplicateEmail,
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("Invalid token")]
    InvalidToken,
    #[error("{0}")]
    MissingFile(&'static str),
    #[error("Invalid file type")]
    UnsupportedType,
    #[error("File too large")]
    PayloadTooLarge,
    #[error("{0}")]
    InvalidRequest(String),
    #[error("Storage temporarily unavailable")]
    StorageUnavailable(#[from] sqlx::Error),
    #[error("Classification service returned status {status}")]
    UpstreamClassificationFailure { status: u16 },
    #[error("Classification service timed out")]
    UpstreamTimeout,
    #[error("Internal server error")]
    UnexpectedFault(#[from] anyhow::Error),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::DuplicateEmail => "duplicate_email",
            ApiError::InvalidCredentials => "invalid_credentials",
            ApiError::InvalidToken => "invalid_token",
            ApiError::MissingFile(_) => "missing_file",
            ApiError::UnsupportedType => "unsupported_type",
            ApiError::PayloadTooLarge => "payload_too_large",
            ApiError::InvalidRequest(_) => "invalid_request",
            ApiError::StorageUnavailable(_) => "storage_unavailable",
            ApiError::UpstreamClassificationFailure { .. } => "upstream_classification_failure",
            ApiError::UpstreamTimeout => "upstream_timeout",
            ApiError::UnexpectedFault(_) => "unexpected_fault",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::DuplicateEmail
            | ApiError::InvalidToken
            | ApiError::MissingFile(_)
            | ApiError::UnsupportedType
            | ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::UpstreamClassificationFailure { .. } => StatusCode::BAD_GATEWAY,
            ApiError::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            ApiError::UnexpectedFault(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn log(&self) {
        match self {
            ApiError::StorageUnavailable(e) => error!(error = %e, "storage fault"),
            ApiError::UnexpectedFault(e) => error!(error = ?e, "unexpected fault"),
            ApiError::UpstreamClassificationFailure { status } => {
                warn!(status, "classification upstream failure")
            }
            ApiError::UpstreamTimeout => warn!("classification upstream timed out"),
            _ => {}
        }
    }

    fn body(&self) -> serde_json::Value {
        json!({ "error": self.to_string(), "code": self.code() })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.log();
        (self.status(), Json(self.body())).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateEmail => ApiError::DuplicateEmail,
            StoreError::Unavailable(e) => ApiError::StorageUnavailable(e),
        }
    }
}

impl From<ClassifyError> for ApiError {
    fn from(e: ClassifyError) -> Self {
        match e {
            ClassifyError::Upstream { status } => {
                ApiError::UpstreamClassificationFailure { status }
            }
            ClassifyError::Timeout => ApiError::UpstreamTimeout,
            other => ApiError::UnexpectedFault(other.into()),
        }
    }
}

/// Error body for endpoints whose clients also read a `status: "false"` flag.
#[derive(Debug)]
pub struct FlaggedError(pub ApiError);

impl From<ApiError> for FlaggedError {
    fn from(e: ApiError) -> Self {
        Self(e)
    }
}

impl IntoResponse for FlaggedError {
    fn into_response(self) -> Response {
        let inner = self.0;
        inner.log();
        let mut body = inner.body();
        body["status"] = json!("false");
        (inner.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn render(resp: Response) -> (StatusCode, serde_json::Value) {
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn validation_errors_are_4xx_with_code() {
        let (status, body) = render(ApiError::UnsupportedType.into_response()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid file type");
        assert_eq!(body["code"], "unsupported_type");

        let (status, body) = render(ApiError::InvalidCredentials.into_response()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "invalid_credentials");
    }

    #[tokio::test]
    async fn unexpected_fault_hides_detail() {
        let err = ApiError::from(anyhow::anyhow!("disk exploded at /secret/path"));
        let (status, body) = render(err.into_response()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Internal server error");
        assert!(!body.to_string().contains("/secret/path"));
    }

    #[tokio::test]
    async fn upstream_status_is_reported() {
        let err = ApiError::from(ClassifyError::Upstream { status: 429 });
        let (status, body) = render(err.into_response()).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["code"], "upstream_classification_failure");
        assert!(body["error"].as_str().unwrap().contains("429"));
    }

    #[tokio::test]
    async fn flagged_error_carries_status_false() {
        let (status, body) = render(FlaggedError(ApiError::InvalidToken).into_response()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "false");
        assert_eq!(body["error"], "Invalid token");
    }
}
