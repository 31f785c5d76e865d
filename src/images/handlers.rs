use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        DefaultBodyLimit, Multipart, State,
    },
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::Serialize;
use tracing::{info, instrument, warn};

use super::services::{store_upload, validate_filename, WRITE_TIMEOUT};
use crate::{error::ApiError, state::AppState};

const UPLOAD_FIELD: &str = "file";

#[derive(Debug, Serialize)]
pub struct ClassificationResponse {
    pub result: String,
}

pub fn upload_routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/plantdisease", post(plant_disease))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
}

/// POST /plantdisease (multipart, field `file`)
#[instrument(skip(state, multipart))]
pub async fn plant_disease(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ClassificationResponse>, ApiError> {
    let mut multipart = multipart.map_err(|e| {
        warn!(error = %e, "not a multipart request");
        ApiError::MissingFile("No file part")
    })?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, "Malformed multipart body"))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let original_name = field.file_name().unwrap_or_default().to_string();
        let (kind, ext) = validate_filename(&original_name)?;
        let data = field
            .bytes()
            .await
            .map_err(|e| multipart_error(e, "Could not read uploaded file"))?;

        let stored = store_upload(
            &state.config.upload_dir,
            &original_name,
            kind,
            &ext,
            data,
            WRITE_TIMEOUT,
        )
        .await?;

        let result = state
            .classifier
            .classify(&stored.path, stored.kind.mime_type())
            .await?;
        info!(file = %stored.path.display(), "classification complete");
        return Ok(Json(ClassificationResponse { result }));
    }

    Err(ApiError::MissingFile("No file part"))
}

/// The body limit surfaces as a multipart read error; keep it a 413.
fn multipart_error(e: MultipartError, message: &str) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        warn!(error = %e, "upload exceeds body limit");
        return ApiError::PayloadTooLarge;
    }
    warn!(error = %e, "{message}");
    ApiError::InvalidRequest(message.to_string())
}
