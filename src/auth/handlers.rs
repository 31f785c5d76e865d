use axum::{
    extract::{rejection::JsonRejection, State},
    routing::post,
    Json, Router,
};
use tracing::{instrument, warn};

use crate::{
    auth::{
        dto::{CredentialsRequest, GoogleLoginRequest, GoogleLoginResponse, MessageResponse},
        services,
    },
    error::{ApiError, FlaggedError},
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/signup", post(signup))
        .route("/login", post(login))
        .route("/google-login", post(google_login))
}

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    payload: Result<Json<CredentialsRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let Json(body) = payload.map_err(bad_body)?;
    services::signup(&state.db, body.email, body.password).await?;
    Ok(Json(MessageResponse {
        message: "Signup successful",
    }))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<CredentialsRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let Json(body) = payload.map_err(bad_body)?;
    services::login(&state.db, body.email, body.password).await?;
    Ok(Json(MessageResponse {
        message: "Login successful",
    }))
}

#[instrument(skip(state, payload))]
pub async fn google_login(
    State(state): State<AppState>,
    payload: Result<Json<GoogleLoginRequest>, JsonRejection>,
) -> Result<Json<GoogleLoginResponse>, FlaggedError> {
    let Json(body) = payload.map_err(bad_body)?;
    let email = services::google_login(&state.db, state.verifier.as_ref(), body.token).await?;
    Ok(Json(GoogleLoginResponse {
        message: "Google Login successful",
        email,
        status: "true",
    }))
}

fn bad_body(rejection: JsonRejection) -> ApiError {
    warn!(error = %rejection.body_text(), "rejected request body");
    ApiError::InvalidRequest("Request body must be a JSON object".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn google_response_shape() {
        let json = serde_json::to_value(GoogleLoginResponse {
            message: "Google Login successful",
            email: "leaf@example.com".into(),
            status: "true",
        })
        .unwrap();
        assert_eq!(json["status"], "true");
        assert_eq!(json["email"], "leaf@example.com");
    }

    #[test]
    fn credentials_tolerate_nulls_and_missing_keys() {
        let body: CredentialsRequest =
            serde_json::from_str(r#"{"email": null}"#).unwrap();
        assert!(body.email.is_none());
        assert!(body.password.is_none());
    }
}
