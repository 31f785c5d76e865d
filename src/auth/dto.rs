use serde::{Deserialize, Serialize};

/// Body of `/signup` and `/login`. Both fields may be absent or null.
#[derive(Debug, Default, Deserialize)]
pub struct CredentialsRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Body of `/google-login`.
#[derive(Debug, Default, Deserialize)]
pub struct GoogleLoginRequest {
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct GoogleLoginResponse {
    pub message: &'static str,
    pub email: String,
    pub status: &'static str,
}
