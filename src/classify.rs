use std::{path::Path, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::GeminiConfig;

pub const PROMPT: &str = "Analyze this image and detect plant disease. Provide the response with crop name, disease, and suggestions for treatment or management. If the image is not clear or you are uncertain, return only 'unable to fetch'.";

#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("read stored image: {0}")]
    Read(#[from] std::io::Error),
    #[error("classification api returned {status}")]
    Upstream { status: u16 },
    #[error("classification api timed out")]
    Timeout,
    #[error("classification api transport: {0}")]
    Transport(reqwest::Error),
    #[error("classification api response had no candidate text")]
    MalformedResponse,
}

impl From<reqwest::Error> for ClassifyError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ClassifyError::Timeout
        } else {
            // The URL is dropped so nothing key-shaped ends up in logs.
            ClassifyError::Transport(e.without_url())
        }
    }
}

/// Turns a stored image into a free-text diagnosis.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, path: &Path, mime_type: &str) -> Result<String, ClassifyError>;
}

/// Gemini `generateContent` client. One call per image, no retries.
pub struct GeminiClient {
    http: Client,
    url: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(config: &GeminiConfig, timeout: Duration) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("build gemini http client")?;
        Ok(Self {
            http,
            url: format!(
                "{}/{}:generateContent",
                config.endpoint.trim_end_matches('/'),
                config.model
            ),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl Classifier for GeminiClient {
    async fn classify(&self, path: &Path, mime_type: &str) -> Result<String, ClassifyError> {
        let bytes = tokio::fs::read(path).await?;
        let payload = build_payload(&BASE64.encode(&bytes), mime_type);
        debug!(file = %path.display(), size = bytes.len(), "sending image for classification");

        let response = self
            .http
            .post(&self.url)
            .header("x-goog-api-key", &self.api_key)
            .json(&payload)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;

        if status != StatusCode::OK {
            warn!(status = status.as_u16(), body = %truncate(&body, 500), "classification api error");
            return Err(ClassifyError::Upstream {
                status: status.as_u16(),
            });
        }

        let value: Value =
            serde_json::from_str(&body).map_err(|_| ClassifyError::MalformedResponse)?;
        extract_text(&value).ok_or(ClassifyError::MalformedResponse)
    }
}

pub fn build_payload(encoded_image: &str, mime_type: &str) -> Value {
    json!({
        "contents": [{
            "parts": [
                { "inlineData": { "mimeType": mime_type, "data": encoded_image } },
                { "text": PROMPT }
            ]
        }]
    })
}

/// `candidates[0].content.parts[0].text`
pub fn extract_text(response: &Value) -> Option<String> {
    response
        .pointer("/candidates/0/content/parts/0/text")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
