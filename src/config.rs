use std::{fmt, path::PathBuf, time::Duration};

use anyhow::{anyhow, Context};

pub const GOOGLE_CERTS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";
pub const GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";

#[derive(Clone)]
pub struct GoogleConfig {
    pub client_id: String,
    pub certs_url: String,
}

#[derive(Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub endpoint: String,
    pub model: String,
}

// Keep the API key out of any `{:?}` that reaches the logs.
impl fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_key", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish()
    }
}

impl fmt::Debug for GoogleConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GoogleConfig")
            .field("client_id", &"<redacted>")
            .field("certs_url", &self.certs_url)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub frontend_origin: String,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub http_timeout: Duration,
    pub db_busy_timeout: Duration,
    pub google: GoogleConfig,
    pub gemini: GeminiConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup. Secrets are required;
    /// everything else falls back to a default.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> anyhow::Result<String> {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| anyhow!("{key} must be set"))
        };
        let or_default = |key: &str, default: &str| -> String {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        let parsed = |key: &str, default: u64| -> anyhow::Result<u64> {
            match lookup(key) {
                Some(v) => v
                    .trim()
                    .parse::<u64>()
                    .with_context(|| format!("{key} must be an integer")),
                None => Ok(default),
            }
        };
        // Zero would turn every timeout or size limit into an instant failure.
        let positive = |key: &str, default: u64| -> anyhow::Result<u64> {
            match parsed(key, default)? {
                0 => Err(anyhow!("{key} must be a positive integer")),
                n => Ok(n),
            }
        };

        let google = GoogleConfig {
            client_id: required("GOOGLE_CLIENT_ID")?,
            certs_url: or_default("GOOGLE_CERTS_URL", GOOGLE_CERTS_URL),
        };
        let gemini = GeminiConfig {
            api_key: required("GEMINI_API_KEY")?,
            endpoint: or_default("GEMINI_ENDPOINT", GEMINI_ENDPOINT),
            model: or_default("GEMINI_MODEL", "gemini-1.5-pro"),
        };

        let port = parsed("APP_PORT", 5000)?;
        let port = u16::try_from(port).context("APP_PORT out of range")?;

        Ok(Self {
            database_url: or_default("DATABASE_URL", "sqlite://store.db"),
            host: or_default("APP_HOST", "0.0.0.0"),
            port,
            frontend_origin: required("FRONTEND_ORIGIN")?,
            upload_dir: PathBuf::from(or_default("UPLOAD_DIR", "bucket")),
            max_upload_bytes: positive("MAX_UPLOAD_BYTES", 16 * 1024 * 1024)? as usize,
            http_timeout: Duration::from_secs(positive("HTTP_TIMEOUT_SECS", 60)?),
            db_busy_timeout: Duration::from_secs(positive("DB_BUSY_TIMEOUT_SECS", 5)?),
            google,
            gemini,
        })
    }
}
