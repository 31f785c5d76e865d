use crate::auth::google::{GoogleVerifier, IdTokenVerifier};
use crate::classify::{Classifier, GeminiClient};
use crate::config::AppConfig;
use crate::db;
use anyhow::Context;
use sqlx::SqlitePool;
use std::sync::Arc;

/// Everything a handler may touch, built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Arc<AppConfig>,
    pub verifier: Arc<dyn IdTokenVerifier>,
    pub classifier: Arc<dyn Classifier>,
}

impl AppState {
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let config = Arc::new(config);

        tokio::fs::create_dir_all(&config.upload_dir)
            .await
            .with_context(|| format!("create upload dir {}", config.upload_dir.display()))?;

        let db = db::connect(&config).await?;

        let verifier = Arc::new(GoogleVerifier::new(&config.google, config.http_timeout)?)
            as Arc<dyn IdTokenVerifier>;
        let classifier = Arc::new(GeminiClient::new(&config.gemini, config.http_timeout)?)
            as Arc<dyn Classifier>;

        Ok(Self::from_parts(db, config, verifier, classifier))
    }

    pub fn from_parts(
        db: SqlitePool,
        config: Arc<AppConfig>,
        verifier: Arc<dyn IdTokenVerifier>,
        classifier: Arc<dyn Classifier>,
    ) -> Self {
        Self {
            db,
            config,
            verifier,
            classifier,
        }
    }

    /// In-memory store, fake verifier and classifier, uploads under `upload_dir`.
    #[cfg(test)]
    pub async fn fake(upload_dir: &std::path::Path) -> Self {
        Self::from_parts(
            db::memory_pool().await,
            Arc::new(test_config(upload_dir)),
            Arc::new(fakes::FakeVerifier),
            Arc::new(fakes::FakeClassifier::default()),
        )
    }
}

#[cfg(test)]
pub fn test_config(upload_dir: &std::path::Path) -> AppConfig {
    use crate::config::{GeminiConfig, GoogleConfig};
    use std::time::Duration;

    AppConfig {
        database_url: "sqlite::memory:".into(),
        host: "127.0.0.1".into(),
        port: 0,
        frontend_origin: "http://localhost:3000".into(),
        upload_dir: upload_dir.to_path_buf(),
        max_upload_bytes: 1024 * 1024,
        http_timeout: Duration::from_secs(5),
        db_busy_timeout: Duration::from_secs(1),
        google: GoogleConfig {
            client_id: "test-client".into(),
            certs_url: "http://127.0.0.1:9/certs".into(),
        },
        gemini: GeminiConfig {
            api_key: "test-key".into(),
            endpoint: "http://127.0.0.1:9".into(),
            model: "test-model".into(),
        },
    }
}
