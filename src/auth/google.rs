use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{decode, decode_header, jwk::JwkSet, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::GoogleConfig;

const GOOGLE_ISSUERS: [&str; 2] = ["accounts.google.com", "https://accounts.google.com"];

/// Identity proven by a verified ID token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub subject: String,
    pub email: String,
}

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// Signature, issuer, audience, expiry or claims did not check out.
    #[error("invalid id token: {0}")]
    Invalid(String),
    /// The provider's signing keys could not be fetched.
    #[error("signing keys unavailable: {0}")]
    KeysUnavailable(String),
}

#[async_trait]
pub trait IdTokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, VerifyError>;
}

/// ID token claims Google puts in its tokens that we care about.
#[derive(Debug, Deserialize)]
struct GoogleClaims {
    sub: String,
    email: Option<String>,
    email_verified: Option<bool>,
}

/// Verifies Google-issued ID tokens against Google's published JWKS.
pub struct GoogleVerifier {
    http: reqwest::Client,
    client_id: String,
    certs_url: String,
}

impl GoogleVerifier {
    pub fn new(config: &GoogleConfig, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            client_id: config.client_id.clone(),
            certs_url: config.certs_url.clone(),
        })
    }

    async fn fetch_keys(&self) -> Result<JwkSet, VerifyError> {
        let response = self
            .http
            .get(&self.certs_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| VerifyError::KeysUnavailable(e.to_string()))?;
        response
            .json::<JwkSet>()
            .await
            .map_err(|e| VerifyError::KeysUnavailable(e.to_string()))
    }
}

#[async_trait]
impl IdTokenVerifier for GoogleVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, VerifyError> {
        // Reject garbage before spending a round trip on the key set.
        decode_header(token).map_err(|e| VerifyError::Invalid(e.to_string()))?;
        let keys = self.fetch_keys().await?;
        verify_with_keys(token, &keys, &self.client_id)
    }
}

/// Checks signature, `iss`, `aud` and `exp`, then pulls out the email claim.
pub fn verify_with_keys(
    token: &str,
    keys: &JwkSet,
    client_id: &str,
) -> Result<VerifiedIdentity, VerifyError> {
    let header = decode_header(token).map_err(|e| VerifyError::Invalid(e.to_string()))?;
    if header.alg != Algorithm::RS256 {
        return Err(VerifyError::Invalid(format!("unexpected alg {:?}", header.alg)));
    }
    let kid = header
        .kid
        .ok_or_else(|| VerifyError::Invalid("missing kid".into()))?;
    let jwk = keys
        .find(&kid)
        .ok_or_else(|| VerifyError::Invalid(format!("unknown kid {kid}")))?;
    let key = DecodingKey::from_jwk(jwk).map_err(|e| VerifyError::Invalid(e.to_string()))?;

    let mut validation = Validation::new(Algorithm::RS256);
    validation.set_audience(&[client_id]);
    validation.set_issuer(&GOOGLE_ISSUERS);

    let data = decode::<GoogleClaims>(token, &key, &validation).map_err(|e| {
        warn!(error = %e, "id token rejected");
        VerifyError::Invalid(e.to_string())
    })?;
    let claims = data.claims;

    if claims.email_verified == Some(false) {
        return Err(VerifyError::Invalid("email not verified".into()));
    }
    let email = claims
        .email
        .filter(|e| !e.trim().is_empty())
        .ok_or_else(|| VerifyError::Invalid("missing email claim".into()))?;

    debug!(sub = %claims.sub, "id token verified");
    Ok(VerifiedIdentity {
        subject: claims.sub,
        email,
    })
}
