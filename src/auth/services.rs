use lazy_static::lazy_static;
use regex::Regex;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::{
    auth::{
        google::{IdTokenVerifier, VerifyError},
        password::{hash_password_blocking, verify_password_blocking},
        repo_types::User,
    },
    error::ApiError,
};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Registers a credential account. The empty password is reserved for
/// federated accounts and is refused here.
pub async fn signup(
    db: &SqlitePool,
    email: Option<String>,
    password: Option<String>,
) -> Result<User, ApiError> {
    let email = normalize_email(email.as_deref().unwrap_or_default());
    if !is_valid_email(&email) {
        return Err(ApiError::InvalidRequest("Invalid email".into()));
    }
    let password = password
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::InvalidRequest("Password is required".into()))?;

    let hash = hash_password_blocking(password).await?;
    let user = User::create(db, &email, &hash).await?;
    info!(user_id = user.id, "user signed up");
    Ok(user)
}

/// Unknown email, federated-only account and wrong password all end in the
/// same `InvalidCredentials`, after the same amount of hashing work.
pub async fn login(
    db: &SqlitePool,
    email: Option<String>,
    password: Option<String>,
) -> Result<User, ApiError> {
    let (Some(email), Some(password)) = (email, password) else {
        verify_password_blocking(String::new(), None).await?;
        return Err(ApiError::InvalidCredentials);
    };
    let email = normalize_email(&email);

    let user = User::find_by_email(db, &email).await?;
    let stored_hash = user
        .as_ref()
        .filter(|u| !u.is_federated_only())
        .map(|u| u.password_hash.clone());

    let ok = verify_password_blocking(password, stored_hash).await?;
    match (ok, user) {
        (true, Some(user)) => {
            info!(user_id = user.id, "user logged in");
            Ok(user)
        }
        _ => {
            warn!("failed login attempt");
            Err(ApiError::InvalidCredentials)
        }
    }
}

/// Verifies the token and provisions a passwordless account on first sight.
/// Returns the verified, normalised email.
pub async fn google_login(
    db: &SqlitePool,
    verifier: &dyn IdTokenVerifier,
    token: Option<String>,
) -> Result<String, ApiError> {
    let token = token
        .filter(|t| !t.trim().is_empty())
        .ok_or(ApiError::InvalidToken)?;

    let identity = verifier.verify(token.trim()).await.map_err(|e| match e {
        VerifyError::Invalid(reason) => {
            warn!(%reason, "google token rejected");
            ApiError::InvalidToken
        }
        VerifyError::KeysUnavailable(reason) => {
            ApiError::UnexpectedFault(anyhow::anyhow!("google signing keys: {reason}"))
        }
    })?;

    let email = normalize_email(&identity.email);
    // A concurrent first login for the same email loses the insert; that's fine.
    let created = User::insert_if_absent(db, &email, "").await?;
    if created {
        info!(sub = %identity.subject, "provisioned federated account");
    } else {
        debug!(sub = %identity.subject, "federated account already present");
    }
    Ok(email)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::{file_pool, memory_pool},
        state::fakes::FakeVerifier,
    };

    #[test]
    fn email_validation() {
        assert!(is_valid_email("leaf@example.com"));
        assert!(!is_valid_email(""));
        assert!(!is_valid_email("no-at-sign"));
        assert!(!is_valid_email("two words@example.com"));
        assert_eq!(normalize_email("  Leaf@Example.COM "), "leaf@example.com");
    }

    #[tokio::test]
    async fn signup_then_login_succeeds() {
        let db = memory_pool().await;
        let user = signup(&db, Some("grower@farm.io".into()), Some("tomato!".into()))
            .await
            .unwrap();
        assert_ne!(user.password_hash, "tomato!");

        let logged = login(&db, Some("grower@farm.io".into()), Some("tomato!".into()))
            .await
            .unwrap();
        assert_eq!(logged.id, user.id);
    }

    #[tokio::test]
    async fn login_normalises_email() {
        let db = memory_pool().await;
        signup(&db, Some("Grower@Farm.io".into()), Some("pw".into())).await.unwrap();
        assert!(login(&db, Some(" grower@farm.IO".into()), Some("pw".into())).await.is_ok());
    }

    #[tokio::test]
    async fn second_signup_is_duplicate_and_first_password_survives() {
        let db = memory_pool().await;
        signup(&db, Some("dup@farm.io".into()), Some("first".into())).await.unwrap();
        let err = signup(&db, Some("dup@farm.io".into()), Some("second".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::DuplicateEmail));

        assert!(login(&db, Some("dup@farm.io".into()), Some("first".into())).await.is_ok());
        assert!(login(&db, Some("dup@farm.io".into()), Some("second".into())).await.is_err());
    }

    #[tokio::test]
    async fn signup_rejects_missing_fields() {
        let db = memory_pool().await;
        let err = signup(&db, None, Some("pw".into())).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidRequest(_)));
        let err = signup(&db, Some("a@b.co".into()), None).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidRequest(_)));
        let err = signup(&db, Some("a@b.co".into()), Some(String::new())).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_email_look_the_same() {
        let db = memory_pool().await;
        signup(&db, Some("known@farm.io".into()), Some("right".into())).await.unwrap();

        let wrong = login(&db, Some("known@farm.io".into()), Some("wrong".into()))
            .await
            .unwrap_err();
        let unknown = login(&db, Some("ghost@farm.io".into()), Some("right".into()))
            .await
            .unwrap_err();
        assert!(matches!(wrong, ApiError::InvalidCredentials));
        assert!(matches!(unknown, ApiError::InvalidCredentials));
        assert_eq!(wrong.to_string(), unknown.to_string());
    }

    #[tokio::test]
    async fn plaintext_legacy_row_fails_like_unknown_email() {
        let db = memory_pool().await;
        User::create(&db, "old@farm.io", "plainpw").await.unwrap();

        let legacy = login(&db, Some("old@farm.io".into()), Some("guess".into()))
            .await
            .unwrap_err();
        let unknown = login(&db, Some("ghost@farm.io".into()), Some("guess".into()))
            .await
            .unwrap_err();
        assert!(matches!(legacy, ApiError::InvalidCredentials));
        assert_eq!(legacy.to_string(), unknown.to_string());

        // The stored plaintext itself does not log in either.
        let err = login(&db, Some("old@farm.io".into()), Some("plainpw".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidCredentials));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_signups_for_one_email_admit_one() {
        let dir = tempfile::tempdir().unwrap();
        let db = file_pool(dir.path()).await;

        let (a, b) = tokio::join!(
            signup(&db, Some("race@farm.io".into()), Some("first".into())),
            signup(&db, Some("race@farm.io".into()), Some("second".into())),
        );
        let results = [a, b];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(ApiError::DuplicateEmail)))
                .count(),
            1
        );
        assert_eq!(User::count_by_email(&db, "race@farm.io").await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_first_google_logins_create_one_row() {
        let dir = tempfile::tempdir().unwrap();
        let db = file_pool(dir.path()).await;
        let token = || Some("valid:first@farm.io".to_string());

        let (a, b) = tokio::join!(
            google_login(&db, &FakeVerifier, token()),
            google_login(&db, &FakeVerifier, token()),
        );
        assert_eq!(a.unwrap(), "first@farm.io");
        assert_eq!(b.unwrap(), "first@farm.io");
        assert_eq!(User::count_by_email(&db, "first@farm.io").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn absent_fields_are_invalid_credentials() {
        let db = memory_pool().await;
        assert!(matches!(
            login(&db, None, None).await.unwrap_err(),
            ApiError::InvalidCredentials
        ));
        assert!(matches!(
            login(&db, Some("a@b.co".into()), None).await.unwrap_err(),
            ApiError::InvalidCredentials
        ));
    }

    #[tokio::test]
    async fn federated_account_cannot_use_empty_password() {
        let db = memory_pool().await;
        let email = google_login(&db, &FakeVerifier, Some("valid:leaf@example.com".into()))
            .await
            .unwrap();
        assert_eq!(email, "leaf@example.com");

        let err = login(&db, Some(email), Some(String::new())).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidCredentials));
    }

    #[tokio::test]
    async fn google_login_provisions_exactly_once() {
        let db = memory_pool().await;
        for _ in 0..2 {
            google_login(&db, &FakeVerifier, Some("valid:New@Example.com".into()))
                .await
                .unwrap();
        }
        assert_eq!(User::count_by_email(&db, "new@example.com").await.unwrap(), 1);
        let row = User::find_by_email(&db, "new@example.com").await.unwrap().unwrap();
        assert!(row.is_federated_only());
    }

    #[tokio::test]
    async fn google_login_keeps_existing_password() {
        let db = memory_pool().await;
        signup(&db, Some("both@farm.io".into()), Some("pw".into())).await.unwrap();
        google_login(&db, &FakeVerifier, Some("valid:both@farm.io".into()))
            .await
            .unwrap();
        assert!(login(&db, Some("both@farm.io".into()), Some("pw".into())).await.is_ok());
    }

    #[tokio::test]
    async fn google_login_rejects_bad_or_missing_token() {
        let db = memory_pool().await;
        let err = google_login(&db, &FakeVerifier, Some("forged".into())).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidToken));
        let err = google_login(&db, &FakeVerifier, None).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidToken));
    }

    #[tokio::test]
    async fn key_fetch_failure_is_a_server_fault() {
        let db = memory_pool().await;
        let err = google_login(&db, &FakeVerifier, Some("keys-down".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::UnexpectedFault(_)));
    }
}
