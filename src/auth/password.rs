use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use lazy_static::lazy_static;
use rand::rngs::OsRng;
use tracing::{error, warn};

lazy_static! {
    // Verified against when there is no real hash to check, so a miss costs
    // the same as a wrong password.
    static ref DUMMY_HASH: Option<String> = hash_password("leafscan-timing-equalizer").ok();
}

pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            anyhow::anyhow!(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

pub fn verify_password(plain: &str, hash: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| anyhow::anyhow!(e.to_string()))?;
    Ok(Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}

/// Runs a verification whose result is discarded.
pub fn burn_dummy_verification(plain: &str) {
    if let Some(hash) = DUMMY_HASH.as_deref() {
        let _ = verify_password(plain, hash);
    }
}

/// Argon2 is CPU bound; keep it off the async workers.
pub async fn hash_password_blocking(plain: String) -> anyhow::Result<String> {
    tokio::task::spawn_blocking(move || hash_password(&plain)).await?
}

/// Checks `plain` against a stored value that may not be a PHC string at all
/// (rows written before hashing was introduced). Anything unparseable is a
/// mismatch, paid for with a dummy verification.
pub fn verify_stored(plain: &str, stored: &str) -> bool {
    match verify_password(plain, stored) {
        Ok(ok) => ok,
        Err(e) => {
            warn!(error = %e, "stored password is not an argon2 hash");
            burn_dummy_verification(plain);
            false
        }
    }
}

/// `None` for `hash` means there is nothing to match; a dummy verification
/// still runs and the result is `false`.
pub async fn verify_password_blocking(plain: String, hash: Option<String>) -> anyhow::Result<bool> {
    let ok = tokio::task::spawn_blocking(move || match hash {
        Some(hash) => verify_stored(&plain, &hash),
        None => {
            burn_dummy_verification(&plain);
            false
        }
    })
    .await?;
    Ok(ok)
}
