use serde::Serialize;
use sqlx::FromRow;

/// User record in the database.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    /// Argon2 PHC string, or empty for accounts that only sign in through Google.
    #[serde(skip_serializing)]
    #[sqlx(rename = "password")]
    pub password_hash: String,
    pub created_at: String,
}

impl User {
    pub fn is_federated_only(&self) -> bool {
        self.password_hash.is_empty()
    }
}
