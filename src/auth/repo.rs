use crate::auth::repo_types::User;
use sqlx::SqlitePool;

/// Failure modes of an insert into the account store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("email already registered")]
    DuplicateEmail,
    #[error("store unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),
}

impl User {
    /// Find a user by email.
    pub async fn find_by_email(db: &SqlitePool, email: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password, created_at
            FROM users
            WHERE email = ?
            "#,
        )
        .bind(email)
        .fetch_optional(db)
        .await
    }

    /// Insert a new user. The UNIQUE constraint on `email` decides races.
    pub async fn create(db: &SqlitePool, email: &str, password_hash: &str) -> Result<User, StoreError> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (email, password)
            VALUES (?, ?)
            RETURNING id, email, password, created_at
            "#,
        )
        .bind(email)
        .bind(password_hash)
        .fetch_one(db)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db_err) = &e {
                if db_err.is_unique_violation() {
                    return StoreError::DuplicateEmail;
                }
            }
            StoreError::Unavailable(e)
        })
    }

    /// Insert unless the email already exists; never touches an existing row.
    /// Returns whether a row was created.
    pub async fn insert_if_absent(
        db: &SqlitePool,
        email: &str,
        password_hash: &str,
    ) -> Result<bool, sqlx::Error> {
        let res = sqlx::query(
            r#"
            INSERT INTO users (email, password)
            VALUES (?, ?)
            ON CONFLICT(email) DO NOTHING
            "#,
        )
        .bind(email)
        .bind(password_hash)
        .execute(db)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    #[cfg(test)]
    pub async fn count_by_email(db: &SqlitePool, email: &str) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE email = ?")
            .bind(email)
            .fetch_one(db)
            .await?;
        Ok(count)
    }
}
