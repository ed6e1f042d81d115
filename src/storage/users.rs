use super::schema::Database;
use super::types::{DatabaseError, User};

impl Database {
    // ========================================================================
    // User Operations
    // ========================================================================

    /// Create a user account. `password_hash` is stored verbatim; see
    /// [`crate::auth::hash_password`].
    pub async fn create_user(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<User, DatabaseError> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO users (username, email, password_hash, created_at)
            VALUES (?, ?, ?, ?)
            RETURNING id
        "#,
        )
        .bind(username)
        .bind(email)
        .bind(password_hash)
        .bind(chrono::Utc::now().timestamp_millis())
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(user_id = id, username = %username, "Created user");
        Ok(User {
            id,
            username: username.to_owned(),
            email: email.to_owned(),
        })
    }

    pub async fn get_user(&self, id: i64) -> Result<Option<User>, DatabaseError> {
        let row: Option<(i64, String, String)> =
            sqlx::query_as("SELECT id, username, email FROM users WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(id, username, email)| User { id, username, email }))
    }

    /// Look up a user together with the stored password hash.
    pub(crate) async fn find_credentials_by_email(
        &self,
        email: &str,
    ) -> Result<Option<(User, String)>, DatabaseError> {
        let row: Option<(i64, String, String, String)> = sqlx::query_as(
            "SELECT id, username, email, password_hash FROM users WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id, username, email, hash)| (User { id, username, email }, hash)))
    }

    /// Look up a user together with the stored password hash.
    pub(crate) async fn find_credentials_by_username(
        &self,
        username: &str,
    ) -> Result<Option<(User, String)>, DatabaseError> {
        let row: Option<(i64, String, String, String)> = sqlx::query_as(
            "SELECT id, username, email, password_hash FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id, username, email, hash)| (User { id, username, email }, hash)))
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::Database;

    #[tokio::test]
    async fn test_create_and_lookup() {
        let db = Database::open(":memory:").await.unwrap();
        let user = db.create_user("alice", "alice@example.com", "h").await.unwrap();

        assert_eq!(db.get_user(user.id).await.unwrap(), Some(user.clone()));

        let (by_email, hash) = db
            .find_credentials_by_email("alice@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_email, user);
        assert_eq!(hash, "h");

        assert!(db.find_credentials_by_username("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_username_rejected() {
        let db = Database::open(":memory:").await.unwrap();
        db.create_user("alice", "a@example.com", "h").await.unwrap();
        assert!(db.create_user("alice", "b@example.com", "h").await.is_err());
    }
}
