//! Identity verification.
//!
//! Passwords are stored as Argon2id PHC strings (`$argon2id$v=19$...`).

use argon2::Argon2;
use async_trait::async_trait;
use password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use secrecy::{ExposeSecret, SecretString};

use crate::storage::{Database, DatabaseError, User};

/// Verifies a user's identity.
///
/// `Ok(None)` means the credentials were rejected; callers must not reveal
/// whether the identifier or the secret was wrong.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(
        &self,
        identifier: &str,
        secret: &SecretString,
    ) -> Result<Option<User>, DatabaseError>;
}

/// How [`DbAuthenticator`] interprets the identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginField {
    Email,
    Username,
}

/// Checks credentials against the `users` table.
#[derive(Clone)]
pub struct DbAuthenticator {
    db: Database,
}

impl DbAuthenticator {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn verify(
        &self,
        field: LoginField,
        identifier: &str,
        secret: &SecretString,
    ) -> Result<Option<User>, DatabaseError> {
        if identifier.is_empty() {
            return Ok(None);
        }
        let found = match field {
            LoginField::Email => self.db.find_credentials_by_email(identifier).await?,
            LoginField::Username => self.db.find_credentials_by_username(identifier).await?,
        };

        let Some((user, hash)) = found else {
            return Ok(None);
        };

        // Argon2 is CPU-bound; keep it off the async workers
        let secret = SecretString::from(secret.expose_secret().to_owned());
        let verified = tokio::task::spawn_blocking(move || verify_password(&secret, &hash))
            .await
            .unwrap_or(false);
        if verified {
            Ok(Some(user))
        } else {
            tracing::debug!(user_id = user.id, "Password mismatch");
            Ok(None)
        }
    }
}

/// Accepts either a username or an e-mail address (anything containing `@`).
#[async_trait]
impl Authenticator for DbAuthenticator {
    async fn authenticate(
        &self,
        identifier: &str,
        secret: &SecretString,
    ) -> Result<Option<User>, DatabaseError> {
        let field = if identifier.contains('@') {
            LoginField::Email
        } else {
            LoginField::Username
        };
        self.verify(field, identifier, secret).await
    }
}

/// Hash a password into an Argon2id PHC string with a random salt.
pub fn hash_password(password: &SecretString) -> Result<String, password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.expose_secret().as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Check a password against a stored PHC string. Unparseable hashes never
/// verify.
pub fn verify_password(password: &SecretString, stored: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.expose_secret().as_bytes(), &parsed)
        .is_ok()
}
