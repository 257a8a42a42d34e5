//! Credential store: Argon2id password hashing over the `users` table.

use std::sync::OnceLock;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use tracing::{info, warn};
use uuid::Uuid;

use notinhas_db::Database;
use notinhas_types::models::User;

use crate::error::ApiError;

const USERNAME_MIN: usize = 3;
const USERNAME_MAX: usize = 32;
const PASSWORD_MAX: usize = 128;

/// Create a user. The password is hashed with a fresh random salt; the
/// plaintext never reaches the store or the logs.
pub fn register(db: &Database, username: &str, password: &str) -> Result<User, ApiError> {
    validate_username(username)?;
    validate_password(password)?;

    if db.get_user_by_username(username)?.is_some() {
        return Err(ApiError::DuplicateUsername);
    }

    let password_hash = hash_password(password)
        .map_err(|e| ApiError::Storage(anyhow::anyhow!("password hashing failed: {}", e)))?;

    // The UNIQUE constraint still guards against a concurrent registration.
    let user = db.create_user(Uuid::new_v4(), username, &password_hash)?;
    info!("Registered user {} ({})", user.username, user.id);
    Ok(user)
}

/// Check a username/password pair.
///
/// Unknown users and wrong passwords fail identically, and an unknown user
/// still costs one hash verification.
pub fn verify(db: &Database, username: &str, password: &str) -> Result<User, ApiError> {
    let Some(row) = db.get_user_by_username(username)? else {
        if let Some(dummy) = dummy_hash() {
            let _ = check_password(password, dummy);
        }
        return Err(ApiError::InvalidCredentials);
    };

    match check_password(password, &row.password) {
        Ok(true) => Ok(row.to_user()?),
        Ok(false) => Err(ApiError::InvalidCredentials),
        Err(e) => {
            warn!("Stored hash for user {} is unreadable: {}", row.id, e);
            Err(ApiError::InvalidCredentials)
        }
    }
}

fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)?
        .to_string())
}

/// `Ok(false)` on mismatch; `Err` only when the stored hash cannot be parsed.
fn check_password(password: &str, stored: &str) -> Result<bool, argon2::password_hash::Error> {
    let parsed = PasswordHash::new(stored)?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

fn dummy_hash() -> Option<&'static str> {
    static DUMMY: OnceLock<Option<String>> = OnceLock::new();
    DUMMY
        .get_or_init(|| hash_password("notinhas-placeholder").ok())
        .as_deref()
}

fn validate_username(username: &str) -> Result<(), ApiError> {
    let len = username.chars().count();
    if !(USERNAME_MIN..=USERNAME_MAX).contains(&len) {
        return Err(ApiError::validation(format!(
            "username must be between {} and {} characters",
            USERNAME_MIN, USERNAME_MAX
        )));
    }
    if username.chars().any(char::is_whitespace) {
        return Err(ApiError::validation("username must not contain whitespace"));
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), ApiError> {
    if password.is_empty() {
        return Err(ApiError::validation("password is required"));
    }
    if password.len() > PASSWORD_MAX {
        return Err(ApiError::validation(format!(
            "password must be at most {} bytes",
            PASSWORD_MAX
        )));
    }
    Ok(())
}
