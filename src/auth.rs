#![cfg(not(tarpaulin_include))]

//! HTTP basic-auth gate for the whole dashboard.
//!
//! One shared username and password protect every route. The password is
//! hashed with Argon2 once at startup and only the hash is kept in memory.

use std::sync::Arc;

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use axum::{
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Basic},
};

/// Realm announced in the `WWW-Authenticate` challenge
pub const REALM: &str = "Field Marketing Tracker";

/// The single account allowed into the dashboard
#[derive(Debug, Clone)]
pub struct Credentials {
    username: String,
    password_hash: String,
}

impl Credentials {
    /// Hash `password` and keep it alongside `username`.
    ///
    /// # Errors
    /// * Returns an error if the password hashing fails
    pub fn new(username: &str, password: &str) -> Result<Self, String> {
        Ok(Credentials {
            username: username.to_string(),
            password_hash: hash_password(password)?,
        })
    }

    /// Check a username/password pair from a request.
    pub fn verify(&self, username: &str, password: &str) -> bool {
        if username != self.username {
            return false;
        }
        verify_password(password, &self.password_hash).unwrap_or(false)
    }
}

/// Hash a password using Argon2
///
/// # Arguments
/// * `password` - The plaintext password to hash
///
/// # Returns
/// * `Result<String, String>` - The PHC-formatted hash or an error
fn hash_password(password: &str) -> Result<String, String> {
    let salt = SaltString::generate(&mut OsRng);

    match Argon2::default().hash_password(password.as_bytes(), &salt) {
        Ok(hash) => Ok(hash.to_string()),
        Err(_) => Err("Password hashing failed".to_string()),
    }
}

/// Verify a password against a stored hash
///
/// # Errors
/// * Returns an error if the hash is in an invalid format
fn verify_password(password: &str, hash: &str) -> Result<bool, String> {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(hash) => hash,
        Err(_) => return Err("Invalid password hash format".to_string()),
    };

    match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
        Ok(_) => Ok(true),
        Err(_) => Ok(false),
    }
}

/// Basic-auth middleware
///
/// Passes the request through when the `Authorization: Basic` header carries
/// the configured account, otherwise answers 401 with a challenge so the
/// browser prompts for credentials.
///
/// # Arguments
/// * `credentials` - The configured account
/// * `auth` - Decoded basic-auth header, if any
/// * `request` - The incoming request
/// * `next` - The rest of the middleware stack
pub async fn require_basic_auth(
    State(credentials): State<Arc<Credentials>>,
    auth: Option<TypedHeader<Authorization<Basic>>>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(TypedHeader(Authorization(basic))) = auth {
        if credentials.verify(basic.username(), basic.password()) {
            return next.run(request).await;
        }
        log::warn!(
            "Rejected credentials for '{}' on {}",
            basic.username(),
            request.uri().path()
        );
    }

    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, format!("Basic realm=\"{}\"", REALM))],
        "Unauthorized",
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify() {
        let creds = Credentials::new("demo", "hunter2").unwrap();
        assert!(creds.verify("demo", "hunter2"));
        assert!(!creds.verify("demo", "hunter3"));
        assert!(!creds.verify("admin", "hunter2"));
    }

    #[test]
    fn test_hash_is_salted() {
        let a = hash_password("same").unwrap();
        let b = hash_password("same").unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with("$argon2"));
        assert!(verify_password("same", &b).unwrap());
    }

    #[test]
    fn test_bad_hash_format() {
        assert!(verify_password("x", "not-a-hash").is_err());
    }
}
