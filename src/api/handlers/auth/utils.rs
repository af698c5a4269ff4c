//! Small helpers for the auth flows: input checks, password hashing and
//! refresh token material.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::{rngs::OsRng, RngCore};
use regex::Regex;
use sha2::{Digest, Sha256};

/// Normalize an email for lookup/uniqueness checks.
pub(super) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
pub(super) fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

/// Check registration input, returning the first failing rule's message.
pub(super) fn validate_registration(
    username: &str,
    email: &str,
    password: &str,
) -> Result<(), String> {
    let username_chars = username.trim().chars().count();
    if username_chars < 3 || username_chars > 50 {
        return Err("Username must be between 3 and 50 characters".to_string());
    }
    validate_login(email, password)
}

/// Check login input, returning the first failing rule's message.
pub(super) fn validate_login(email: &str, password: &str) -> Result<(), String> {
    if !valid_email(&normalize_email(email)) {
        return Err("Email must be a valid email address".to_string());
    }
    if password.len() < 6 {
        return Err("Password must be at least 6 characters".to_string());
    }
    Ok(())
}

/// Hash a password for storage. The plaintext never reaches the database or
/// the logs.
pub(super) fn hash_password(password: &str) -> Result<String> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST).context("failed to hash password")
}

/// Compare a presented password with the stored hash.
pub(super) fn verify_password(password: &str, password_hash: &str) -> Result<bool> {
    bcrypt::verify(password, password_hash).context("failed to verify password")
}

/// Create a new opaque refresh token: 32 bytes from the OS RNG (256 bits of
/// entropy), URL-safe base64. The raw value is only returned to the client;
/// the database stores a digest.
pub(super) fn generate_refresh_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate refresh token")?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Hash a refresh token so raw values never touch the database.
/// The digest is used for lookups when the token is presented.
pub(crate) fn hash_refresh_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

pub(super) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

/// Extract a client IP for rate limiting from common proxy headers.
pub(crate) fn extract_client_ip(headers: &axum::http::HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue};

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email(" Alice@Example.COM "), "alice@example.com");
    }

    #[test]
    fn valid_email_accepts_basic_format() {
        assert!(valid_email("a@example.com"));
        assert!(valid_email("name.surname@example.co"));
    }

    #[test]
    fn valid_email_rejects_garbage() {
        assert!(!valid_email("not-an-email"));
        assert!(!valid_email("missing@tld"));
        assert!(!valid_email("two words@example.com"));
    }

    #[test]
    fn validate_registration_first_rule_wins() {
        let err = validate_registration("ab", "bad", "short").expect_err("too short username");
        assert_eq!(err, "Username must be between 3 and 50 characters");

        let err = validate_registration("alice", "bad", "short").expect_err("bad email");
        assert_eq!(err, "Email must be a valid email address");

        let err =
            validate_registration("alice", "alice@example.com", "short").expect_err("bad password");
        assert_eq!(err, "Password must be at least 6 characters");

        assert!(validate_registration("alice", "alice@example.com", "secret1").is_ok());
    }

    #[test]
    fn validate_registration_counts_characters_not_bytes() {
        // two characters, four bytes: still too short
        let err = validate_registration("éé", "alice@example.com", "secret1")
            .expect_err("too short username");
        assert_eq!(err, "Username must be between 3 and 50 characters");

        // three characters, five bytes
        assert!(validate_registration("héé", "alice@example.com", "secret1").is_ok());

        // fifty-one characters of two bytes each
        let long = "é".repeat(51);
        assert!(validate_registration(&long, "alice@example.com", "secret1").is_err());
        assert!(validate_registration(&"é".repeat(50), "alice@example.com", "secret1").is_ok());
    }

    #[test]
    fn validate_login_rules() {
        assert!(validate_login("alice@example.com", "secret1").is_ok());
        assert!(validate_login("nope", "secret1").is_err());
        assert!(validate_login("alice@example.com", "short").is_err());
    }

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("secret1").expect("hash");
        assert_ne!(hash, "secret1");
        assert!(verify_password("secret1", &hash).expect("verify"));
        assert!(!verify_password("wrong", &hash).expect("verify"));
    }

    #[test]
    fn refresh_tokens_are_distinct_and_long_enough() {
        let first = generate_refresh_token().expect("token");
        let second = generate_refresh_token().expect("token");
        assert_ne!(first, second);
        // 32 bytes without padding encode to 43 characters
        assert_eq!(first.len(), 43);
        assert!(first
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn refresh_token_digest_is_stable() {
        let digest = hash_refresh_token("token");
        assert_eq!(digest, hash_refresh_token("token"));
        assert_eq!(digest.len(), 32);
        assert_ne!(digest, hash_refresh_token("other"));
    }

    #[test]
    fn extract_client_ip_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        assert_eq!(extract_client_ip(&headers), Some("203.0.113.7".to_string()));
    }

    #[test]
    fn extract_client_ip_falls_back_to_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        assert_eq!(extract_client_ip(&headers), Some("10.0.0.2".to_string()));
    }

    #[test]
    fn extract_client_ip_empty_headers() {
        assert_eq!(extract_client_ip(&HeaderMap::new()), None);
    }
}
