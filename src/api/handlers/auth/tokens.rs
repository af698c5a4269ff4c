//! Token issuance: signed access tokens and store-backed refresh tokens.
//!
//! Issuance is all or nothing. The access token is minted in memory first,
//! but the pair is only returned once the refresh record is durable; a failed
//! insert fails the whole operation so the client never holds an access token
//! whose refresh counterpart does not exist.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::cli::globals::GlobalArgs;

use super::{storage, utils};

/// Claims carried by an access token. Verified statelessly downstream.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessTokenClaims {
    pub sub: Uuid,
    pub username: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Clone)]
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
}

impl TokenIssuer {
    #[must_use]
    pub fn new(globals: &GlobalArgs) -> Self {
        let secret = globals.jwt_secret.expose_secret().as_bytes();
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            access_ttl_seconds: globals.access_token_ttl_seconds,
            refresh_ttl_seconds: globals.refresh_token_ttl_seconds,
        }
    }

    /// Sign an access token for the given user. Deterministic given the
    /// inputs, the key and the clock.
    ///
    /// # Errors
    /// Returns an error if signing fails.
    pub fn mint_access_token(&self, user_id: Uuid, username: &str) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = AccessTokenClaims {
            sub: user_id,
            username: username.to_string(),
            iat: now,
            exp: now + self.access_ttl_seconds,
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .context("failed to sign access token")
    }

    /// Verify an access token's signature and expiry.
    ///
    /// # Errors
    /// Returns an error for a bad signature, malformed token or passed expiry.
    pub fn verify_access_token(&self, token: &str) -> Result<AccessTokenClaims> {
        let mut validation = Validation::default();
        validation.leeway = 0;

        let data = decode::<AccessTokenClaims>(token, &self.decoding_key, &validation)
            .context("invalid access token")?;

        Ok(data.claims)
    }

    /// Mint a full pair: signed access token plus a persisted opaque refresh
    /// token.
    ///
    /// # Errors
    /// Returns an error if signing or the refresh token insert fails; on
    /// failure no tokens are handed out.
    pub async fn issue(&self, pool: &PgPool, user_id: Uuid, username: &str) -> Result<TokenPair> {
        let access_token = self.mint_access_token(user_id, username)?;

        let refresh_token = utils::generate_refresh_token()?;
        let expires_at = Utc::now() + Duration::seconds(self.refresh_ttl_seconds);

        storage::insert_refresh_token(
            pool,
            &utils::hash_refresh_token(&refresh_token),
            user_id,
            expires_at,
        )
        .await?;

        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn issuer() -> TokenIssuer {
        let globals = GlobalArgs::new(SecretString::from("test-signing-secret".to_string()));
        TokenIssuer::new(&globals)
    }

    #[test]
    fn access_token_round_trips() {
        let issuer = issuer();
        let user_id = Uuid::new_v4();

        let token = issuer.mint_access_token(user_id, "alice").expect("mint");
        let claims = issuer.verify_access_token(&token).expect("verify");

        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.username, "alice");
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn expired_access_token_is_rejected() {
        let mut globals = GlobalArgs::new(SecretString::from("test-signing-secret".to_string()));
        globals.access_token_ttl_seconds = -120;
        let issuer = TokenIssuer::new(&globals);

        let token = issuer
            .mint_access_token(Uuid::new_v4(), "alice")
            .expect("mint");
        assert!(issuer.verify_access_token(&token).is_err());
    }

    #[test]
    fn tampered_access_token_is_rejected() {
        let issuer = issuer();
        let token = issuer
            .mint_access_token(Uuid::new_v4(), "alice")
            .expect("mint");

        let mut tampered = token.clone();
        tampered.pop();
        tampered.push(if token.ends_with('A') { 'B' } else { 'A' });
        assert!(issuer.verify_access_token(&tampered).is_err());
    }

    #[test]
    fn wrong_key_is_rejected() {
        let issuer_a = issuer();
        let globals = GlobalArgs::new(SecretString::from("other-secret".to_string()));
        let issuer_b = TokenIssuer::new(&globals);

        let token = issuer_a
            .mint_access_token(Uuid::new_v4(), "alice")
            .expect("mint");
        assert!(issuer_b.verify_access_token(&token).is_err());
    }
}
