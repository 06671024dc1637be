//! Password hashing and the JWT access / refresh token pair.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::OnceLock;
use thiserror::Error;
use uuid::Uuid;

use crate::config::Config;
use crate::domain::aggregates::Role;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("invalid token: {0}")]
    Invalid(String),
    #[error("failed to sign token: {0}")]
    Signing(String),
}

#[derive(Debug, Error)]
#[error("password hashing failed: {0}")]
pub struct PasswordError(String);

/// Claims carried by the short-lived access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: Uuid,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

/// Claims carried by the refresh token; `jti` makes every issued token distinct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: Uuid,
    pub jti: Uuid,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| PasswordError(e.to_string()))
}

/// Unparseable hashes count as a mismatch.
pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok(),
        Err(e) => {
            tracing::warn!("stored password hash is unreadable: {}", e);
            false
        }
    }
}

/// Does the argon2 work of a real check against a throwaway hash, so a login
/// for an unknown email takes as long as a wrong password. Always false.
pub fn verify_unknown_user(password: &str) -> bool {
    static DUMMY_HASH: OnceLock<Option<String>> = OnceLock::new();
    let dummy = DUMMY_HASH.get_or_init(|| hash_password(DUMMY_PASSWORD).ok());
    if let Some(hash) = dummy {
        let _ = verify_password(password, hash);
    }
    false
}

const DUMMY_PASSWORD: &str = "sparepartshub-unknown-user";

/// Signs and checks tokens with the configured secrets and lifetimes.
#[derive(Clone)]
pub struct TokenService {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenService {
    pub fn new(config: &Config) -> Self {
        Self {
            access_encoding: EncodingKey::from_secret(config.jwt_access_secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(config.jwt_access_secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(config.jwt_refresh_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(config.jwt_refresh_secret.as_bytes()),
            access_ttl: config.access_ttl,
            refresh_ttl: config.refresh_ttl,
        }
    }

    pub fn issue(&self, user_id: Uuid, role: Role) -> Result<TokenPair, TokenError> {
        let now = Utc::now();
        let access = AccessClaims { sub: user_id, role, iat: now.timestamp(), exp: (now + self.access_ttl).timestamp() };
        let refresh = RefreshClaims {
            sub: user_id,
            jti: Uuid::new_v4(),
            iat: now.timestamp(),
            exp: (now + self.refresh_ttl).timestamp(),
        };
        Ok(TokenPair {
            access_token: encode(&Header::default(), &access, &self.access_encoding).map_err(|e| TokenError::Signing(e.to_string()))?,
            refresh_token: encode(&Header::default(), &refresh, &self.refresh_encoding).map_err(|e| TokenError::Signing(e.to_string()))?,
        })
    }

    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, TokenError> {
        decode::<AccessClaims>(token, &self.access_decoding, &validation()).map(|d| d.claims).map_err(classify)
    }

    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, TokenError> {
        decode::<RefreshClaims>(token, &self.refresh_decoding, &validation()).map(|d| d.claims).map_err(classify)
    }
}

fn validation() -> Validation {
    let mut v = Validation::default();
    v.leeway = 0;
    v
}

fn classify(e: jsonwebtoken::errors::Error) -> TokenError {
    match e.kind() {
        ErrorKind::ExpiredSignature => TokenError::Expired,
        _ => TokenError::Invalid(e.to_string()),
    }
}

/// Only a digest of the refresh token is stored server-side.
pub fn refresh_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;

    #[test]
    fn test_password_hashing() {
        let hash = hash_password("admin123").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("admin123", &hash));
        assert!(!verify_password("admin124", &hash));
        assert!(!verify_password("admin123", "not-a-hash"));
    }

    #[test]
    fn test_unknown_user_never_verifies() {
        assert!(!verify_unknown_user("admin123"));
        assert!(!verify_unknown_user(DUMMY_PASSWORD));
    }

    #[test]
    fn test_issue_and_verify_pair() {
        let tokens = TokenService::new(&test_config());
        let id = Uuid::now_v7();
        let pair = tokens.issue(id, Role::Wholesaler).unwrap();

        let access = tokens.verify_access(&pair.access_token).unwrap();
        assert_eq!(access.sub, id);
        assert_eq!(access.role, Role::Wholesaler);
        assert_eq!(tokens.verify_refresh(&pair.refresh_token).unwrap().sub, id);
    }

    #[test]
    fn test_tokens_are_not_interchangeable() {
        let tokens = TokenService::new(&test_config());
        let pair = tokens.issue(Uuid::now_v7(), Role::Customer).unwrap();
        assert!(matches!(tokens.verify_access(&pair.refresh_token), Err(TokenError::Invalid(_))));
        assert!(matches!(tokens.verify_refresh(&pair.access_token), Err(TokenError::Invalid(_))));
    }

    #[test]
    fn test_expired_access_token() {
        let config = test_config();
        let claims = AccessClaims { sub: Uuid::now_v7(), role: Role::Customer, iat: 1_000, exp: 2_000 };
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(config.jwt_access_secret.as_bytes())).unwrap();
        assert_eq!(TokenService::new(&config).verify_access(&token).unwrap_err(), TokenError::Expired);
    }

    #[test]
    fn test_refresh_tokens_rotate() {
        let tokens = TokenService::new(&test_config());
        let id = Uuid::now_v7();
        let a = tokens.issue(id, Role::Customer).unwrap();
        let b = tokens.issue(id, Role::Customer).unwrap();
        assert_ne!(refresh_digest(&a.refresh_token), refresh_digest(&b.refresh_token));
        assert_eq!(refresh_digest("abc").len(), 64);
    }
}
