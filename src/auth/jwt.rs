//! JWT access and refresh tokens
//!
//! HS256 tokens with separate secrets for the short-lived access token
//! and the long-lived refresh token. The `kind` claim keeps one token
//! class from being replayed as the other.

use jsonwebtoken::{
    decode, encode, get_current_timestamp, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};

use crate::types::AppError;

/// Claims carried by both token kinds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User ObjectId (hex)
    pub sub: String,

    /// Role at issue time (citizen or admin)
    pub role: String,

    /// Token class: "access" or "refresh"
    pub kind: String,

    /// Issued-at (seconds since epoch)
    pub iat: u64,

    /// Expiry (seconds since epoch)
    pub exp: u64,
}

/// Issues and verifies both token kinds
#[derive(Clone)]
pub struct TokenSigner {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    access_ttl_seconds: u64,
    refresh_ttl_seconds: u64,
}

impl TokenSigner {
    pub fn new(
        access_secret: &str,
        refresh_secret: &str,
        access_ttl_seconds: u64,
        refresh_ttl_seconds: u64,
    ) -> Self {
        Self {
            access_encoding: EncodingKey::from_secret(access_secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(access_secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(refresh_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(refresh_secret.as_bytes()),
            access_ttl_seconds,
            refresh_ttl_seconds,
        }
    }

    /// Issue a short-lived access token
    pub fn issue_access(&self, user_id: &str, role: &str) -> Result<String, AppError> {
        self.issue(user_id, role, "access", self.access_ttl_seconds, &self.access_encoding)
    }

    /// Issue a long-lived refresh token
    pub fn issue_refresh(&self, user_id: &str, role: &str) -> Result<String, AppError> {
        self.issue(
            user_id,
            role,
            "refresh",
            self.refresh_ttl_seconds,
            &self.refresh_encoding,
        )
    }

    fn issue(
        &self,
        user_id: &str,
        role: &str,
        kind: &str,
        ttl_seconds: u64,
        key: &EncodingKey,
    ) -> Result<String, AppError> {
        let now = get_current_timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            role: role.to_string(),
            kind: kind.to_string(),
            iat: now,
            exp: now + ttl_seconds,
        };

        encode(&Header::default(), &claims, key)
            .map_err(|e| AppError::Internal(format!("Failed to sign token: {e}")))
    }

    /// Verify an access token and return its claims
    pub fn verify_access(&self, token: &str) -> Result<Claims, AppError> {
        Self::verify(token, "access", &self.access_decoding)
    }

    /// Verify a refresh token and return its claims
    pub fn verify_refresh(&self, token: &str) -> Result<Claims, AppError> {
        Self::verify(token, "refresh", &self.refresh_decoding)
    }

    fn verify(token: &str, kind: &str, key: &DecodingKey) -> Result<Claims, AppError> {
        let data = decode::<Claims>(token, key, &Validation::default())
            .map_err(|e| AppError::Auth(format!("Invalid token: {e}")))?;

        if data.claims.kind != kind {
            return Err(AppError::Auth("Wrong token kind".to_string()));
        }

        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> TokenSigner {
        TokenSigner::new("access-secret", "refresh-secret", 900, 604800)
    }

    #[test]
    fn access_round_trip() {
        let signer = signer();
        let token = signer.issue_access("user-1", "citizen").unwrap();
        let claims = signer.verify_access(&token).unwrap();

        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.role, "citizen");
        assert_eq!(claims.kind, "access");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn refresh_round_trip() {
        let signer = signer();
        let token = signer.issue_refresh("user-2", "admin").unwrap();
        let claims = signer.verify_refresh(&token).unwrap();

        assert_eq!(claims.kind, "refresh");
        assert_eq!(claims.role, "admin");
    }

    #[test]
    fn token_kinds_not_interchangeable() {
        let signer = signer();

        let access = signer.issue_access("user-1", "citizen").unwrap();
        assert!(signer.verify_refresh(&access).is_err());

        let refresh = signer.issue_refresh("user-1", "citizen").unwrap();
        assert!(signer.verify_access(&refresh).is_err());
    }

    #[test]
    fn wrong_secret_rejected() {
        let signer = signer();
        let other = TokenSigner::new("other-secret", "other-refresh", 900, 604800);

        let token = signer.issue_access("user-1", "citizen").unwrap();
        assert!(other.verify_access(&token).is_err());
    }

    #[test]
    fn expired_token_rejected() {
        let signer = signer();
        let now = get_current_timestamp();
        let claims = Claims {
            sub: "user-1".to_string(),
            role: "citizen".to_string(),
            kind: "access".to_string(),
            iat: now - 1000,
            exp: now - 500,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"access-secret"),
        )
        .unwrap();

        assert!(signer.verify_access(&token).is_err());
    }
}
