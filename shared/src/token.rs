//! Thin facade over the JWT library for login and join tokens
//!
//! Both server roles verify inbound HS256 tokens against a shared secret and
//! an issuer allow-list; the matchmaking server additionally signs the join
//! tokens it hands to matched players. Expiration is not enforced: claims
//! beyond the issuer pass through the verifier unchanged.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::SessionId;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token rejected: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("token payload carries no game data claim")]
    MissingGameData,
}

/// Payload of a join token issued by the matchmaking server.
#[derive(Debug, Serialize, Deserialize)]
struct JoinClaims {
    iss: String,
    id: SessionId,
    data: Value,
}

/// Signs join tokens for matched sessions.
pub struct TokenSigner {
    key: EncodingKey,
    issuer: String,
}

impl TokenSigner {
    pub fn new(secret: &str, issuer: &str) -> Self {
        Self {
            key: EncodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.to_string(),
        }
    }

    /// Produces a token with payload `{ iss, id, data }`.
    pub fn sign(&self, group: SessionId, data: &Value) -> Result<String, TokenError> {
        let claims = JoinClaims {
            iss: self.issuer.clone(),
            id: group,
            data: data.clone(),
        };
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.key)?)
    }
}

/// Successful outcome of a login-token verification.
#[derive(Debug)]
pub struct Login {
    pub issuer: String,
    pub game_data: Value,
}

/// Verifies login tokens: HS256 signature, allow-listed issuer, and a game
/// data payload.
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str, issuers: &[&str]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        validation.set_issuer(issuers);
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Checks signature and issuer, then extracts the game data payload.
    ///
    /// Auth-issued login tokens carry a `game_data` claim; matchmaker-issued
    /// join tokens carry theirs under `data`. Either name is accepted.
    pub fn verify(&self, token: &str) -> Result<Login, TokenError> {
        let decoded = decode::<Value>(token, &self.key, &self.validation)?;
        let claims = decoded.claims;

        let issuer = claims
            .get("iss")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let game_data = claims
            .get("game_data")
            .or_else(|| claims.get("data"))
            .cloned()
            .ok_or(TokenError::MissingGameData)?;

        Ok(Login { issuer, game_data })
    }
}
