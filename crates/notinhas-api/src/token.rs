//! Session tokens: HS256 JWTs carrying `{sub, username, iat, exp?}`.
//!
//! The issuer only signs and verifies. Moving the token between client and
//! server (the `token` cookie) is the handlers' job.

use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::debug;
use uuid::Uuid;

use notinhas_types::api::Claims;
use notinhas_types::models::User;

use crate::error::ApiError;

/// Name of the cookie that carries the session token.
pub const TOKEN_COOKIE: &str = "token";

/// Who is making the request, as asserted by a verified token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub username: String,
}

pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Option<Duration>,
}

impl TokenIssuer {
    /// `ttl: None` issues tokens without an `exp` claim.
    pub fn new(secret: &[u8], ttl: Option<Duration>) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl,
        }
    }

    pub fn issue(&self, user: &User) -> Result<String, ApiError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user.id,
            username: user.username.clone(),
            iat: now.timestamp(),
            exp: self.ttl.map(|ttl| (now + ttl).timestamp()),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| ApiError::Storage(anyhow::anyhow!("token signing failed: {}", e)))
    }

    /// All-or-nothing: either every claim checks out or the token is rejected.
    pub fn verify(&self, token: Option<&str>) -> Result<Identity, ApiError> {
        let token = match token {
            Some(t) if !t.is_empty() => t,
            _ => return Err(ApiError::MissingToken),
        };

        let data = decode::<Claims>(token, &self.decoding, &self.validation()).map_err(|e| {
            debug!("Rejected session token: {}", e);
            ApiError::InvalidToken
        })?;

        Ok(Identity {
            user_id: data.claims.sub,
            username: data.claims.username,
        })
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        validation.validate_exp = self.ttl.is_some();
        if self.ttl.is_some() {
            validation.required_spec_claims.insert("exp".to_string());
        }
        validation
    }
}
