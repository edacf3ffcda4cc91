//! Token validation only. Credential storage and token issuance live in
//! a separate identity service; this backend merely verifies the signed
//! claims it is handed.

use crate::common::error::{ApiError, ApiResult};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

pub const ROLE_IMAM: &str = "imam";
pub const ROLE_USER: &str = "user";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Account identifier.
    pub sub: String,
    pub role: String,
    pub exp: usize,
}

#[derive(Clone)]
pub struct AuthService {
    decoding_key: DecodingKey,
}

impl AuthService {
    pub fn new(jwt_secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
        }
    }

    /// Returns `(user_id, role)` for a valid, unexpired bearer token.
    pub fn validate_token(&self, token: &str) -> ApiResult<(String, String)> {
        let data = decode::<Claims>(
            token,
            &self.decoding_key,
            &Validation::new(Algorithm::HS256),
        )?;

        if data.claims.role != ROLE_IMAM && data.claims.role != ROLE_USER {
            return Err(ApiError::authentication("Unknown role"));
        }

        Ok((data.claims.sub, data.claims.role))
    }
}
