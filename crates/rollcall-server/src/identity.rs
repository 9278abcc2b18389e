//! HS256 bearer tokens carrying `{userId, role, exp}`.

use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use rollcall_core::{CoordinatorError, Identity, IdentityService, Role, UserId};

/// Lifetime of tokens minted without an explicit TTL.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Token payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    /// Subject.
    pub user_id: UserId,
    /// Granted role.
    pub role: Role,
    /// Expiry, seconds since the Unix epoch.
    pub exp: u64,
}

/// HS256 signer and verifier sharing one secret.
pub struct JwtIdentity {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtIdentity {
    /// Keys derived from `secret`.
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Mint a token for `user_id` valid for `ttl`.
    pub fn issue(&self, user_id: &UserId, role: Role, ttl: Duration) -> Result<String, CoordinatorError> {
        let now = u64::try_from(Utc::now().timestamp()).unwrap_or_default();
        let claims = Claims {
            user_id: user_id.clone(),
            role,
            exp: now.saturating_add(ttl.as_secs()),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| CoordinatorError::Internal(format!("token encoding failed: {e}")))
    }
}

impl IdentityService for JwtIdentity {
    fn verify(&self, credential: &str) -> Result<Identity, CoordinatorError> {
        let data = decode::<Claims>(credential, &self.decoding, &self.validation).map_err(|e| {
            debug!(error = %e, "token rejected");
            CoordinatorError::Unauthorized
        })?;
        Ok(Identity::new(data.claims.user_id, data.claims.role))
    }
}
