/// JWT Claims structure
///
/// Represents the payload of an access token: the identity it was issued
/// to, the identity's token version at issuance, and standard JWT claims
/// (RFC 7519).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AuthError};

/// JWT Claims for access tokens
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (identity ID as UUID string)
    pub sub: String,
    /// Token version snapshot; stale once the identity's version advances
    pub ver: i32,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    pub iss: String,
    /// Unique token id
    pub jti: String,
}

impl Claims {
    /// Create new claims for an identity
    ///
    /// # Arguments
    /// * `identity_id` - Identity's UUID
    /// * `token_version` - Identity's current token version
    /// * `expiry_seconds` - Token expiration in seconds from now
    /// * `issuer` - Issuer identifier
    pub fn new(identity_id: Uuid, token_version: i32, expiry_seconds: i64, issuer: String) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            sub: identity_id.to_string(),
            ver: token_version,
            exp: now + expiry_seconds,
            iat: now,
            iss: issuer,
            jti: Uuid::new_v4().to_string(),
        }
    }

    /// Extract identity ID from claims
    ///
    /// # Errors
    /// Returns `Unauthenticated` if the subject is not a valid UUID
    pub fn identity_id(&self) -> Result<Uuid, AppError> {
        Uuid::parse_str(&self.sub).map_err(|_| AuthError::TokenInvalid.into())
    }
}

/// The identity behind the current request
///
/// Produced by access token verification and passed explicitly to the
/// handlers that need it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedIdentity {
    pub id: Uuid,
    pub token_version: i32,
}
