/// Access Token Generation and Validation
///
/// Access tokens are HS256 JWTs. Signature, issuer and expiry are checked
/// without touching the store, but `verify_access_token` always re-reads
/// the identity's token version: bumping it is what invalidates tokens
/// that are otherwise valid.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use crate::auth::claims::{AuthenticatedIdentity, Claims};
use crate::configuration::JwtSettings;
use crate::error::{AppError, AuthError};
use crate::store::IdentityStore;

/// Generate a new access token for an identity
///
/// # Errors
/// Returns error if token signing fails
pub fn generate_access_token(
    identity_id: &Uuid,
    token_version: i32,
    config: &JwtSettings,
) -> Result<String, AppError> {
    let claims = Claims::new(
        *identity_id,
        token_version,
        config.access_token_expiry,
        config.issuer.clone(),
    );

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(config.secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))
}

/// Check signature, issuer and expiry, and extract the claims
///
/// This is only the stateless half of verification; see `verify_access_token`.
pub fn decode_access_token(token: &str, config: &JwtSettings) -> Result<Claims, AppError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[&config.issuer]);
    validation.set_required_spec_claims(&["exp", "iss", "sub"]);

    decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| {
        tracing::debug!("JWT validation error: {}", e);
        AuthError::TokenInvalid.into()
    })
}

/// Fully verify an access token
///
/// # Errors
/// `Unauthenticated` if the token is malformed, tampered with, expired, its
/// identity no longer exists, or the identity's token version moved on.
pub async fn verify_access_token(
    identities: &dyn IdentityStore,
    token: &str,
    config: &JwtSettings,
) -> Result<AuthenticatedIdentity, AppError> {
    let claims = decode_access_token(token, config)?;
    let identity_id = claims.identity_id()?;

    let identity = identities
        .find_identity(identity_id)
        .await?
        .ok_or(AuthError::TokenInvalid)?;

    if identity.token_version != claims.ver {
        tracing::info!(
            identity_id = %identity_id,
            token_version = claims.ver,
            current_version = identity.token_version,
            "Rejected access token with stale token version"
        );
        return Err(AuthError::TokenInvalid.into());
    }

    Ok(AuthenticatedIdentity {
        id: identity_id,
        token_version: claims.ver,
    })
}
