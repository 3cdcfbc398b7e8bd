/// Refresh token rotation
///
/// Exchanging a refresh token revokes it and issues its successor in one
/// atomic store operation. Of several concurrent rotations presenting the
/// same token, exactly one succeeds; the others see the token as revoked
/// and fail with `Unauthenticated`.

use chrono::Utc;

use crate::auth::invalidation::detect_reuse;
use crate::auth::jwt::generate_access_token;
use crate::auth::refresh_token::{
    lookup_active_refresh_token, new_refresh_token, validate_presented_refresh_token,
};
use crate::configuration::JwtSettings;
use crate::error::{AppError, AuthError, ErrorKind};
use crate::store::{IdentityStore, RefreshTokenStore};

/// A freshly issued access/refresh token pair
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Rotate a presented refresh token
///
/// # Errors
/// - `InvalidArguments` if the token is empty or oversized
/// - `Unauthenticated` if it is unknown, revoked, expired, or lost a race
/// - `Unexpected` if the store fails; nothing is left half-written
pub async fn rotate_refresh_token(
    identities: &dyn IdentityStore,
    tokens: &dyn RefreshTokenStore,
    config: &JwtSettings,
    presented: &str,
) -> Result<TokenPair, AppError> {
    validate_presented_refresh_token(presented)?;
    let now = Utc::now();

    let current = match lookup_active_refresh_token(tokens, presented, now).await {
        Ok(record) => record,
        Err(e) => {
            if e.kind() == ErrorKind::Unauthenticated {
                detect_reuse(tokens, presented).await;
            }
            return Err(e);
        }
    };

    // Everything that can fail happens before the store commits, so a
    // failure here leaves the presented token usable
    let identity = identities
        .find_identity(current.identity_id)
        .await?
        .ok_or(AuthError::InvalidRefreshToken)?;
    let access_token = generate_access_token(&identity.id, identity.token_version, config)?;

    let (secret, successor) = new_refresh_token(
        current.identity_id,
        Some(current.id),
        config.refresh_token_expiry,
        now,
    );

    let record = match tokens
        .rotate_refresh_token(current.id, &successor, now)
        .await?
    {
        Some(record) => record,
        None => {
            // Someone else revoked it between our lookup and the update
            tracing::warn!(
                identity_id = %current.identity_id,
                refresh_token_id = %current.id,
                "Refresh token rotation lost a concurrent race"
            );
            return Err(AuthError::InvalidRefreshToken.into());
        }
    };

    tracing::info!(
        identity_id = %identity.id,
        revoked_refresh_token_id = %current.id,
        refresh_token_id = %record.id,
        "Refresh token rotated"
    );

    Ok(TokenPair {
        access_token,
        refresh_token: secret,
    })
}
