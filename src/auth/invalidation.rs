/// Session invalidation
///
/// Two independent granularities:
/// - refresh tokens: deleted per identity (`invalidate_all`), or revoked one
///   at a time on sign-out
/// - access tokens: all of them go stale at once when the identity's token
///   version is bumped

use chrono::Utc;
use uuid::Uuid;

use crate::auth::refresh_token::{hash_token, validate_presented_refresh_token};
use crate::error::{AppError, AuthError};
use crate::store::{IdentityStore, RefreshTokenStore};

/// Delete every refresh token owned by the identity
pub async fn invalidate_all(
    tokens: &dyn RefreshTokenStore,
    identity_id: Uuid,
) -> Result<u64, AppError> {
    let deleted = tokens.delete_refresh_tokens_for_identity(identity_id).await?;

    tracing::info!(
        identity_id = %identity_id,
        deleted,
        "All refresh tokens invalidated for identity"
    );
    Ok(deleted)
}

/// Cascade an identity deletion: its refresh tokens go first, then the identity
///
/// # Returns
/// Whether an identity was deleted
pub async fn on_identity_deleted(
    identities: &dyn IdentityStore,
    tokens: &dyn RefreshTokenStore,
    identity_id: Uuid,
) -> Result<bool, AppError> {
    invalidate_all(tokens, identity_id).await?;
    let deleted = identities.delete_identity(identity_id).await?;

    if deleted {
        tracing::info!(identity_id = %identity_id, "Identity deleted");
    }
    Ok(deleted)
}

/// Increment the identity's token version, making every access token issued
/// so far fail verification. Refresh tokens are untouched.
pub async fn bump_token_version(
    identities: &dyn IdentityStore,
    identity_id: Uuid,
) -> Result<i32, AppError> {
    let version = identities
        .increment_token_version(identity_id)
        .await?
        .ok_or(AuthError::TokenInvalid)?;

    tracing::info!(
        identity_id = %identity_id,
        token_version = version,
        "Token version bumped"
    );
    Ok(version)
}

/// Revoke a single refresh token (sign-out)
///
/// Unknown or already revoked tokens are not an error, so signing out twice
/// is harmless.
pub async fn revoke_refresh_token(
    tokens: &dyn RefreshTokenStore,
    presented: &str,
) -> Result<(), AppError> {
    validate_presented_refresh_token(presented)?;

    if let Some(record) = tokens
        .revoke_refresh_token(&hash_token(presented), Utc::now())
        .await?
    {
        tracing::info!(
            identity_id = %record.identity_id,
            refresh_token_id = %record.id,
            "Refresh token revoked"
        );
    }
    Ok(())
}

/// Check whether a rejected token is one that was already revoked
///
/// A hit means a rotated-away secret was presented again, which points to a
/// copied token. The caller-visible result is unchanged; this only reports.
pub async fn detect_reuse(tokens: &dyn RefreshTokenStore, presented: &str) -> bool {
    match tokens.find_refresh_token(&hash_token(presented)).await {
        Ok(Some(record)) if record.is_revoked() => {
            tracing::warn!(
                identity_id = %record.identity_id,
                refresh_token_id = %record.id,
                revoked_at = ?record.revoked_at,
                "Refresh token reuse detected"
            );
            true
        }
        Ok(_) => false,
        Err(e) => {
            tracing::error!(error = %e, "Refresh token reuse check failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::{generate_access_token, verify_access_token};
    use crate::auth::refresh_token::{issue_refresh_token, lookup_active_refresh_token};
    use crate::auth::rotation::rotate_refresh_token;
    use crate::configuration::JwtSettings;
    use crate::error::ErrorKind;
    use crate::store::{InMemoryStore, NewIdentity};

    fn config() -> JwtSettings {
        JwtSettings {
            secret: "test-secret-key-at-least-32-characters-long".to_string(),
            access_token_expiry: 900,
            refresh_token_expiry: 604800,
            issuer: "test".to_string(),
        }
    }

    async fn store_with_identity() -> (InMemoryStore, Uuid) {
        let store = InMemoryStore::new();
        let id = Uuid::new_v4();
        store
            .insert_identity(&NewIdentity {
                id,
                email: "member@example.com".to_string(),
                name: "Member".to_string(),
                password_hash: "hash".to_string(),
            })
            .await
            .unwrap();
        (store, id)
    }

    #[tokio::test]
    async fn test_identity_deletion_cascades() {
        let (store, id) = store_with_identity().await;
        let mut secrets = Vec::new();
        for _ in 0..3 {
            secrets.push(issue_refresh_token(&store, id, 604800).await.unwrap());
        }

        assert!(on_identity_deleted(&store, &store, id).await.unwrap());
        assert_eq!(store.refresh_token_count(id), 0);

        for secret in &secrets {
            let err = rotate_refresh_token(&store, &store, &config(), secret)
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Unauthenticated);
        }
    }

    #[tokio::test]
    async fn test_invalidate_all_keeps_identity() {
        let (store, id) = store_with_identity().await;
        issue_refresh_token(&store, id, 604800).await.unwrap();
        issue_refresh_token(&store, id, 604800).await.unwrap();

        assert_eq!(invalidate_all(&store, id).await.unwrap(), 2);
        assert!(store.find_identity(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_version_bump_leaves_refresh_tokens_valid() {
        let (store, id) = store_with_identity().await;
        let access_token = generate_access_token(&id, 0, &config()).unwrap();
        let refresh_token = issue_refresh_token(&store, id, 604800).await.unwrap();

        assert_eq!(bump_token_version(&store, id).await.unwrap(), 1);

        let err = verify_access_token(&store, &access_token, &config())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthenticated);
        assert!(lookup_active_refresh_token(&store, &refresh_token, Utc::now())
            .await
            .is_ok());
        assert!(rotate_refresh_token(&store, &store, &config(), &refresh_token)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_bump_unknown_identity() {
        let store = InMemoryStore::new();
        assert!(bump_token_version(&store, Uuid::new_v4()).await.is_err());
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent() {
        let (store, id) = store_with_identity().await;
        let secret = issue_refresh_token(&store, id, 604800).await.unwrap();

        revoke_refresh_token(&store, &secret).await.unwrap();
        revoke_refresh_token(&store, &secret).await.unwrap();

        assert!(lookup_active_refresh_token(&store, &secret, Utc::now())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_reuse_detection() {
        let (store, id) = store_with_identity().await;
        let secret = issue_refresh_token(&store, id, 604800).await.unwrap();

        assert!(!detect_reuse(&store, &secret).await);
        rotate_refresh_token(&store, &store, &config(), &secret)
            .await
            .unwrap();
        assert!(detect_reuse(&store, &secret).await);
        assert!(!detect_reuse(&store, "never-issued").await);
    }
}
