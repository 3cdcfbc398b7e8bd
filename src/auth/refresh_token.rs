/// Refresh Token Management
///
/// Refresh tokens are:
/// - Cryptographically secure random 64-character strings
/// - Hashed with SHA-256 before storage (never store plaintext)
/// - Returned to the caller exactly once, at issuance
/// - Single-use: each use rotates them (see `rotation`)

use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{AppError, AuthError, ValidationError};
use crate::store::{NewRefreshToken, RefreshTokenRecord, RefreshTokenStore};

pub const REFRESH_TOKEN_LENGTH: usize = 64;
const MAX_PRESENTED_TOKEN_LENGTH: usize = 512;

/// Generate a new cryptographically secure refresh token
pub fn generate_refresh_token() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(REFRESH_TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

/// Hash a refresh token using SHA-256
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Reject presented tokens that cannot possibly be valid, before any lookup
pub fn validate_presented_refresh_token(token: &str) -> Result<(), ValidationError> {
    if token.trim().is_empty() {
        return Err(ValidationError::EmptyField("refresh_token".to_string()));
    }
    if token.len() > MAX_PRESENTED_TOKEN_LENGTH {
        return Err(ValidationError::TooLong(
            "refresh_token".to_string(),
            MAX_PRESENTED_TOKEN_LENGTH,
        ));
    }
    Ok(())
}

/// Build a fresh secret and the record to persist for it
///
/// Returns the plaintext secret alongside the record carrying only its hash.
pub fn new_refresh_token(
    identity_id: Uuid,
    parent_id: Option<Uuid>,
    lifetime_seconds: i64,
    now: DateTime<Utc>,
) -> (String, NewRefreshToken) {
    let secret = generate_refresh_token();
    let record = NewRefreshToken {
        id: Uuid::new_v4(),
        identity_id,
        secret_hash: hash_token(&secret),
        parent_id,
        issued_at: now,
        expires_at: now + Duration::seconds(lifetime_seconds),
    };
    (secret, record)
}

/// Issue a new refresh token for an identity
///
/// # Returns
/// The plaintext token. It is not recoverable afterwards.
pub async fn issue_refresh_token(
    tokens: &dyn RefreshTokenStore,
    identity_id: Uuid,
    lifetime_seconds: i64,
) -> Result<String, AppError> {
    let (secret, record) = new_refresh_token(identity_id, None, lifetime_seconds, Utc::now());
    let saved = tokens.insert_refresh_token(&record).await?;

    tracing::debug!(
        identity_id = %identity_id,
        refresh_token_id = %saved.id,
        expires_at = %saved.expires_at,
        "Refresh token issued"
    );

    Ok(secret)
}

/// Resolve a presented token to its active record
///
/// # Errors
/// `Unauthenticated` with one generic message whether the token never
/// existed, was revoked, or expired.
pub async fn lookup_active_refresh_token(
    tokens: &dyn RefreshTokenStore,
    token: &str,
    now: DateTime<Utc>,
) -> Result<RefreshTokenRecord, AppError> {
    tokens
        .find_active_refresh_token(&hash_token(token), now)
        .await?
        .ok_or_else(|| AuthError::InvalidRefreshToken.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::store::{IdentityStore, InMemoryStore, NewIdentity};

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
            .expect("Failed to insert identity");
        (store, id)
    }

    #[test]
    fn test_generate_refresh_token() {
        let token = generate_refresh_token();

        assert_eq!(token.len(), REFRESH_TOKEN_LENGTH);
        assert!(token.chars().all(|c| c.is_alphanumeric()));
    }

    #[test]
    fn test_token_hashing() {
        let token = generate_refresh_token();
        let hash1 = hash_token(&token);
        let hash2 = hash_token(&token);

        assert_eq!(hash1, hash2);
        assert_ne!(token, hash1);
        // SHA-256 hex
        assert_eq!(hash1.len(), 64);
        assert_ne!(hash1, hash_token(&generate_refresh_token()));
    }

    #[test]
    fn test_presented_token_validation() {
        assert!(validate_presented_refresh_token("").is_err());
        assert!(validate_presented_refresh_token("   ").is_err());
        assert!(validate_presented_refresh_token(&"a".repeat(513)).is_err());
        assert!(validate_presented_refresh_token(&generate_refresh_token()).is_ok());
    }

    #[tokio::test]
    async fn test_issue_stores_only_the_hash() {
        let (store, id) = store_with_identity().await;
        let secret = issue_refresh_token(&store, id, 604800).await.unwrap();

        assert!(store.find_refresh_token(&secret).await.unwrap().is_none());
        let record = store
            .find_refresh_token(&hash_token(&secret))
            .await
            .unwrap()
            .expect("Record should be stored under the hash");
        assert_eq!(record.identity_id, id);
        assert_eq!(record.expires_at - record.issued_at, Duration::seconds(604800));
    }

    #[tokio::test]
    async fn test_lookup_active_after_issue() {
        let (store, id) = store_with_identity().await;
        let secret = issue_refresh_token(&store, id, 604800).await.unwrap();

        let record = lookup_active_refresh_token(&store, &secret, Utc::now())
            .await
            .expect("Issued token should be active");
        assert_eq!(record.identity_id, id);
    }

    #[tokio::test]
    async fn test_expired_and_revoked_rejected_identically() {
        let (store, id) = store_with_identity().await;

        let (expired_secret, mut expired) = new_refresh_token(id, None, 60, Utc::now());
        expired.issued_at = Utc::now() - Duration::days(8);
        expired.expires_at = Utc::now() - Duration::days(1);
        store.insert_refresh_token(&expired).await.unwrap();

        let revoked_secret = issue_refresh_token(&store, id, 604800).await.unwrap();
        store
            .revoke_refresh_token(&hash_token(&revoked_secret), Utc::now())
            .await
            .unwrap();

        let unknown_secret = generate_refresh_token();

        let mut messages = Vec::new();
        for secret in [&expired_secret, &revoked_secret, &unknown_secret] {
            let err = lookup_active_refresh_token(&store, secret, Utc::now())
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Unauthenticated);
            messages.push(err.to_string());
        }
        assert!(messages.iter().all(|m| m == "Invalid or expired refresh token."));
    }
}
