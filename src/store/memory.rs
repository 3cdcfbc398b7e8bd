/// In-memory store
///
/// Every operation runs inside one critical section, so the revoke and the
/// successor insert of a rotation are observed together or not at all.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use uuid::Uuid;

use super::{
    Identity, IdentityStore, NewIdentity, NewRefreshToken, RefreshTokenRecord, RefreshTokenStore,
};
use crate::error::{AppError, DatabaseError};

#[derive(Default)]
struct State {
    identities: HashMap<Uuid, Identity>,
    refresh_tokens: HashMap<Uuid, RefreshTokenRecord>,
}

impl State {
    fn insert_refresh_token(
        &mut self,
        token: &NewRefreshToken,
    ) -> Result<RefreshTokenRecord, AppError> {
        if !self.identities.contains_key(&token.identity_id) {
            return Err(DatabaseError::InvariantViolation(
                "refresh token references unknown identity".to_string(),
            )
            .into());
        }
        if self
            .refresh_tokens
            .values()
            .any(|r| r.secret_hash == token.secret_hash)
            || self.refresh_tokens.contains_key(&token.id)
        {
            return Err(DatabaseError::UniqueConstraintViolation(
                "refresh_tokens_secret_hash_key".to_string(),
            )
            .into());
        }

        let record = RefreshTokenRecord {
            id: token.id,
            identity_id: token.identity_id,
            secret_hash: token.secret_hash.clone(),
            parent_id: token.parent_id,
            issued_at: token.issued_at,
            expires_at: token.expires_at,
            revoked_at: None,
        };
        self.refresh_tokens.insert(record.id, record.clone());
        Ok(record)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock()
    }

    /// Number of refresh token records owned by the identity, in any state
    pub fn refresh_token_count(&self, identity_id: Uuid) -> usize {
        self.state()
            .refresh_tokens
            .values()
            .filter(|r| r.identity_id == identity_id)
            .count()
    }
}

#[async_trait]
impl IdentityStore for InMemoryStore {
    async fn insert_identity(&self, identity: &NewIdentity) -> Result<Identity, AppError> {
        let mut state = self.state();
        if state
            .identities
            .values()
            .any(|i| i.email == identity.email)
        {
            return Err(DatabaseError::UniqueConstraintViolation(
                "identities_email_key".to_string(),
            )
            .into());
        }

        let created = Identity {
            id: identity.id,
            email: identity.email.clone(),
            name: identity.name.clone(),
            password_hash: identity.password_hash.clone(),
            token_version: 0,
            failed_login_attempts: 0,
            locked_until: None,
            last_failed_login_at: None,
            created_at: Utc::now(),
        };
        state.identities.insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_identity(&self, id: Uuid) -> Result<Option<Identity>, AppError> {
        Ok(self.state().identities.get(&id).cloned())
    }

    async fn find_identity_by_email(&self, email: &str) -> Result<Option<Identity>, AppError> {
        Ok(self
            .state()
            .identities
            .values()
            .find(|i| i.email == email)
            .cloned())
    }

    async fn increment_token_version(&self, id: Uuid) -> Result<Option<i32>, AppError> {
        let mut state = self.state();
        Ok(state.identities.get_mut(&id).map(|identity| {
            identity.token_version += 1;
            identity.token_version
        }))
    }

    async fn record_failed_login(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        threshold: i32,
        lock_until: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut state = self.state();
        if let Some(identity) = state.identities.get_mut(&id) {
            let lock_expired = matches!(identity.locked_until, Some(until) if until <= at);
            let attempts = if lock_expired {
                1
            } else {
                identity.failed_login_attempts + 1
            };

            identity.failed_login_attempts = attempts;
            identity.last_failed_login_at = Some(at);
            if attempts >= threshold {
                identity.locked_until = Some(lock_until);
            } else if lock_expired {
                identity.locked_until = None;
            }
        }
        Ok(())
    }

    async fn reset_failed_logins(&self, id: Uuid) -> Result<(), AppError> {
        let mut state = self.state();
        if let Some(identity) = state.identities.get_mut(&id) {
            identity.failed_login_attempts = 0;
            identity.locked_until = None;
            identity.last_failed_login_at = None;
        }
        Ok(())
    }

    async fn delete_identity(&self, id: Uuid) -> Result<bool, AppError> {
        Ok(self.state().identities.remove(&id).is_some())
    }
}

#[async_trait]
impl RefreshTokenStore for InMemoryStore {
    async fn insert_refresh_token(
        &self,
        token: &NewRefreshToken,
    ) -> Result<RefreshTokenRecord, AppError> {
        self.state().insert_refresh_token(token)
    }

    async fn find_active_refresh_token(
        &self,
        secret_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshTokenRecord>, AppError> {
        Ok(self
            .state()
            .refresh_tokens
            .values()
            .find(|r| r.secret_hash == secret_hash && r.is_active(now))
            .cloned())
    }

    async fn find_refresh_token(
        &self,
        secret_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, AppError> {
        Ok(self
            .state()
            .refresh_tokens
            .values()
            .find(|r| r.secret_hash == secret_hash)
            .cloned())
    }

    async fn rotate_refresh_token(
        &self,
        current_id: Uuid,
        successor: &NewRefreshToken,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshTokenRecord>, AppError> {
        let mut state = self.state();

        let still_active = matches!(
            state.refresh_tokens.get(&current_id),
            Some(current) if current.identity_id == successor.identity_id && current.is_active(now)
        );
        if !still_active {
            return Ok(None);
        }

        // Insert first: if it fails, the current record is left untouched
        let record = state.insert_refresh_token(successor)?;
        if let Some(current) = state.refresh_tokens.get_mut(&current_id) {
            current.revoked_at = Some(now);
        }

        Ok(Some(record))
    }

    async fn revoke_refresh_token(
        &self,
        secret_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshTokenRecord>, AppError> {
        let mut state = self.state();
        Ok(state
            .refresh_tokens
            .values_mut()
            .find(|r| r.secret_hash == secret_hash && r.revoked_at.is_none())
            .map(|record| {
                record.revoked_at = Some(now);
                record.clone()
            }))
    }

    async fn delete_refresh_tokens_for_identity(
        &self,
        identity_id: Uuid,
    ) -> Result<u64, AppError> {
        let mut state = self.state();
        let before = state.refresh_tokens.len();
        state
            .refresh_tokens
            .retain(|_, r| r.identity_id != identity_id);
        Ok((before - state.refresh_tokens.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

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

    fn new_token(identity_id: Uuid, hash: &str, parent_id: Option<Uuid>) -> NewRefreshToken {
        let now = Utc::now();
        NewRefreshToken {
            id: Uuid::new_v4(),
            identity_id,
            secret_hash: hash.to_string(),
            parent_id,
            issued_at: now,
            expires_at: now + Duration::days(7),
        }
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let (store, _) = store_with_identity().await;
        let result = store
            .insert_identity(&NewIdentity {
                id: Uuid::new_v4(),
                email: "member@example.com".to_string(),
                name: "Other".to_string(),
                password_hash: "hash".to_string(),
            })
            .await;

        assert!(matches!(
            result,
            Err(AppError::Database(DatabaseError::UniqueConstraintViolation(_)))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_secret_hash_rejected() {
        let (store, id) = store_with_identity().await;
        store
            .insert_refresh_token(&new_token(id, "hash-a", None))
            .await
            .expect("Failed to insert token");

        let result = store.insert_refresh_token(&new_token(id, "hash-a", None)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_rotate_revokes_and_inserts() {
        let (store, id) = store_with_identity().await;
        let current = store
            .insert_refresh_token(&new_token(id, "hash-a", None))
            .await
            .expect("Failed to insert token");

        let successor = new_token(id, "hash-b", Some(current.id));
        let rotated = store
            .rotate_refresh_token(current.id, &successor, Utc::now())
            .await
            .expect("Rotation failed")
            .expect("Record should still be active");

        assert_eq!(rotated.parent_id, Some(current.id));
        let old = store.find_refresh_token("hash-a").await.unwrap().unwrap();
        assert!(old.is_revoked());

        // The same record cannot be rotated twice
        let again = store
            .rotate_refresh_token(current.id, &new_token(id, "hash-c", Some(current.id)), Utc::now())
            .await
            .expect("Rotation failed");
        assert!(again.is_none());
        assert!(store.find_refresh_token("hash-c").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_rotation_insert_leaves_current_active() {
        let (store, id) = store_with_identity().await;
        let current = store
            .insert_refresh_token(&new_token(id, "hash-a", None))
            .await
            .unwrap();

        // Colliding successor hash makes the insert fail
        let successor = new_token(id, "hash-a", Some(current.id));
        let result = store
            .rotate_refresh_token(current.id, &successor, Utc::now())
            .await;

        assert!(result.is_err());
        let current = store.find_refresh_token("hash-a").await.unwrap().unwrap();
        assert!(!current.is_revoked());
    }

    #[tokio::test]
    async fn test_lockout_after_threshold() {
        let (store, id) = store_with_identity().await;
        let now = Utc::now();
        let until = now + Duration::minutes(15);

        for _ in 0..3 {
            store.record_failed_login(id, now, 3, until).await.unwrap();
        }

        let identity = store.find_identity(id).await.unwrap().unwrap();
        assert_eq!(identity.failed_login_attempts, 3);
        assert!(identity.is_locked(now));

        store.reset_failed_logins(id).await.unwrap();
        let identity = store.find_identity(id).await.unwrap().unwrap();
        assert_eq!(identity.failed_login_attempts, 0);
        assert!(!identity.is_locked(now));
    }

    #[tokio::test]
    async fn test_expired_lock_restarts_count() {
        let (store, id) = store_with_identity().await;
        let start = Utc::now();

        store
            .record_failed_login(id, start, 1, start + Duration::minutes(1))
            .await
            .unwrap();
        let later = start + Duration::minutes(5);
        store
            .record_failed_login(id, later, 2, later + Duration::minutes(1))
            .await
            .unwrap();

        let identity = store.find_identity(id).await.unwrap().unwrap();
        assert_eq!(identity.failed_login_attempts, 1);
        assert!(!identity.is_locked(later));
    }

    #[tokio::test]
    async fn test_clones_share_state_across_tasks() {
        let (store, id) = store_with_identity().await;

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .insert_refresh_token(&new_token(id, &format!("hash-{}", i), None))
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.refresh_token_count(id), 4);
        assert_eq!(store.refresh_token_count(Uuid::new_v4()), 0);
    }
}
