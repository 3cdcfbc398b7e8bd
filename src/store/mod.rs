/// Persistence contracts for identities and refresh tokens
///
/// The authentication core only talks to these traits. `PgStore` is the
/// production backend; `InMemoryStore` backs tests and local development.
///
/// All refresh-token mutation goes through `insert_refresh_token`,
/// `rotate_refresh_token`, `revoke_refresh_token` and
/// `delete_refresh_tokens_for_identity`. Revocation is one-directional:
/// no operation ever clears `revoked_at`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;

mod memory;
mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

/// An authenticated principal as stored by the account collaborator
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Identity {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub token_version: i32,
    pub failed_login_attempts: i32,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_failed_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Identity {
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        matches!(self.locked_until, Some(until) if until > now)
    }
}

#[derive(Debug, Clone)]
pub struct NewIdentity {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub password_hash: String,
}

/// One outstanding refresh token. Only the hash of the secret is kept.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    pub identity_id: Uuid,
    pub secret_hash: String,
    /// The record this one was rotated from
    pub parent_id: Option<Uuid>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl RefreshTokenRecord {
    /// Expired records are treated exactly like revoked ones
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct NewRefreshToken {
    pub id: Uuid,
    pub identity_id: Uuid,
    pub secret_hash: String,
    pub parent_id: Option<Uuid>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Account-management collaborator, reduced to what the token lifecycle needs
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn insert_identity(&self, identity: &NewIdentity) -> Result<Identity, AppError>;

    async fn find_identity(&self, id: Uuid) -> Result<Option<Identity>, AppError>;

    async fn find_identity_by_email(&self, email: &str) -> Result<Option<Identity>, AppError>;

    /// Returns the new version, or `None` if the identity does not exist
    async fn increment_token_version(&self, id: Uuid) -> Result<Option<i32>, AppError>;

    /// Count a failed sign-in. Once the count reaches `threshold` the
    /// identity is locked until `lock_until`. A lock that already expired
    /// restarts the count.
    async fn record_failed_login(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        threshold: i32,
        lock_until: DateTime<Utc>,
    ) -> Result<(), AppError>;

    async fn reset_failed_logins(&self, id: Uuid) -> Result<(), AppError>;

    async fn delete_identity(&self, id: Uuid) -> Result<bool, AppError>;
}

#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn insert_refresh_token(
        &self,
        token: &NewRefreshToken,
    ) -> Result<RefreshTokenRecord, AppError>;

    /// Non-revoked, non-expired record with this hash
    async fn find_active_refresh_token(
        &self,
        secret_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshTokenRecord>, AppError>;

    /// Any record with this hash, whatever its state
    async fn find_refresh_token(
        &self,
        secret_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, AppError>;

    /// Revoke record `current_id` and insert `successor` as one atomic step.
    ///
    /// The revoke only applies while the record is still active. If it is
    /// not (another caller rotated it first, or it expired) nothing is
    /// written and `None` is returned.
    async fn rotate_refresh_token(
        &self,
        current_id: Uuid,
        successor: &NewRefreshToken,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshTokenRecord>, AppError>;

    /// Revoke a single active record. Returns the record if this call revoked it.
    async fn revoke_refresh_token(
        &self,
        secret_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshTokenRecord>, AppError>;

    /// Hard delete every record owned by the identity
    async fn delete_refresh_tokens_for_identity(&self, identity_id: Uuid)
        -> Result<u64, AppError>;
}
