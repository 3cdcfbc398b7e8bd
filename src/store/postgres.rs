/// Postgres-backed store
///
/// Rotation relies on a conditional `UPDATE ... WHERE revoked_at IS NULL`
/// inside a transaction. Concurrent rotations of the same row serialize on
/// the row lock; the loser re-evaluates the predicate, matches zero rows and
/// rolls back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{
    Identity, IdentityStore, NewIdentity, NewRefreshToken, RefreshTokenRecord, RefreshTokenStore,
};
use crate::error::{AppError, DatabaseError};

const IDENTITY_COLUMNS: &str = "id, email, name, password_hash, token_version, \
     failed_login_attempts, locked_until, last_failed_login_at, created_at";

const REFRESH_TOKEN_COLUMNS: &str =
    "id, identity_id, secret_hash, parent_id, issued_at, expires_at, revoked_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl IdentityStore for PgStore {
    async fn insert_identity(&self, identity: &NewIdentity) -> Result<Identity, AppError> {
        sqlx::query_as::<_, Identity>(&format!(
            r#"
            INSERT INTO identities (id, email, name, password_hash, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            IDENTITY_COLUMNS
        ))
        .bind(identity.id)
        .bind(&identity.email)
        .bind(&identity.name)
        .bind(&identity.password_hash)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            DatabaseError::InvariantViolation("identity insert returned no row".to_string()).into()
        })
    }

    async fn find_identity(&self, id: Uuid) -> Result<Option<Identity>, AppError> {
        let identity = sqlx::query_as::<_, Identity>(&format!(
            "SELECT {} FROM identities WHERE id = $1",
            IDENTITY_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(identity)
    }

    async fn find_identity_by_email(&self, email: &str) -> Result<Option<Identity>, AppError> {
        let identity = sqlx::query_as::<_, Identity>(&format!(
            "SELECT {} FROM identities WHERE email = $1",
            IDENTITY_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(identity)
    }

    async fn increment_token_version(&self, id: Uuid) -> Result<Option<i32>, AppError> {
        let version = sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE identities
            SET token_version = token_version + 1
            WHERE id = $1
            RETURNING token_version
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(version)
    }

    async fn record_failed_login(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        threshold: i32,
        lock_until: DateTime<Utc>,
    ) -> Result<(), AppError> {
        // All SET expressions read the pre-update row
        sqlx::query(
            r#"
            UPDATE identities
            SET failed_login_attempts = CASE
                    WHEN locked_until IS NOT NULL AND locked_until <= $2 THEN 1
                    ELSE failed_login_attempts + 1
                END,
                locked_until = CASE
                    WHEN (CASE
                            WHEN locked_until IS NOT NULL AND locked_until <= $2 THEN 1
                            ELSE failed_login_attempts + 1
                          END) >= $3 THEN $4
                    WHEN locked_until IS NOT NULL AND locked_until <= $2 THEN NULL
                    ELSE locked_until
                END,
                last_failed_login_at = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(at)
        .bind(threshold)
        .bind(lock_until)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn reset_failed_logins(&self, id: Uuid) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE identities
            SET failed_login_attempts = 0, locked_until = NULL, last_failed_login_at = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_identity(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM identities WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl RefreshTokenStore for PgStore {
    async fn insert_refresh_token(
        &self,
        token: &NewRefreshToken,
    ) -> Result<RefreshTokenRecord, AppError> {
        sqlx::query_as::<_, RefreshTokenRecord>(&format!(
            r#"
            INSERT INTO refresh_tokens (id, identity_id, secret_hash, parent_id, issued_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            REFRESH_TOKEN_COLUMNS
        ))
        .bind(token.id)
        .bind(token.identity_id)
        .bind(&token.secret_hash)
        .bind(token.parent_id)
        .bind(token.issued_at)
        .bind(token.expires_at)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            DatabaseError::InvariantViolation("refresh token insert returned no row".to_string())
                .into()
        })
    }

    async fn find_active_refresh_token(
        &self,
        secret_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshTokenRecord>, AppError> {
        let record = sqlx::query_as::<_, RefreshTokenRecord>(&format!(
            r#"
            SELECT {}
            FROM refresh_tokens
            WHERE secret_hash = $1 AND revoked_at IS NULL AND expires_at > $2
            "#,
            REFRESH_TOKEN_COLUMNS
        ))
        .bind(secret_hash)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn find_refresh_token(
        &self,
        secret_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, AppError> {
        let record = sqlx::query_as::<_, RefreshTokenRecord>(&format!(
            "SELECT {} FROM refresh_tokens WHERE secret_hash = $1",
            REFRESH_TOKEN_COLUMNS
        ))
        .bind(secret_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn rotate_refresh_token(
        &self,
        current_id: Uuid,
        successor: &NewRefreshToken,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshTokenRecord>, AppError> {
        // Dropping `tx` on any early return (error or cancellation) rolls back
        let mut tx = self.pool.begin().await?;

        let revoked = sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE refresh_tokens
            SET revoked_at = $1
            WHERE id = $2 AND identity_id = $3 AND revoked_at IS NULL AND expires_at > $1
            RETURNING id
            "#,
        )
        .bind(now)
        .bind(current_id)
        .bind(successor.identity_id)
        .fetch_optional(&mut *tx)
        .await?;

        if revoked.is_none() {
            tx.rollback().await?;
            return Ok(None);
        }

        let record = sqlx::query_as::<_, RefreshTokenRecord>(&format!(
            r#"
            INSERT INTO refresh_tokens (id, identity_id, secret_hash, parent_id, issued_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            REFRESH_TOKEN_COLUMNS
        ))
        .bind(successor.id)
        .bind(successor.identity_id)
        .bind(&successor.secret_hash)
        .bind(successor.parent_id)
        .bind(successor.issued_at)
        .bind(successor.expires_at)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| {
            DatabaseError::InvariantViolation(
                "successor refresh token insert returned no row".to_string(),
            )
        })?;

        tx.commit().await?;

        Ok(Some(record))
    }

    async fn revoke_refresh_token(
        &self,
        secret_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshTokenRecord>, AppError> {
        let record = sqlx::query_as::<_, RefreshTokenRecord>(&format!(
            r#"
            UPDATE refresh_tokens
            SET revoked_at = $1
            WHERE secret_hash = $2 AND revoked_at IS NULL
            RETURNING {}
            "#,
            REFRESH_TOKEN_COLUMNS
        ))
        .bind(now)
        .bind(secret_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn delete_refresh_tokens_for_identity(
        &self,
        identity_id: Uuid,
    ) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE identity_id = $1")
            .bind(identity_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
