/// Authenticator
///
/// Shared entry point for the HTTP layer. Owns the stores and settings,
/// and runs every operation under the configured store timeout. A timed-out
/// operation is dropped mid-flight; any open transaction is rolled back with it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::auth::claims::AuthenticatedIdentity;
use crate::auth::credentials::verify_credentials;
use crate::auth::invalidation::{
    bump_token_version, invalidate_all, on_identity_deleted, revoke_refresh_token,
};
use crate::auth::jwt::{generate_access_token, verify_access_token};
use crate::auth::password::hash_password;
use crate::auth::refresh_token::issue_refresh_token;
use crate::auth::rotation::{rotate_refresh_token, TokenPair};
use crate::configuration::{JwtSettings, LockoutSettings, Settings};
use crate::error::{AppError, DatabaseError};
use crate::store::{Identity, IdentityStore, NewIdentity, RefreshTokenStore};
use crate::validators::{is_valid_email, is_valid_name};

#[derive(Clone)]
pub struct Authenticator {
    identities: Arc<dyn IdentityStore>,
    tokens: Arc<dyn RefreshTokenStore>,
    jwt: JwtSettings,
    lockout: LockoutSettings,
    store_timeout: Duration,
}

impl Authenticator {
    pub fn new<S>(
        store: S,
        jwt: JwtSettings,
        lockout: LockoutSettings,
        store_timeout: Duration,
    ) -> Self
    where
        S: IdentityStore + RefreshTokenStore + 'static,
    {
        let store = Arc::new(store);
        Self {
            identities: store.clone(),
            tokens: store,
            jwt,
            lockout,
            store_timeout,
        }
    }

    pub fn from_settings<S>(store: S, settings: &Settings) -> Self
    where
        S: IdentityStore + RefreshTokenStore + 'static,
    {
        Self::new(
            store,
            settings.jwt.clone(),
            settings.lockout.clone(),
            settings.store.timeout(),
        )
    }

    pub fn jwt_settings(&self) -> &JwtSettings {
        &self.jwt
    }

    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        match tokio::time::timeout(self.store_timeout, fut).await {
            Ok(result) => result,
            Err(elapsed) => {
                tracing::error!(
                    operation,
                    timeout_ms = self.store_timeout.as_millis() as u64,
                    "Store operation timed out"
                );
                Err(elapsed.into())
            }
        }
    }

    async fn issue_token_pair(&self, identity: AuthenticatedIdentity) -> Result<TokenPair, AppError> {
        let access_token = generate_access_token(&identity.id, identity.token_version, &self.jwt)?;
        let refresh_token =
            issue_refresh_token(self.tokens.as_ref(), identity.id, self.jwt.refresh_token_expiry)
                .await?;

        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }

    /// Create an identity and sign it in
    pub async fn register(
        &self,
        email: &str,
        name: &str,
        password: &str,
    ) -> Result<(Identity, TokenPair), AppError> {
        let email = is_valid_email(email)?;
        let name = is_valid_name(name)?;
        let password_hash = hash_password(password)?;

        self.bounded("register", async {
            let identity = self
                .identities
                .insert_identity(&NewIdentity {
                    id: Uuid::new_v4(),
                    email,
                    name,
                    password_hash,
                })
                .await?;
            let pair = self
                .issue_token_pair(AuthenticatedIdentity {
                    id: identity.id,
                    token_version: identity.token_version,
                })
                .await?;
            Ok((identity, pair))
        })
        .await
    }

    /// Verify credentials and issue the initial token pair
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<TokenPair, AppError> {
        self.bounded("sign_in", async {
            let identity =
                verify_credentials(self.identities.as_ref(), email, password, &self.lockout).await?;
            let pair = self.issue_token_pair(identity).await?;

            tracing::info!(identity_id = %identity.id, "Identity signed in");
            Ok(pair)
        })
        .await
    }

    pub async fn refresh(&self, presented: &str) -> Result<TokenPair, AppError> {
        self.bounded(
            "refresh",
            rotate_refresh_token(self.identities.as_ref(), self.tokens.as_ref(), &self.jwt, presented),
        )
        .await
    }

    pub async fn sign_out(&self, presented: &str) -> Result<(), AppError> {
        self.bounded("sign_out", revoke_refresh_token(self.tokens.as_ref(), presented))
            .await
    }

    pub async fn verify_access_token(&self, token: &str) -> Result<AuthenticatedIdentity, AppError> {
        self.bounded(
            "verify_access_token",
            verify_access_token(self.identities.as_ref(), token, &self.jwt),
        )
        .await
    }

    /// `getIdentity` for the account collaborator
    pub async fn get_identity(&self, identity_id: Uuid) -> Result<Identity, AppError> {
        self.bounded("get_identity", async {
            self.identities
                .find_identity(identity_id)
                .await?
                .ok_or_else(|| DatabaseError::NotFound("Identity not found".to_string()).into())
        })
        .await
    }

    pub async fn revoke_all_sessions(&self, identity_id: Uuid) -> Result<u64, AppError> {
        self.bounded("revoke_all_sessions", invalidate_all(self.tokens.as_ref(), identity_id))
            .await
    }

    pub async fn bump_token_version(&self, identity_id: Uuid) -> Result<i32, AppError> {
        self.bounded(
            "bump_token_version",
            bump_token_version(self.identities.as_ref(), identity_id),
        )
        .await
    }

    pub async fn delete_identity(&self, identity_id: Uuid) -> Result<bool, AppError> {
        self.bounded(
            "delete_identity",
            on_identity_deleted(self.identities.as_ref(), self.tokens.as_ref(), identity_id),
        )
        .await
    }
}
