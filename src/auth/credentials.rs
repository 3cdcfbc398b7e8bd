/// Credential verification
///
/// Checks an email/password pair against the stored bcrypt hash and keeps
/// the failed-login lockout counters. Every failure the caller can observe
/// is the same `InvalidCredentials`, whether the email is unknown, the
/// password is wrong, or the account is locked.

use chrono::{Duration, Utc};

use crate::auth::claims::AuthenticatedIdentity;
use crate::auth::password::{verify_dummy_password, verify_password, MAX_PASSWORD_LENGTH};
use crate::configuration::LockoutSettings;
use crate::error::{AppError, AuthError, ValidationError};
use crate::store::IdentityStore;
use crate::validators::is_valid_email;

pub async fn verify_credentials(
    identities: &dyn IdentityStore,
    email: &str,
    password: &str,
    lockout: &LockoutSettings,
) -> Result<AuthenticatedIdentity, AppError> {
    let email = is_valid_email(email)?;
    if password.is_empty() {
        return Err(ValidationError::EmptyField("password".to_string()).into());
    }
    if password.len() > MAX_PASSWORD_LENGTH {
        return Err(ValidationError::TooLong("password".to_string(), MAX_PASSWORD_LENGTH).into());
    }

    let identity = match identities.find_identity_by_email(&email).await? {
        Some(identity) => identity,
        None => {
            verify_dummy_password(password);
            tracing::info!("Sign-in attempt for unknown email");
            return Err(AuthError::InvalidCredentials.into());
        }
    };

    let now = Utc::now();
    // Always pay for the bcrypt check, even when locked
    let password_valid = verify_password(password, &identity.password_hash);

    if identity.is_locked(now) {
        tracing::warn!(
            identity_id = %identity.id,
            locked_until = ?identity.locked_until,
            "Sign-in attempt on locked account"
        );
        return Err(AuthError::InvalidCredentials.into());
    }

    if !password_valid {
        identities
            .record_failed_login(
                identity.id,
                now,
                lockout.threshold,
                now + Duration::seconds(lockout.duration_seconds),
            )
            .await?;
        tracing::info!(identity_id = %identity.id, "Sign-in failed: wrong password");
        return Err(AuthError::InvalidCredentials.into());
    }

    if identity.failed_login_attempts > 0
        || identity.locked_until.is_some()
        || identity.last_failed_login_at.is_some()
    {
        identities.reset_failed_logins(identity.id).await?;
    }

    Ok(AuthenticatedIdentity {
        id: identity.id,
        token_version: identity.token_version,
    })
}
