/// Authentication Routes
///
/// Registration, sign-in, refresh token rotation, sign-out, and the
/// session-management endpoints for the current identity.

use actix_web::cookie::{time::Duration as CookieDuration, Cookie, SameSite};
use actix_web::{web, HttpRequest, HttpResponse, HttpResponseBuilder};
use serde::{Deserialize, Serialize};

use crate::auth::{resolve_refresh_token, AuthenticatedIdentity, Authenticator, TokenPair};
use crate::configuration::CookieSettings;
use crate::error::{AppError, ErrorContext, ValidationError};

/// Registration request
#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
}

/// Sign-in request
#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Refresh and sign-out request; the token may also arrive as a cookie
#[derive(Deserialize)]
pub struct RefreshRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Authentication response with access and refresh tokens
#[derive(Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

#[derive(Serialize)]
pub struct IdentityResponse {
    pub id: String,
    pub email: String,
    pub name: String,
    pub created_at: String,
}

#[derive(Serialize)]
pub struct RevokeAllResponse {
    pub revoked: u64,
}

#[derive(Serialize)]
pub struct TokenVersionResponse {
    pub token_version: i32,
}

fn auth_cookie<'c>(
    settings: &CookieSettings,
    name: &str,
    value: &str,
    max_age_seconds: i64,
) -> Cookie<'c> {
    let mut builder = Cookie::build(name.to_string(), value.to_string())
        .http_only(true)
        .secure(settings.secure)
        .same_site(SameSite::Strict)
        .path(settings.path.clone())
        .max_age(CookieDuration::seconds(max_age_seconds));

    if let Some(domain) = &settings.domain {
        builder = builder.domain(domain.clone());
    }
    builder.finish()
}

/// Respond with the token pair in the body and as HTTP-only cookies
fn token_pair_response(
    mut builder: HttpResponseBuilder,
    pair: TokenPair,
    authenticator: &Authenticator,
    cookies: &CookieSettings,
) -> HttpResponse {
    let jwt = authenticator.jwt_settings();

    builder
        .cookie(auth_cookie(
            cookies,
            &cookies.access_token_name,
            &pair.access_token,
            jwt.access_token_expiry,
        ))
        .cookie(auth_cookie(
            cookies,
            &cookies.refresh_token_name,
            &pair.refresh_token,
            jwt.refresh_token_expiry,
        ))
        .json(AuthResponse {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: jwt.access_token_expiry,
        })
}

/// The explicit `refresh_token` argument, if the body carries one
///
/// An empty body means no argument. A body that is not a JSON object with a
/// string `refresh_token` is malformed input, never a reason to fall back to
/// the cookie.
fn refresh_token_argument(body: &[u8]) -> Result<Option<String>, ValidationError> {
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(None);
    }

    serde_json::from_slice::<RefreshRequest>(body)
        .map(|request| request.refresh_token)
        .map_err(|e| {
            tracing::debug!("Malformed refresh request body: {}", e);
            ValidationError::InvalidFormat("refresh_token".to_string())
        })
}

fn presented_refresh_token(
    body: &[u8],
    req: &HttpRequest,
    cookies: &CookieSettings,
) -> Result<String, AppError> {
    let argument = refresh_token_argument(body)?;
    let cookie = req
        .cookie(&cookies.refresh_token_name)
        .map(|c| c.value().to_string());

    Ok(resolve_refresh_token(argument, cookie)?)
}

/// POST /auth/register
///
/// Create an identity and return its first token pair.
///
/// # Errors
/// - 400: invalid email, name or weak password
/// - 409: email already registered
pub async fn register(
    form: web::Json<RegisterRequest>,
    authenticator: web::Data<Authenticator>,
    cookies: web::Data<CookieSettings>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("identity_registration");

    let (identity, pair) = authenticator
        .register(&form.email, &form.name, &form.password)
        .await
        .map_err(|e| {
            context.log_error(&e);
            e
        })?;

    tracing::info!(
        request_id = %context.request_id,
        identity_id = %identity.id,
        "Identity registered"
    );

    Ok(token_pair_response(
        HttpResponse::Created(),
        pair,
        &authenticator,
        &cookies,
    ))
}

/// POST /auth/login
///
/// Unknown email, wrong password and locked account all produce the same
/// 401 body.
pub async fn login(
    form: web::Json<LoginRequest>,
    authenticator: web::Data<Authenticator>,
    cookies: web::Data<CookieSettings>,
) -> Result<HttpResponse, AppError> {
    let pair = authenticator.sign_in(&form.email, &form.password).await?;

    Ok(token_pair_response(HttpResponse::Ok(), pair, &authenticator, &cookies))
}

/// POST /auth/refresh
///
/// Rotate the presented refresh token. The body's `refresh_token` wins over
/// the cookie.
///
/// # Errors
/// - 400: malformed body, empty or oversized token
/// - 401: missing, unknown, expired, revoked, or already rotated token
pub async fn refresh(
    req: HttpRequest,
    body: web::Bytes,
    authenticator: web::Data<Authenticator>,
    cookies: web::Data<CookieSettings>,
) -> Result<HttpResponse, AppError> {
    let presented = presented_refresh_token(&body, &req, &cookies)?;
    let pair = authenticator.refresh(&presented).await?;

    Ok(token_pair_response(HttpResponse::Ok(), pair, &authenticator, &cookies))
}

/// POST /auth/logout
///
/// Revoke the presented refresh token and clear both cookies. Signing out
/// with an already revoked token still succeeds.
pub async fn logout(
    req: HttpRequest,
    body: web::Bytes,
    authenticator: web::Data<Authenticator>,
    cookies: web::Data<CookieSettings>,
) -> Result<HttpResponse, AppError> {
    let presented = presented_refresh_token(&body, &req, &cookies)?;
    authenticator.sign_out(&presented).await?;

    Ok(HttpResponse::NoContent()
        .cookie(auth_cookie(&cookies, &cookies.access_token_name, "", 0))
        .cookie(auth_cookie(&cookies, &cookies.refresh_token_name, "", 0))
        .finish())
}

/// GET /api/me
pub async fn get_current_identity(
    identity: web::ReqData<AuthenticatedIdentity>,
    authenticator: web::Data<Authenticator>,
) -> Result<HttpResponse, AppError> {
    let identity = authenticator.get_identity(identity.id).await?;

    Ok(HttpResponse::Ok().json(IdentityResponse {
        id: identity.id.to_string(),
        email: identity.email,
        name: identity.name,
        created_at: identity.created_at.to_rfc3339(),
    }))
}

/// DELETE /api/me
///
/// Deletes the identity after explicitly invalidating all of its refresh
/// tokens.
pub async fn delete_account(
    identity: web::ReqData<AuthenticatedIdentity>,
    authenticator: web::Data<Authenticator>,
    cookies: web::Data<CookieSettings>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("identity_deletion").with_identity_id(identity.id);

    authenticator.delete_identity(identity.id).await.map_err(|e| {
        context.log_error(&e);
        e
    })?;

    Ok(HttpResponse::NoContent()
        .cookie(auth_cookie(&cookies, &cookies.access_token_name, "", 0))
        .cookie(auth_cookie(&cookies, &cookies.refresh_token_name, "", 0))
        .finish())
}

/// POST /api/sessions/revoke-all
pub async fn revoke_all_sessions(
    identity: web::ReqData<AuthenticatedIdentity>,
    authenticator: web::Data<Authenticator>,
) -> Result<HttpResponse, AppError> {
    let revoked = authenticator.revoke_all_sessions(identity.id).await?;

    Ok(HttpResponse::Ok().json(RevokeAllResponse { revoked }))
}

/// POST /api/token-version/bump
///
/// Every access token issued before this call, including the one used to
/// make it, stops verifying.
pub async fn bump_token_version(
    identity: web::ReqData<AuthenticatedIdentity>,
    authenticator: web::Data<Authenticator>,
) -> Result<HttpResponse, AppError> {
    let token_version = authenticator.bump_token_version(identity.id).await?;

    Ok(HttpResponse::Ok().json(TokenVersionResponse { token_version }))
}
