/// JWT Authentication Middleware
///
/// Reads the access token from the `Authorization: Bearer` header, falling
/// back to the access token cookie, verifies it against the identity's
/// current token version, and injects the `AuthenticatedIdentity` into
/// request extensions for route handlers.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage,
};
use futures::future::LocalBoxFuture;
use std::rc::Rc;

use crate::auth::Authenticator;
use crate::error::{AppError, AuthError};

/// JWT middleware for protecting routes
pub struct JwtMiddleware {
    authenticator: Authenticator,
    cookie_name: String,
}

impl JwtMiddleware {
    pub fn new(authenticator: Authenticator, cookie_name: impl Into<String>) -> Self {
        Self {
            authenticator,
            cookie_name: cookie_name.into(),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for JwtMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = JwtMiddlewareService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(JwtMiddlewareService {
            service: Rc::new(service),
            authenticator: self.authenticator.clone(),
            cookie_name: self.cookie_name.clone(),
        }))
    }
}

pub struct JwtMiddlewareService<S> {
    service: Rc<S>,
    authenticator: Authenticator,
    cookie_name: String,
}

/// Bearer header first, then the cookie
fn extract_access_token(req: &ServiceRequest, cookie_name: &str) -> Option<String> {
    let bearer = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty());

    bearer.or_else(|| req.cookie(cookie_name).map(|c| c.value().to_string()))
}

impl<S, B> Service<ServiceRequest> for JwtMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let token = extract_access_token(&req, &self.cookie_name);
        let authenticator = self.authenticator.clone();
        let service = self.service.clone();

        Box::pin(async move {
            let token = match token {
                Some(token) => token,
                None => {
                    tracing::warn!(path = %req.path(), "Missing access token");
                    return Err(AppError::from(AuthError::MissingToken).into());
                }
            };

            match authenticator.verify_access_token(&token).await {
                Ok(identity) => {
                    tracing::debug!(
                        identity_id = %identity.id,
                        token_version = identity.token_version,
                        "Access token verified"
                    );
                    req.extensions_mut().insert(identity);
                    service.call(req).await
                }
                Err(e) => {
                    tracing::warn!(error = %e, path = %req.path(), "Access token rejected");
                    Err(e.into())
                }
            }
        })
    }
}
