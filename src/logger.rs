use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage,
};
use futures::future::LocalBoxFuture;
use log::info;
use std::rc::Rc;
use std::time::Instant;

use crate::auth::AuthenticatedIdentity;

/// Request/response logging middleware
///
/// Query strings under `/auth` are never logged since they may carry
/// credentials. The authenticated identity, when the JWT middleware set
/// one, is included in the completion line.
pub struct LoggerMiddleware;

impl<S, B> Transform<S, ServiceRequest> for LoggerMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = LoggerMiddlewareService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(LoggerMiddlewareService {
            service: Rc::new(service),
        }))
    }
}

pub struct LoggerMiddlewareService<S> {
    service: Rc<S>,
}

fn loggable_query(path: &str, query: &str) -> Option<String> {
    if query.is_empty() || path.starts_with("/auth") {
        None
    } else {
        Some(query.to_string())
    }
}

impl<S, B> Service<ServiceRequest> for LoggerMiddlewareService<S>
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
        let start_time = Instant::now();
        let method = req.method().to_string();
        let path = req.path().to_string();

        info!("Request started: {} {}", method, path);
        if let Some(query) = loggable_query(&path, req.query_string()) {
            info!("Query string: {}", query);
        }

        let service = self.service.clone();

        Box::pin(async move {
            let res = service.call(req).await?;

            let elapsed = start_time.elapsed();
            let status = res.status();
            let identity = res
                .request()
                .extensions()
                .get::<AuthenticatedIdentity>()
                .map(|identity| identity.id.to_string())
                .unwrap_or_else(|| "-".to_string());

            info!(
                "Request completed: {} {} - Status: {} ({}ms) identity={}",
                method,
                path,
                status.as_u16(),
                elapsed.as_millis(),
                identity
            );

            Ok(res)
        })
    }
}
