use actix_web::dev::Server;
use actix_web::{middleware::Logger, web, App, HttpServer};
use std::net::TcpListener;

use crate::auth::Authenticator;
use crate::configuration::CookieSettings;
use crate::logger::LoggerMiddleware;
use crate::middleware::JwtMiddleware;
use crate::routes::{
    bump_token_version, delete_account, get_current_identity, health_check, login, logout,
    refresh, register, revoke_all_sessions,
};

pub fn run(
    listener: TcpListener,
    authenticator: Authenticator,
    cookie_settings: CookieSettings,
) -> Result<Server, std::io::Error> {
    let access_cookie_name = cookie_settings.access_token_name.clone();
    let authenticator_data = web::Data::new(authenticator.clone());
    let cookie_data = web::Data::new(cookie_settings);

    let server = HttpServer::new(move || {
        App::new()
            // Global middleware
            .wrap(Logger::default())
            .wrap(LoggerMiddleware)

            // Shared state
            .app_data(authenticator_data.clone())
            .app_data(cookie_data.clone())

            // Public routes
            .route("/health_check", web::get().to(health_check))
            .route("/auth/register", web::post().to(register))
            .route("/auth/login", web::post().to(login))
            .route("/auth/refresh", web::post().to(refresh))
            .route("/auth/logout", web::post().to(logout))

            // Protected routes (require a valid access token)
            .service(
                web::scope("/api")
                    .wrap(JwtMiddleware::new(authenticator.clone(), access_cookie_name.clone()))
                    .route("/me", web::get().to(get_current_identity))
                    .route("/me", web::delete().to(delete_account))
                    .route("/sessions/revoke-all", web::post().to(revoke_all_sessions))
                    .route("/token-version/bump", web::post().to(bump_token_version)),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}
