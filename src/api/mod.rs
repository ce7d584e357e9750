pub mod auth;
pub mod generation;
pub mod health;
pub mod subscriptions;
pub mod webhooks;

use actix_web::web;

/// Mounts every route. Public resources are registered before the
/// `/api` scope so they match first and skip the JWT check.
pub fn configure(cfg: &mut web::ServiceConfig, jwt_secret: &str) {
    cfg.service(health::health)
        .service(auth::register)
        .service(auth::login)
        .service(subscriptions::list_plans)
        .service(webhooks::stripe_webhook)
        .service(
            web::scope("/api")
                .wrap(auth::JwtMiddleware::new(jwt_secret))
                .service(auth::me)
                .service(generation::generate_image)
                .service(generation::image_status)
                .service(generation::user_images)
                .service(subscriptions::create_checkout)
                .service(subscriptions::subscription_status),
        );
}
