use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::api::health::health,
        crate::api::auth::register,
        crate::api::auth::login,
        crate::api::auth::me,
        crate::api::generation::generate_image,
        crate::api::generation::image_status,
        crate::api::generation::user_images,
        crate::api::subscriptions::list_plans,
        crate::api::subscriptions::create_checkout,
        crate::api::subscriptions::subscription_status,
        crate::api::webhooks::stripe_webhook
    ),
    components(
        schemas(
            crate::api::auth::RegisterRequest,
            crate::api::auth::LoginRequest,
            crate::api::auth::TokenResponse,
            crate::api::auth::UserProfile,
            crate::api::generation::GenerateImageRequest,
            crate::api::generation::GenerateImageResponse,
            crate::api::subscriptions::SubscriptionStatusResponse,
            crate::billing::PlanInfo,
            crate::billing::CheckoutStarted,
            crate::models::GenerationJob,
            crate::models::GeneratedImage,
            crate::models::JobStatus,
            crate::models::SubscriptionPlan,
            crate::models::SubscriptionStatus
        )
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "auth", description = "Registration, login and profile"),
        (name = "generation", description = "Product image generation jobs"),
        (name = "subscriptions", description = "Plans and Stripe checkout"),
        (name = "webhooks", description = "Callbacks from Stripe"),
        (name = "health", description = "Liveness")
    )
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}
