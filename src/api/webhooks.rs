// src/api/webhooks.rs

use actix_web::{post, web, HttpRequest, HttpResponse};
use serde_json::json;

use crate::error::AppError;
use crate::AppState;

const SIGNATURE_HEADER: &str = "Stripe-Signature";

/// Raw body is required: the signature covers the exact bytes received.
#[utoipa::path(
    post,
    path = "/api/webhook/stripe",
    tag = "webhooks",
    request_body(content = String, description = "Stripe event JSON", content_type = "application/json"),
    responses(
        (status = 200, description = "Event accepted"),
        (status = 400, description = "Signature verification failed")
    )
)]
#[post("/api/webhook/stripe")]
pub async fn stripe_webhook(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let signature = req
        .headers()
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let outcome = state.reconciler.handle_webhook(&body, signature).await?;
    log::info!("stripe webhook handled: {outcome:?}");

    Ok(HttpResponse::Ok().json(json!({ "status": "success" })))
}
