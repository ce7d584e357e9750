// src/api/subscriptions.rs

use actix_web::web::ReqData;
use actix_web::{get, post, web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::billing::{self, CheckoutStarted};
use crate::error::AppError;
use crate::AppState;

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CheckoutQuery {
    pub plan_id: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SubscriptionStatusResponse {
    pub payment_status: String,
    pub status: String,
    /// Major currency units.
    pub amount: f64,
    pub currency: String,
}

#[utoipa::path(
    get,
    path = "/api/subscription/plans",
    tag = "subscriptions",
    responses((status = 200, description = "Plan catalog keyed by plan id"))
)]
#[get("/api/subscription/plans")]
pub async fn list_plans() -> HttpResponse {
    HttpResponse::Ok().json(billing::catalog())
}

#[utoipa::path(
    post,
    path = "/api/subscription/checkout",
    tag = "subscriptions",
    params(CheckoutQuery),
    responses(
        (status = 200, description = "Success", body = CheckoutStarted),
        (status = 400, description = "Unknown plan"),
        (status = 502, description = "Payment provider unavailable")
    ),
    security(("bearer" = []))
)]
#[post("/subscription/checkout")]
pub async fn create_checkout(
    user_id: ReqData<Uuid>,
    state: web::Data<AppState>,
    query: web::Query<CheckoutQuery>,
    req: HttpRequest,
) -> Result<HttpResponse, AppError> {
    let origin = {
        let info = req.connection_info();
        format!("{}://{}", info.scheme(), info.host())
    };

    let started = state
        .reconciler
        .start_checkout(user_id.into_inner(), &query.plan_id, &origin)
        .await?;
    Ok(HttpResponse::Ok().json(started))
}

#[utoipa::path(
    get,
    path = "/api/subscription/status/{session_id}",
    tag = "subscriptions",
    params(("session_id" = String, Path, description = "Checkout session id")),
    responses(
        (status = 200, description = "Success", body = SubscriptionStatusResponse),
        (status = 404, description = "Unknown session for this user")
    ),
    security(("bearer" = []))
)]
#[get("/subscription/status/{session_id}")]
pub async fn subscription_status(
    user_id: ReqData<Uuid>,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let session_id = path.into_inner();
    let (status, outcome) = state
        .reconciler
        .poll_status(user_id.into_inner(), &session_id)
        .await?;
    log::debug!("status poll session_id={session_id} outcome={outcome:?}");

    Ok(HttpResponse::Ok().json(SubscriptionStatusResponse {
        payment_status: status.payment_status,
        status: status.status,
        amount: status.amount_total as f64 / 100.0,
        currency: status.currency,
    }))
}
