use actix_web::{get, HttpResponse};
use serde_json::json;

pub const SERVICE_NAME: &str = "produktai";

#[utoipa::path(get, path = "/api/health", tag = "health", responses((status = 200, description = "Service is up")))]
#[get("/api/health")]
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "healthy", "service": SERVICE_NAME }))
}
