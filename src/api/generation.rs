// src/api/generation.rs

use actix_web::web::ReqData;
use actix_web::{get, post, web, HttpResponse};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::AppError;
use crate::jobs::{DEFAULT_DIMENSION, MAX_LISTED_JOBS};
use crate::models::{GenerationJob, JobStatus};
use crate::orchestrator::GenerateParams;
use crate::AppState;

fn default_dimension() -> i32 {
    DEFAULT_DIMENSION
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct GenerateImageRequest {
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: Option<String>,
    #[serde(default = "default_dimension")]
    pub width: i32,
    #[serde(default = "default_dimension")]
    pub height: i32,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct GenerateImageResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub images_count: u32,
    pub message: String,
}

#[utoipa::path(
    post,
    path = "/api/generate-image",
    tag = "generation",
    request_body = GenerateImageRequest,
    responses(
        (status = 200, description = "Success", body = GenerateImageResponse),
        (status = 400, description = "Blank prompt or dimensions out of range"),
        (status = 403, description = "Not enough credits")
    ),
    security(("bearer" = []))
)]
#[post("/generate-image")]
pub async fn generate_image(
    user_id: ReqData<Uuid>,
    state: web::Data<AppState>,
    payload: web::Json<GenerateImageRequest>,
) -> Result<HttpResponse, AppError> {
    let user_id = user_id.into_inner();
    let body = payload.into_inner();

    let ticket = state
        .orchestrator
        .submit(
            user_id,
            GenerateParams {
                prompt: body.prompt,
                negative_prompt: body.negative_prompt,
                width: body.width,
                height: body.height,
            },
        )
        .await?;

    Ok(HttpResponse::Ok().json(GenerateImageResponse {
        job_id: ticket.job_id,
        status: ticket.status,
        images_count: ticket.images_count,
        message: format!(
            "Generating {} images. This may take a minute.",
            ticket.images_count
        ),
    }))
}

#[utoipa::path(
    get,
    path = "/api/image-status/{job_id}",
    tag = "generation",
    params(("job_id" = Uuid, Path, description = "Job id returned by generate-image")),
    responses(
        (status = 200, description = "Success", body = GenerationJob),
        (status = 404, description = "No such job for this user")
    ),
    security(("bearer" = []))
)]
#[get("/image-status/{job_id}")]
pub async fn image_status(
    user_id: ReqData<Uuid>,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let job = state
        .jobs
        .get(path.into_inner(), user_id.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(job))
}

#[utoipa::path(
    get,
    path = "/api/user/images",
    tag = "generation",
    responses((status = 200, description = "Success", body = [GenerationJob])),
    security(("bearer" = []))
)]
#[get("/user/images")]
pub async fn user_images(
    user_id: ReqData<Uuid>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let jobs = state
        .jobs
        .list_completed(user_id.into_inner(), MAX_LISTED_JOBS)
        .await?;
    Ok(HttpResponse::Ok().json(jobs))
}
