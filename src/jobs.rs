// src/jobs.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::{JOB_COLUMNS, job_from_row};
use crate::error::AppError;
use crate::models::{GeneratedImage, GenerationJob, NewJob};

pub const MIN_DIMENSION: i32 = 512;
pub const MAX_DIMENSION: i32 = 2048;
pub const DEFAULT_DIMENSION: i32 = 1024;

/// Upper bound for the completed-jobs listing.
pub const MAX_LISTED_JOBS: i64 = 50;

/// The only failure text a user ever sees on a job.
pub const GENERIC_FAILURE_MESSAGE: &str = "Image generation failed. Please try again.";

pub fn validate_dimensions(width: i32, height: i32) -> Result<(), AppError> {
    for (name, value) in [("width", width), ("height", height)] {
        if !(MIN_DIMENSION..=MAX_DIMENSION).contains(&value) {
            return Err(AppError::Validation(format!(
                "{name} must be between {MIN_DIMENSION} and {MAX_DIMENSION}, got {value}"
            )));
        }
    }
    Ok(())
}

/// Lifecycle records of generation jobs. A job leaves `processing` exactly once;
/// `complete` and `fail` on a terminal job return `InvalidTransition`.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: NewJob) -> Result<GenerationJob, AppError>;

    async fn complete(&self, job_id: Uuid, images: &[GeneratedImage]) -> Result<(), AppError>;

    async fn fail(&self, job_id: Uuid, reason: &str) -> Result<(), AppError>;

    /// Returns the job only to its owner, `NotFound` for anyone else.
    async fn get(&self, job_id: Uuid, user_id: Uuid) -> Result<GenerationJob, AppError>;

    /// Newest first.
    async fn list_completed(&self, user_id: Uuid, limit: i64) -> Result<Vec<GenerationJob>, AppError>;

    /// Jobs still `processing` that were created before `cutoff`, oldest first.
    async fn list_stale(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<GenerationJob>, AppError>;
}

#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Explains why a guarded transition touched no row.
    async fn rejected_transition(&self, job_id: Uuid) -> Result<(), AppError> {
        let row = sqlx::query("SELECT status FROM generation_jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(_) => Err(AppError::InvalidTransition { job_id }),
            None => Err(AppError::NotFound("job")),
        }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, job: NewJob) -> Result<GenerationJob, AppError> {
        validate_dimensions(job.width, job.height)?;

        let sql = format!(
            r#"INSERT INTO generation_jobs (id, user_id, prompt, negative_prompt, width, height, status)
               VALUES ($1, $2, $3, $4, $5, $6, 'processing')
               RETURNING {JOB_COLUMNS}"#
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(job.user_id)
            .bind(&job.prompt)
            .bind(job.negative_prompt.as_deref())
            .bind(job.width)
            .bind(job.height)
            .fetch_one(&self.pool)
            .await?;

        job_from_row(&row)
    }

    async fn complete(&self, job_id: Uuid, images: &[GeneratedImage]) -> Result<(), AppError> {
        let images = serde_json::to_value(images)
            .map_err(|e| AppError::Internal(format!("serialize images: {e}")))?;

        let result = sqlx::query(
            r#"UPDATE generation_jobs
               SET status = 'completed', images = $2, completed_at = NOW()
               WHERE id = $1 AND status = 'processing'"#,
        )
        .bind(job_id)
        .bind(images)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return self.rejected_transition(job_id).await;
        }
        Ok(())
    }

    async fn fail(&self, job_id: Uuid, reason: &str) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"UPDATE generation_jobs
               SET status = 'failed', error_message = $2, completed_at = NOW()
               WHERE id = $1 AND status = 'processing'"#,
        )
        .bind(job_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return self.rejected_transition(job_id).await;
        }
        Ok(())
    }

    async fn get(&self, job_id: Uuid, user_id: Uuid) -> Result<GenerationJob, AppError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM generation_jobs WHERE id = $1 AND user_id = $2");
        let row = sqlx::query(&sql)
            .bind(job_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::NotFound("job"))?;

        job_from_row(&row)
    }

    async fn list_completed(&self, user_id: Uuid, limit: i64) -> Result<Vec<GenerationJob>, AppError> {
        let sql = format!(
            r#"SELECT {JOB_COLUMNS} FROM generation_jobs
               WHERE user_id = $1 AND status = 'completed'
               ORDER BY created_at DESC
               LIMIT $2"#
        );
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .bind(limit.clamp(1, MAX_LISTED_JOBS))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(job_from_row).collect()
    }

    async fn list_stale(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<GenerationJob>, AppError> {
        let sql = format!(
            r#"SELECT {JOB_COLUMNS} FROM generation_jobs
               WHERE status = 'processing' AND created_at < $1
               ORDER BY created_at ASC
               LIMIT $2"#
        );
        let rows = sqlx::query(&sql)
            .bind(cutoff)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(job_from_row).collect()
    }
}
