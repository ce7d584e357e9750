// src/db.rs

use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};

use crate::error::AppError;
use crate::models::{GeneratedImage, GenerationJob, PaymentTransaction, User};

/// Opens the pool and applies pending migrations.
pub async fn connect(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    sqlx::migrate!().run(&pool).await?;
    Ok(pool)
}

pub(crate) const USER_COLUMNS: &str = r#"id, email, username, password_hash, credits,
    subscription_plan, subscription_status, subscription_period_start, subscription_period_end,
    monthly_credits_used, monthly_reset_date, created_at"#;

pub(crate) const JOB_COLUMNS: &str = r#"id, user_id, prompt, negative_prompt, width, height,
    status, images, error_message, created_at, completed_at"#;

pub(crate) const TRANSACTION_COLUMNS: &str = r#"id, user_id, session_id, amount_cents, currency,
    status, payment_status, subscription_plan, metadata, created_at, updated_at"#;

pub(crate) fn user_from_row(r: &PgRow) -> Result<User, AppError> {
    Ok(User {
        id: r.get("id"),
        email: r.get("email"),
        username: r.get("username"),
        password_hash: r.get("password_hash"),
        credits: r.get("credits"),
        subscription_plan: r.get::<String, _>("subscription_plan").parse()?,
        subscription_status: r.get::<String, _>("subscription_status").parse()?,
        subscription_period_start: r.get("subscription_period_start"),
        subscription_period_end: r.get("subscription_period_end"),
        monthly_credits_used: r.get("monthly_credits_used"),
        monthly_reset_date: r.get("monthly_reset_date"),
        created_at: r.get("created_at"),
    })
}

pub(crate) fn job_from_row(r: &PgRow) -> Result<GenerationJob, AppError> {
    let images: serde_json::Value = r.get("images");
    let images: Vec<GeneratedImage> = serde_json::from_value(images)
        .map_err(|e| AppError::Internal(format!("corrupt images column: {e}")))?;

    Ok(GenerationJob {
        id: r.get("id"),
        user_id: r.get("user_id"),
        prompt: r.get("prompt"),
        negative_prompt: r.get("negative_prompt"),
        width: r.get("width"),
        height: r.get("height"),
        status: r.get::<String, _>("status").parse()?,
        images_count: images.len(),
        images,
        error_message: r.get("error_message"),
        created_at: r.get("created_at"),
        completed_at: r.get("completed_at"),
    })
}

pub(crate) fn transaction_from_row(r: &PgRow) -> Result<PaymentTransaction, AppError> {
    Ok(PaymentTransaction {
        id: r.get("id"),
        user_id: r.get("user_id"),
        session_id: r.get("session_id"),
        amount_cents: r.get("amount_cents"),
        currency: r.get("currency"),
        status: r.get::<String, _>("status").parse()?,
        payment_status: r.get::<String, _>("payment_status").parse()?,
        subscription_plan: r.get::<String, _>("subscription_plan").parse()?,
        metadata: r.get("metadata"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    })
}

/// True for a Postgres unique-constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}
