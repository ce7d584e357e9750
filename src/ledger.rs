// src/ledger.rs

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::SubscriptionPlan;

/// Length of the monthly usage window.
pub const USAGE_PERIOD_DAYS: i64 = 30;

/// Everything `set_plan` writes onto an account when a subscription is activated.
#[derive(Debug, Clone)]
pub struct PlanGrant {
    pub plan: SubscriptionPlan,
    pub monthly_credits: i32,
    pub period: Duration,
    pub now: DateTime<Utc>,
}

/// Owner of every balance mutation. Each method is a single atomic update of the
/// user row; no implementation may read the balance and write it back separately.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Current balance. Informational only, debits do their own check.
    async fn balance(&self, user_id: Uuid) -> Result<i32, AppError>;

    /// Takes `amount` credits if and only if the balance covers it. Returns the new balance.
    async fn debit(&self, user_id: Uuid, amount: i32) -> Result<i32, AppError>;

    /// Adds `amount` credits (refunds and top-ups). Returns the new balance.
    async fn credit(&self, user_id: Uuid, amount: i32) -> Result<i32, AppError>;

    async fn set_plan(&self, user_id: Uuid, grant: &PlanGrant) -> Result<(), AppError>;

    /// Resets `monthly_credits_used` once the reset date has passed. Returns whether it did.
    async fn roll_usage_period(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<bool, AppError>;
}

pub fn ensure_positive(amount: i32) -> Result<(), AppError> {
    if amount <= 0 {
        return Err(AppError::Validation(format!(
            "credit amount must be positive, got {amount}"
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Ledger for PgLedger {
    async fn balance(&self, user_id: Uuid) -> Result<i32, AppError> {
        let row = sqlx::query("SELECT credits FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::NotFound("user"))?;
        Ok(row.get("credits"))
    }

    async fn debit(&self, user_id: Uuid, amount: i32) -> Result<i32, AppError> {
        ensure_positive(amount)?;

        let row = sqlx::query(
            r#"UPDATE users
               SET credits = credits - $2,
                   monthly_credits_used = monthly_credits_used + $2
               WHERE id = $1 AND credits >= $2
               RETURNING credits"#,
        )
        .bind(user_id)
        .bind(amount)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Ok(row.get("credits"));
        }

        // Guard rejected the update: tell a missing user apart from a short balance.
        let exists: bool = sqlx::query("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1) AS found")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?
            .get("found");
        if exists {
            Err(AppError::InsufficientCredits { required: amount })
        } else {
            Err(AppError::NotFound("user"))
        }
    }

    async fn credit(&self, user_id: Uuid, amount: i32) -> Result<i32, AppError> {
        ensure_positive(amount)?;

        let row = sqlx::query(
            r#"UPDATE users SET credits = credits + $2
               WHERE id = $1
               RETURNING credits"#,
        )
        .bind(user_id)
        .bind(amount)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AppError::NotFound("user"))?;

        Ok(row.get("credits"))
    }

    async fn set_plan(&self, user_id: Uuid, grant: &PlanGrant) -> Result<(), AppError> {
        let period_end = grant.now + grant.period;
        let result = sqlx::query(
            r#"UPDATE users
               SET subscription_plan = $2,
                   subscription_status = 'active',
                   credits = $3,
                   monthly_credits_used = 0,
                   subscription_period_start = $4,
                   subscription_period_end = $5,
                   monthly_reset_date = $5
               WHERE id = $1"#,
        )
        .bind(user_id)
        .bind(grant.plan.as_str())
        .bind(grant.monthly_credits)
        .bind(grant.now)
        .bind(period_end)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("user"));
        }
        Ok(())
    }

    async fn roll_usage_period(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"UPDATE users
               SET monthly_credits_used = 0, monthly_reset_date = $2
               WHERE id = $1 AND (monthly_reset_date IS NULL OR monthly_reset_date <= $3)"#,
        )
        .bind(user_id)
        .bind(now + Duration::days(USAGE_PERIOD_DAYS))
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
