// src/transactions.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::{TRANSACTION_COLUMNS, transaction_from_row};
use crate::error::AppError;
use crate::models::{NewTransaction, PaymentStatus, PaymentTransaction, TransactionStatus};

#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Records a new checkout attempt as `pending` / `unpaid`.
    async fn create(&self, tx: NewTransaction) -> Result<PaymentTransaction, AppError>;

    async fn find_by_session(&self, session_id: &str) -> Result<Option<PaymentTransaction>, AppError>;

    /// Takes the right to apply this payment. Fails while the transaction is paid
    /// or held by a claim newer than `stale_before`.
    async fn claim(&self, session_id: &str, stale_before: DateTime<Utc>) -> Result<bool, AppError>;

    async fn release_claim(&self, session_id: &str) -> Result<(), AppError>;

    /// Flips `unpaid -> paid` and `status -> completed`, dropping any claim. Returns
    /// false when the transaction was already paid, so only one caller ever wins.
    async fn mark_paid(&self, session_id: &str) -> Result<bool, AppError>;

    /// Closes an unpaid transaction without payment. No-op once paid.
    async fn mark_unpaid_outcome(
        &self,
        session_id: &str,
        status: TransactionStatus,
        payment_status: PaymentStatus,
    ) -> Result<bool, AppError>;
}

#[derive(Clone)]
pub struct PgTransactionStore {
    pool: PgPool,
}

impl PgTransactionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionStore for PgTransactionStore {
    async fn create(&self, tx: NewTransaction) -> Result<PaymentTransaction, AppError> {
        let sql = format!(
            r#"INSERT INTO payment_transactions
                   (id, user_id, session_id, amount_cents, currency, status, payment_status,
                    subscription_plan, metadata)
               VALUES ($1, $2, $3, $4, $5, 'pending', 'unpaid', $6, $7)
               RETURNING {TRANSACTION_COLUMNS}"#
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(tx.user_id)
            .bind(&tx.session_id)
            .bind(tx.amount_cents)
            .bind(&tx.currency)
            .bind(tx.subscription_plan.as_str())
            .bind(tx.metadata)
            .fetch_one(&self.pool)
            .await?;

        transaction_from_row(&row)
    }

    async fn find_by_session(&self, session_id: &str) -> Result<Option<PaymentTransaction>, AppError> {
        let sql = format!("SELECT {TRANSACTION_COLUMNS} FROM payment_transactions WHERE session_id = $1");
        let row = sqlx::query(&sql)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(transaction_from_row).transpose()
    }

    async fn claim(&self, session_id: &str, stale_before: DateTime<Utc>) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"UPDATE payment_transactions
               SET claimed_at = NOW()
               WHERE session_id = $1
                 AND payment_status <> 'paid'
                 AND (claimed_at IS NULL OR claimed_at < $2)"#,
        )
        .bind(session_id)
        .bind(stale_before)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn release_claim(&self, session_id: &str) -> Result<(), AppError> {
        sqlx::query("UPDATE payment_transactions SET claimed_at = NULL WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_paid(&self, session_id: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"UPDATE payment_transactions
               SET status = 'completed', payment_status = 'paid', claimed_at = NULL,
                   updated_at = NOW()
               WHERE session_id = $1 AND payment_status <> 'paid'"#,
        )
        .bind(session_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_unpaid_outcome(
        &self,
        session_id: &str,
        status: TransactionStatus,
        payment_status: PaymentStatus,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"UPDATE payment_transactions
               SET status = $2, payment_status = $3, updated_at = NOW()
               WHERE session_id = $1 AND payment_status = 'unpaid'"#,
        )
        .bind(session_id)
        .bind(status.as_str())
        .bind(payment_status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
