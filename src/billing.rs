// src/billing.rs

use chrono::{Duration, Utc};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::AppError;
use crate::ledger::{Ledger, PlanGrant};
use crate::models::{
    NewTransaction, PaymentStatus, PaymentTransaction, SubscriptionPlan, TransactionStatus,
};
use crate::payments::{CheckoutRequest, CheckoutStatus, PaymentGateway, WebhookEvent};
use crate::transactions::TransactionStore;

/// Length of one billing period.
pub const PERIOD_DAYS: i64 = 30;

/// How long a claim on a transaction blocks other appliers. A claim older than
/// this belongs to a caller that died mid-apply and may be taken over.
pub const CLAIM_LEASE_SECS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct PlanInfo {
    pub name: String,
    pub monthly_credits: i32,
    pub price: f64,
    pub price_cents: i64,
    pub currency: String,
}

/// Static plan catalog. `None` is the free tier and cannot be bought.
pub fn plan_info(plan: SubscriptionPlan) -> Option<PlanInfo> {
    let (name, monthly_credits, price_cents) = match plan {
        SubscriptionPlan::Basic => ("Basic", 30, 999),
        SubscriptionPlan::Premium => ("Premium", 60, 1999),
        SubscriptionPlan::Pro => ("Pro", 90, 2999),
        SubscriptionPlan::None => return None,
    };
    Some(PlanInfo {
        name: name.to_string(),
        monthly_credits,
        price: price_cents as f64 / 100.0,
        price_cents,
        currency: "eur".to_string(),
    })
}

pub fn catalog() -> BTreeMap<&'static str, PlanInfo> {
    [SubscriptionPlan::Basic, SubscriptionPlan::Premium, SubscriptionPlan::Pro]
        .into_iter()
        .filter_map(|plan| plan_info(plan).map(|info| (plan.as_str(), info)))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct CheckoutStarted {
    pub checkout_url: String,
    pub session_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Plan activated and transaction marked paid by this call.
    Applied,
    /// Transaction was already paid; nothing changed.
    AlreadyPaid,
    /// Processor does not report the payment as paid yet.
    NotPaid,
    /// Unpaid transaction closed as cancelled or failed.
    Closed,
    /// Another caller holds the claim and is applying the payment right now.
    InProgress,
    /// Event or session we do not track.
    Ignored,
}

/// Turns processor confirmations into account changes, once per transaction.
/// Polling and webhooks both end up in `apply`.
#[derive(Clone)]
pub struct Reconciler {
    ledger: Arc<dyn Ledger>,
    transactions: Arc<dyn TransactionStore>,
    payments: Arc<dyn PaymentGateway>,
}

impl Reconciler {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        transactions: Arc<dyn TransactionStore>,
        payments: Arc<dyn PaymentGateway>,
    ) -> Self {
        Self {
            ledger,
            transactions,
            payments,
        }
    }

    /// Opens a checkout session for `plan_id` and records the pending transaction.
    /// `origin` is the scheme and host the success/cancel pages live on.
    pub async fn start_checkout(
        &self,
        user_id: Uuid,
        plan_id: &str,
        origin: &str,
    ) -> Result<CheckoutStarted, AppError> {
        let plan = plan_id
            .parse::<SubscriptionPlan>()
            .ok()
            .and_then(|plan| plan_info(plan).map(|info| (plan, info)));
        let Some((plan, info)) = plan else {
            return Err(AppError::Validation("Invalid subscription plan".to_string()));
        };

        let origin = origin.trim_end_matches('/');
        let mut metadata = BTreeMap::new();
        metadata.insert("user_id".to_string(), user_id.to_string());
        metadata.insert("plan_id".to_string(), plan.as_str().to_string());
        metadata.insert("source".to_string(), "subscription_checkout".to_string());

        let request = CheckoutRequest {
            amount_cents: info.price_cents,
            currency: info.currency.clone(),
            product_name: info.name.clone(),
            success_url: format!("{origin}/subscription/success?session_id={{CHECKOUT_SESSION_ID}}"),
            cancel_url: format!("{origin}/subscription/cancel"),
            metadata,
        };

        let session = self
            .payments
            .create_checkout_session(&request)
            .await
            .map_err(|e| {
                log::error!("checkout session create failed user_id={user_id} plan={plan}: {e}");
                AppError::PaymentProvider(e.to_string())
            })?;

        self.transactions
            .create(NewTransaction {
                user_id,
                session_id: session.session_id.clone(),
                amount_cents: info.price_cents,
                currency: info.currency,
                subscription_plan: plan,
                metadata: Some(json!(request.metadata)),
            })
            .await?;

        log::info!(
            "checkout started user_id={user_id} plan={plan} session_id={}",
            session.session_id
        );
        Ok(CheckoutStarted {
            checkout_url: session.url,
            session_id: session.session_id,
        })
    }

    /// Client-side poll. Only the owner may look at a session.
    pub async fn poll_status(
        &self,
        user_id: Uuid,
        session_id: &str,
    ) -> Result<(CheckoutStatus, ReconcileOutcome), AppError> {
        let tx = self
            .transactions
            .find_by_session(session_id)
            .await?
            .filter(|tx| tx.user_id == user_id)
            .ok_or(AppError::NotFound("Payment session"))?;

        let status = self
            .payments
            .get_checkout_status(session_id)
            .await
            .map_err(|e| {
                log::error!("checkout status lookup failed session_id={session_id}: {e}");
                AppError::PaymentProvider(e.to_string())
            })?;

        let outcome = self.apply(&tx, status.is_paid()).await?;
        Ok((status, outcome))
    }

    /// Processor callback. Nothing is read from the body until the signature checks out.
    pub async fn handle_webhook(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<ReconcileOutcome, AppError> {
        let event = self.payments.verify_webhook(payload, signature).map_err(|e| {
            log::warn!("rejected payment webhook: {e}");
            AppError::WebhookVerificationFailed(e.to_string())
        })?;

        match event {
            WebhookEvent::CheckoutCompleted { session_id, paid } => {
                let Some(tx) = self.transactions.find_by_session(&session_id).await? else {
                    log::warn!("webhook for unknown session_id={session_id}");
                    return Ok(ReconcileOutcome::Ignored);
                };
                self.apply(&tx, paid).await
            }
            WebhookEvent::CheckoutExpired { session_id } => {
                self.close_unpaid(&session_id, TransactionStatus::Cancelled, PaymentStatus::Unpaid)
                    .await
            }
            WebhookEvent::CheckoutPaymentFailed { session_id } => {
                self.close_unpaid(&session_id, TransactionStatus::Failed, PaymentStatus::Failed)
                    .await
            }
            WebhookEvent::Ignored { event_type } => {
                log::debug!("ignoring payment webhook event {event_type}");
                Ok(ReconcileOutcome::Ignored)
            }
        }
    }

    /// The idempotent core. `tx` may be stale by the time we get here (a poll holds
    /// it across a processor round-trip), so the decision is made by the claim, not
    /// by the snapshot. The ledger is only touched under a claim, and the claim is
    /// dropped again if the grant fails.
    async fn apply(
        &self,
        tx: &PaymentTransaction,
        processor_paid: bool,
    ) -> Result<ReconcileOutcome, AppError> {
        if tx.payment_status == PaymentStatus::Paid {
            return Ok(ReconcileOutcome::AlreadyPaid);
        }
        if !processor_paid {
            return Ok(ReconcileOutcome::NotPaid);
        }

        let info = plan_info(tx.subscription_plan).ok_or_else(|| {
            AppError::Internal(format!("transaction {} has no purchasable plan", tx.id))
        })?;

        let now = Utc::now();
        let stale_before = now - Duration::seconds(CLAIM_LEASE_SECS);
        if !self.transactions.claim(&tx.session_id, stale_before).await? {
            let current = self.transactions.find_by_session(&tx.session_id).await?;
            return Ok(match current {
                Some(current) if current.payment_status == PaymentStatus::Paid => {
                    ReconcileOutcome::AlreadyPaid
                }
                _ => {
                    log::info!("session_id={} is being applied elsewhere", tx.session_id);
                    ReconcileOutcome::InProgress
                }
            });
        }

        let grant = PlanGrant {
            plan: tx.subscription_plan,
            monthly_credits: info.monthly_credits,
            period: Duration::days(PERIOD_DAYS),
            now,
        };
        if let Err(e) = self.ledger.set_plan(tx.user_id, &grant).await {
            if let Err(release) = self.transactions.release_claim(&tx.session_id).await {
                log::error!("could not release claim on session_id={}: {release}", tx.session_id);
            }
            return Err(e);
        }

        if self.transactions.mark_paid(&tx.session_id).await? {
            log::info!(
                "subscription activated user_id={} plan={} session_id={}",
                tx.user_id,
                tx.subscription_plan,
                tx.session_id
            );
            Ok(ReconcileOutcome::Applied)
        } else {
            log::warn!("session_id={} was paid while claimed", tx.session_id);
            Ok(ReconcileOutcome::AlreadyPaid)
        }
    }

    async fn close_unpaid(
        &self,
        session_id: &str,
        status: TransactionStatus,
        payment_status: PaymentStatus,
    ) -> Result<ReconcileOutcome, AppError> {
        if self
            .transactions
            .mark_unpaid_outcome(session_id, status, payment_status)
            .await?
        {
            log::info!("session_id={session_id} closed as {status}");
            Ok(ReconcileOutcome::Closed)
        } else {
            Ok(ReconcileOutcome::Ignored)
        }
    }
}
