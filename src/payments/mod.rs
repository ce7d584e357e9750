// src/payments/mod.rs

pub mod stripe;

use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug)]
pub enum PaymentError {
    Http(reqwest::Error),
    Api { status: u16, body: String },
    InvalidResponse(String),
    Signature(String),
}

impl fmt::Display for PaymentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentError::Http(e) => write!(f, "http error: {e}"),
            PaymentError::Api { status, body } => {
                write!(f, "payment api error status={status} body={body}")
            }
            PaymentError::InvalidResponse(e) => write!(f, "invalid response: {e}"),
            PaymentError::Signature(e) => write!(f, "invalid signature: {e}"),
        }
    }
}

impl std::error::Error for PaymentError {}

impl From<reqwest::Error> for PaymentError {
    fn from(value: reqwest::Error) -> Self {
        Self::Http(value)
    }
}

#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub amount_cents: i64,
    pub currency: String,
    pub product_name: String,
    pub success_url: String,
    pub cancel_url: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    pub session_id: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutStatus {
    pub session_id: String,
    /// `open`, `complete` or `expired`.
    pub status: String,
    /// `paid`, `unpaid` or `no_payment_required`.
    pub payment_status: String,
    pub amount_total: i64,
    pub currency: String,
}

impl CheckoutStatus {
    pub fn is_paid(&self) -> bool {
        self.payment_status == "paid"
    }
}

/// Verified webhook content, reduced to what the reconciler acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    CheckoutCompleted { session_id: String, paid: bool },
    CheckoutExpired { session_id: String },
    CheckoutPaymentFailed { session_id: String },
    Ignored { event_type: String },
}

/// The external payment processor.
#[async_trait::async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, PaymentError>;

    async fn get_checkout_status(&self, session_id: &str) -> Result<CheckoutStatus, PaymentError>;

    /// Checks the signature header against the raw body before parsing anything.
    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookEvent, PaymentError>;
}
