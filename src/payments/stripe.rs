// src/payments/stripe.rs
//
// Minimal Stripe Checkout client over the REST API (https://api.stripe.com).
// Auth: `Authorization: Bearer <secret key>`, form-encoded request bodies.

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use super::{
    CheckoutRequest, CheckoutSession, CheckoutStatus, PaymentError, PaymentGateway, WebhookEvent,
};

pub const API_URL: &str = "https://api.stripe.com";

/// Maximum age of a signed webhook, in seconds.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Deserialize)]
struct SessionResponse {
    id: String,
    url: Option<String>,
    status: Option<String>,
    payment_status: Option<String>,
    amount_total: Option<i64>,
    currency: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventEnvelope {
    #[serde(rename = "type")]
    event_type: String,
    data: EventData,
}

#[derive(Debug, Deserialize)]
struct EventData {
    object: EventObject,
}

#[derive(Debug, Deserialize)]
struct EventObject {
    id: Option<String>,
    payment_status: Option<String>,
}

pub struct StripeClient {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    webhook_secret: String,
}

impl StripeClient {
    pub fn new(client: reqwest::Client, api_url: &str, api_key: String, webhook_secret: String) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
            webhook_secret,
        }
    }

    async fn read_session(resp: reqwest::Response) -> Result<SessionResponse, PaymentError> {
        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            return Err(PaymentError::Api {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str::<SessionResponse>(&body)
            .map_err(|e| PaymentError::InvalidResponse(format!("{e}; body={body}")))
    }
}

fn checkout_form(request: &CheckoutRequest) -> Vec<(String, String)> {
    let mut form = vec![
        ("mode".to_string(), "payment".to_string()),
        ("success_url".to_string(), request.success_url.clone()),
        ("cancel_url".to_string(), request.cancel_url.clone()),
        ("line_items[0][quantity]".to_string(), "1".to_string()),
        (
            "line_items[0][price_data][currency]".to_string(),
            request.currency.clone(),
        ),
        (
            "line_items[0][price_data][unit_amount]".to_string(),
            request.amount_cents.to_string(),
        ),
        (
            "line_items[0][price_data][product_data][name]".to_string(),
            request.product_name.clone(),
        ),
    ];
    for (key, value) in &request.metadata {
        form.push((format!("metadata[{key}]"), value.clone()));
    }
    form
}

#[async_trait]
impl PaymentGateway for StripeClient {
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, PaymentError> {
        let resp = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.api_url))
            .bearer_auth(&self.api_key)
            .form(&checkout_form(request))
            .send()
            .await?;

        let session = Self::read_session(resp).await?;
        let url = session
            .url
            .ok_or_else(|| PaymentError::InvalidResponse("checkout session without url".into()))?;

        Ok(CheckoutSession {
            session_id: session.id,
            url,
        })
    }

    async fn get_checkout_status(&self, session_id: &str) -> Result<CheckoutStatus, PaymentError> {
        let resp = self
            .client
            .get(format!("{}/v1/checkout/sessions/{session_id}", self.api_url))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        let session = Self::read_session(resp).await?;
        Ok(CheckoutStatus {
            session_id: session.id,
            status: session.status.unwrap_or_else(|| "open".to_string()),
            payment_status: session.payment_status.unwrap_or_else(|| "unpaid".to_string()),
            amount_total: session.amount_total.unwrap_or(0),
            currency: session.currency.unwrap_or_default(),
        })
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookEvent, PaymentError> {
        let header = signature.ok_or_else(|| PaymentError::Signature("missing header".into()))?;
        verify_signature(
            &self.webhook_secret,
            payload,
            header,
            Utc::now().timestamp(),
            SIGNATURE_TOLERANCE_SECS,
        )?;
        parse_event(payload)
    }
}

/// HMAC-SHA256 in hex, the `v1` scheme of the `Stripe-Signature` header.
pub fn sign_payload(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Validates a `t=<unix>,v1=<hex>[,v1=<hex>…]` header against the raw body.
pub fn verify_signature(
    secret: &str,
    payload: &[u8],
    header: &str,
    now: i64,
    tolerance_secs: i64,
) -> Result<(), PaymentError> {
    let mut timestamp: Option<i64> = None;
    let mut candidates: Vec<&str> = Vec::new();
    for item in header.split(',') {
        match item.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => candidates.push(value),
            _ => {}
        }
    }

    let timestamp =
        timestamp.ok_or_else(|| PaymentError::Signature("missing or bad timestamp".into()))?;
    if candidates.is_empty() {
        return Err(PaymentError::Signature("no v1 signature".into()));
    }
    if (now - timestamp).abs() > tolerance_secs {
        return Err(PaymentError::Signature(format!(
            "timestamp {timestamp} outside tolerance"
        )));
    }

    for candidate in candidates {
        let Ok(expected) = hex::decode(candidate) else {
            continue;
        };
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .map_err(|e| PaymentError::Signature(e.to_string()))?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        if mac.verify_slice(&expected).is_ok() {
            return Ok(());
        }
    }

    Err(PaymentError::Signature("no matching signature".into()))
}

pub fn parse_event(payload: &[u8]) -> Result<WebhookEvent, PaymentError> {
    let envelope: EventEnvelope = serde_json::from_slice(payload)
        .map_err(|e| PaymentError::InvalidResponse(format!("webhook payload: {e}")))?;

    let session_id = || {
        envelope
            .data
            .object
            .id
            .clone()
            .ok_or_else(|| PaymentError::InvalidResponse("event object without id".into()))
    };

    let event = match envelope.event_type.as_str() {
        "checkout.session.completed" | "checkout.session.async_payment_succeeded" => {
            WebhookEvent::CheckoutCompleted {
                session_id: session_id()?,
                paid: envelope.data.object.payment_status.as_deref() == Some("paid"),
            }
        }
        "checkout.session.expired" => WebhookEvent::CheckoutExpired {
            session_id: session_id()?,
        },
        "checkout.session.async_payment_failed" => WebhookEvent::CheckoutPaymentFailed {
            session_id: session_id()?,
        },
        other => WebhookEvent::Ignored {
            event_type: other.to_string(),
        },
    };
    Ok(event)
}
