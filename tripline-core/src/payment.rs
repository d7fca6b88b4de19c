use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tripline_shared::Masked;

use crate::signature::{self, PaymentLinkFields};
use crate::{CoreError, CoreResult};

/// Provider tag stored on bookings and payments created through the link gateway.
pub const PAYOS_PROVIDER: &str = "payos";

/// Gateway code meaning "accepted" / "paid".
pub const GATEWAY_SUCCESS_CODE: &str = "00";

/// Longest description the gateway accepts.
pub const MAX_DESCRIPTION_LEN: usize = 25;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentLineItem {
    pub name: String,
    pub quantity: i64,
    pub price: i64,
}

impl PaymentLineItem {
    pub fn new(name: impl Into<String>, quantity: i64, price: i64) -> Self {
        Self { name: name.into(), quantity, price }
    }

    pub fn line_total(&self) -> i64 {
        self.price * self.quantity
    }
}

#[derive(Debug, Clone, Default)]
pub struct Buyer {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// Body of `POST /v2/payment-requests`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentLinkRequest {
    pub order_code: i64,
    pub amount: i64,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buyer_name: Option<Masked<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buyer_email: Option<Masked<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buyer_phone: Option<Masked<String>>,
    pub items: Vec<PaymentLineItem>,
    pub cancel_url: String,
    pub return_url: String,
    pub expired_at: i64,
    pub signature: String,
}

impl PaymentLinkRequest {
    /// Assemble and sign a request. Fails if the line items do not add up to
    /// `amount`, so an inconsistent request never reaches the network.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        order_code: i64,
        amount: i64,
        description: &str,
        items: Vec<PaymentLineItem>,
        buyer: Buyer,
        return_url: &str,
        cancel_url: &str,
        ttl: Duration,
        now: DateTime<Utc>,
        checksum_key: &str,
    ) -> CoreResult<Self> {
        if amount <= 0 {
            return Err(CoreError::ValidationError(format!(
                "payment amount must be positive, got {}",
                amount
            )));
        }

        let description: String = description.chars().take(MAX_DESCRIPTION_LEN).collect();

        let mut request = Self {
            order_code,
            amount,
            description,
            buyer_name: buyer.name.map(Masked),
            buyer_email: buyer.email.map(Masked),
            buyer_phone: buyer.phone.map(Masked),
            items,
            cancel_url: cancel_url.to_string(),
            return_url: return_url.to_string(),
            expired_at: (now + ttl).timestamp(),
            signature: String::new(),
        };

        request.reconcile()?;
        request.signature = signature::sign(&request.signed_fields(), checksum_key)?;
        Ok(request)
    }

    pub fn signed_fields(&self) -> PaymentLinkFields {
        PaymentLinkFields {
            amount: self.amount,
            order_code: self.order_code,
            description: self.description.clone(),
            return_url: self.return_url.clone(),
            cancel_url: self.cancel_url.clone(),
        }
    }

    /// `sum(price * quantity)` must equal `amount` exactly.
    pub fn reconcile(&self) -> CoreResult<()> {
        let actual: i64 = self.items.iter().map(PaymentLineItem::line_total).sum();
        if actual != self.amount {
            tracing::warn!(
                order_code = self.order_code,
                expected = self.amount,
                actual,
                "payment link items do not add up to amount"
            );
            return Err(CoreError::Reconciliation { expected: self.amount, actual });
        }
        Ok(())
    }
}

/// The `data` part of a successful link-creation response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentLink {
    pub payment_link_id: String,
    pub checkout_url: String,
    pub order_code: i64,
    pub amount: i64,
    pub status: String,
    #[serde(default)]
    pub qr_code: Option<String>,
}

/// The verified `data` object of a payment webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentNotification {
    pub order_code: i64,
    pub amount: i64,
    pub code: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub payment_link_id: Option<String>,
    #[serde(default)]
    pub transaction_date_time: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
}

impl PaymentNotification {
    pub fn is_success(&self) -> bool {
        self.code == GATEWAY_SUCCESS_CODE
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Request rejected before sending: {0}")]
    Rejected(#[from] CoreError),
    #[error("Gateway unreachable after {attempts} attempt(s): {message}")]
    Transport { attempts: u32, message: String },
    #[error("Gateway returned HTTP {status}")]
    HttpStatus { status: u16, body: String },
    #[error("Gateway declined with code {code}: {desc}")]
    Declined { code: String, desc: String },
    #[error("Malformed gateway response: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a hosted checkout link. Implementations must call
    /// [`PaymentLinkRequest::reconcile`] before any network I/O.
    async fn create_payment_link(
        &self,
        request: &PaymentLinkRequest,
    ) -> Result<PaymentLink, GatewayError>;
}
