use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};
use tripline_core::payment::{
    Buyer, PaymentGateway, PaymentLink, PaymentLineItem, PaymentLinkRequest, PaymentNotification,
};
use tripline_core::{signature, CoreResult};
use uuid::Uuid;

use crate::error::{OrderError, OrderResult};
use crate::materializer::Materializer;
use crate::models::{Draft, PaymentStatus};
use crate::payments::PaymentRecords;
use crate::repository::BookingStore;

pub const DISCOUNT_LINE_NAME: &str = "Discount";

#[derive(Debug, Clone)]
pub struct LinkSettings {
    /// Provider name recorded on drafts, bookings and payments.
    pub provider: String,
    pub return_url: String,
    pub cancel_url: String,
    pub ttl: Duration,
    pub checksum_key: String,
}

/// What a verified webhook delivery led to.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookOutcome {
    Materialized { booking_id: Uuid, booking_code: String },
    /// A non-success status reached a known payment. `status` is what the
    /// payment ended up as; settled payments keep theirs.
    FailureRecorded { payment_id: Uuid, status: PaymentStatus },
    /// Verified, but nothing in this system refers to the order code.
    Ignored,
}

/// Order codes are integers: epoch seconds with three random digits.
pub fn generate_order_code(now: DateTime<Utc>) -> i64 {
    now.timestamp() * 1000 + rand::thread_rng().gen_range(0..1000)
}

/// Gateway request for a draft: one line per seat plus a negative
/// discount line, so the lines sum to the draft total.
pub fn payment_link_for_draft(
    draft: &Draft,
    order_code: i64,
    settings: &LinkSettings,
    now: DateTime<Utc>,
) -> CoreResult<PaymentLinkRequest> {
    let mut items: Vec<PaymentLineItem> = draft
        .items
        .iter()
        .map(|item| PaymentLineItem::new(format!("Seat {}", item.seat_label), 1, item.price))
        .collect();
    if draft.discount_amount > 0 {
        items.push(PaymentLineItem::new(DISCOUNT_LINE_NAME, 1, -draft.discount_amount));
    }

    let buyer = Buyer {
        name: Some(draft.passenger_name.clone()),
        email: draft.passenger_email.as_ref().map(|e| e.expose().clone()),
        phone: Some(draft.passenger_phone.expose().clone()),
    };

    PaymentLinkRequest::build(
        order_code,
        draft.total_price,
        &format!("TRIP {}", order_code),
        items,
        buyer,
        &settings.return_url,
        &settings.cancel_url,
        settings.ttl,
        now,
        &settings.checksum_key,
    )
}

/// Glue between the gateway and the engine: opens checkout links and turns
/// verified webhooks into materializations or failed payments.
pub struct CheckoutService {
    store: Arc<dyn BookingStore>,
    materializer: Arc<Materializer>,
    payments: Arc<PaymentRecords>,
    gateway: Arc<dyn PaymentGateway>,
    settings: LinkSettings,
}

impl CheckoutService {
    pub fn new(
        store: Arc<dyn BookingStore>,
        materializer: Arc<Materializer>,
        payments: Arc<PaymentRecords>,
        gateway: Arc<dyn PaymentGateway>,
        settings: LinkSettings,
    ) -> Self {
        Self { store, materializer, payments, gateway, settings }
    }

    /// Issue a fresh link for an open draft. Order codes of earlier links
    /// stay resolvable, so paying any of them still completes the draft.
    pub async fn create_payment_link(&self, draft_id: Uuid) -> OrderResult<PaymentLink> {
        let now = Utc::now();
        let order_code = generate_order_code(now);

        let mut tx = self.store.begin().await?;
        let draft = tx
            .lock_draft(draft_id)
            .await?
            .ok_or(OrderError::DraftNotFound(draft_id))?;
        if draft.booking_id.is_some() {
            return Err(OrderError::DraftCompleted { draft_id });
        }

        let request = payment_link_for_draft(&draft, order_code, &self.settings, now)?;
        tx.attach_payment_intent(draft_id, &self.settings.provider, &order_code.to_string())
            .await?;
        tx.commit().await?;

        let link = self.gateway.create_payment_link(&request).await?;
        info!(%draft_id, order_code, amount = link.amount, "payment link created");
        Ok(link)
    }

    /// Handle a webhook body. Nothing is read or written before the
    /// signature checks out; redelivery of the same body is harmless.
    pub async fn handle_webhook(&self, payload: &Value) -> OrderResult<WebhookOutcome> {
        let verification = signature::verify(payload, &self.settings.checksum_key);
        if !verification.ok {
            warn!(data = %verification.data, "webhook signature mismatch");
            return Err(OrderError::InvalidSignature);
        }

        let notification: PaymentNotification = serde_json::from_value(verification.data)
            .map_err(|e| OrderError::MalformedNotification(e.to_string()))?;
        let intent_id = notification.order_code.to_string();

        if !notification.is_success() {
            let failed = self
                .payments
                .mark_failed(&self.settings.provider, &intent_id, &notification.code, &notification.desc)
                .await?;
            return Ok(match failed {
                Some(payment) => WebhookOutcome::FailureRecorded {
                    payment_id: payment.id,
                    status: payment.status,
                },
                None => WebhookOutcome::Ignored,
            });
        }

        let Some(draft_id) = self.paid_draft(&intent_id, notification.amount).await? else {
            warn!(order_code = notification.order_code, "no draft for paid order code");
            return Ok(WebhookOutcome::Ignored);
        };

        let graph = self.materializer.materialize(draft_id).await?;
        Ok(WebhookOutcome::Materialized {
            booking_id: graph.booking.id,
            booking_code: graph.booking.code,
        })
    }

    /// Draft behind `intent_id`, checked against the amount the gateway
    /// reports as paid.
    async fn paid_draft(&self, intent_id: &str, amount: i64) -> OrderResult<Option<Uuid>> {
        let mut tx = self.store.begin().await?;
        let Some(draft_id) = tx.find_draft_id_by_intent(&self.settings.provider, intent_id).await? else {
            return Ok(None);
        };
        let draft = tx
            .lock_draft(draft_id)
            .await?
            .ok_or(OrderError::DraftNotFound(draft_id))?;

        if draft.total_price != amount {
            warn!(%draft_id, expected = draft.total_price, received = amount, "paid amount mismatch");
            return Err(OrderError::AmountMismatch {
                expected: draft.total_price,
                received: amount,
            });
        }

        // paid through an earlier link than the one last issued
        if draft.booking_id.is_none() && draft.payment_intent_id.as_deref() != Some(intent_id) {
            info!(%draft_id, intent_id, "paid intent superseded by a newer link, restoring it");
            tx.attach_payment_intent(draft_id, &self.settings.provider, intent_id).await?;
            tx.commit().await?;
        }
        Ok(Some(draft_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use crate::models::BookingStatus;
    use crate::testing::draft_for;
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::Mutex;
    use tripline_core::payment::{GatewayError, PAYOS_PROVIDER};

    const KEY: &str = "checksum-key";

    #[derive(Default)]
    struct StubGateway {
        requests: Mutex<Vec<PaymentLinkRequest>>,
    }

    #[async_trait]
    impl PaymentGateway for StubGateway {
        async fn create_payment_link(
            &self,
            request: &PaymentLinkRequest,
        ) -> Result<PaymentLink, GatewayError> {
            request.reconcile()?;
            self.requests.lock().await.push(request.clone());
            Ok(PaymentLink {
                payment_link_id: format!("pl_{}", request.order_code),
                checkout_url: format!("https://pay.example/{}", request.order_code),
                order_code: request.order_code,
                amount: request.amount,
                status: "PENDING".into(),
                qr_code: None,
            })
        }
    }

    fn settings() -> LinkSettings {
        LinkSettings {
            provider: PAYOS_PROVIDER.into(),
            return_url: "https://tripline.example/return".into(),
            cancel_url: "https://tripline.example/cancel".into(),
            ttl: Duration::minutes(15),
            checksum_key: KEY.into(),
        }
    }

    fn service(store: &Arc<InMemoryStore>, gateway: Arc<StubGateway>) -> CheckoutService {
        CheckoutService::new(
            store.clone(),
            Arc::new(Materializer::new(store.clone())),
            Arc::new(PaymentRecords::new(store.clone())),
            gateway,
            settings(),
        )
    }

    fn webhook(order_code: &str, amount: i64, code: &str) -> Value {
        let data = json!({
            "orderCode": order_code.parse::<i64>().unwrap(),
            "amount": amount,
            "code": code,
            "desc": if code == "00" { "success" } else { "cancelled" },
            "reference": "FT2605010001",
            "currency": "VND",
        });
        let signature = signature::sign_data(data.as_object().unwrap(), KEY).unwrap();
        json!({ "code": code, "data": data, "signature": signature })
    }

    async fn linked_draft(store: &Arc<InMemoryStore>, svc: &CheckoutService) -> (Uuid, String) {
        let draft = draft_for(88, &[(1, 150000), (2, 150000)], 50000);
        store.insert_draft(draft.clone()).await;
        let link = svc.create_payment_link(draft.id).await.unwrap();
        (draft.id, link.order_code.to_string())
    }

    #[test]
    fn test_link_items_include_discount_line() {
        let draft = draft_for(88, &[(1, 150000), (2, 150000)], 50000);
        let request = payment_link_for_draft(&draft, 1730000123000, &settings(), Utc::now()).unwrap();

        assert_eq!(request.amount, 250000);
        assert_eq!(request.items.len(), 3);
        assert_eq!(request.items[2], PaymentLineItem::new(DISCOUNT_LINE_NAME, 1, -50000));
        assert!(request.reconcile().is_ok());
    }

    #[test]
    fn test_inconsistent_draft_is_rejected_before_gateway() {
        let mut draft = draft_for(88, &[(1, 150000)], 0);
        draft.total_price = 140000;
        draft.subtotal_price = 140000;
        assert!(payment_link_for_draft(&draft, 1, &settings(), Utc::now()).is_err());
    }

    #[tokio::test]
    async fn test_create_link_attaches_order_code() {
        let store = Arc::new(InMemoryStore::new());
        let gateway = Arc::new(StubGateway::default());
        let svc = service(&store, gateway.clone());

        let (draft_id, order_code) = linked_draft(&store, &svc).await;

        let state = store.snapshot().await;
        let draft = state.draft(draft_id).unwrap();
        assert_eq!(draft.payment_provider.as_deref(), Some(PAYOS_PROVIDER));
        assert_eq!(draft.payment_intent_id.as_deref(), Some(order_code.as_str()));
        assert_eq!(gateway.requests.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_paid_webhook_materializes_once() {
        let store = Arc::new(InMemoryStore::new());
        let svc = service(&store, Arc::new(StubGateway::default()));
        let (draft_id, order_code) = linked_draft(&store, &svc).await;

        let body = webhook(&order_code, 250000, "00");
        let first = svc.handle_webhook(&body).await.unwrap();
        let second = svc.handle_webhook(&body).await.unwrap();
        assert_eq!(first, second);

        let state = store.snapshot().await;
        assert_eq!(state.bookings().len(), 1);
        let booking = &state.bookings()[0];
        assert_eq!(booking.status, BookingStatus::Paid);
        assert_eq!(booking.payment_intent_id.as_deref(), Some(order_code.as_str()));
        assert_eq!(state.draft(draft_id).unwrap().booking_id, Some(booking.id));

        // a completed draft cannot get a new link
        assert!(matches!(
            svc.create_payment_link(draft_id).await.unwrap_err(),
            OrderError::DraftCompleted { .. }
        ));
    }

    #[tokio::test]
    async fn test_paying_an_earlier_link_still_materializes() {
        let store = Arc::new(InMemoryStore::new());
        let svc = service(&store, Arc::new(StubGateway::default()));
        let (draft_id, first_code) = linked_draft(&store, &svc).await;
        let second = svc.create_payment_link(draft_id).await.unwrap();

        let outcome = svc.handle_webhook(&webhook(&first_code, 250000, "00")).await.unwrap();
        assert!(matches!(outcome, WebhookOutcome::Materialized { .. }));

        let state = store.snapshot().await;
        assert_eq!(state.bookings().len(), 1);
        let booking = &state.bookings()[0];
        assert_eq!(booking.payment_intent_id.as_deref(), Some(first_code.as_str()));
        let payments = state.payments_for(booking.id);
        assert_eq!(payments[0].provider_txn_id.as_deref(), Some(first_code.as_str()));

        // the later link now answers with the same booking
        let again = svc
            .handle_webhook(&webhook(&second.order_code.to_string(), 250000, "00"))
            .await
            .unwrap();
        assert_eq!(again, outcome);
        assert_eq!(store.snapshot().await.bookings().len(), 1);
    }

    #[tokio::test]
    async fn test_bad_signature_changes_nothing() {
        let store = Arc::new(InMemoryStore::new());
        let svc = service(&store, Arc::new(StubGateway::default()));
        let (_, order_code) = linked_draft(&store, &svc).await;

        let mut body = webhook(&order_code, 250000, "00");
        body["data"]["amount"] = json!(1);
        let err = svc.handle_webhook(&body).await.unwrap_err();
        assert!(matches!(err, OrderError::InvalidSignature));

        let unsigned = json!({ "data": { "orderCode": 1, "amount": 1, "code": "00" } });
        assert!(matches!(
            svc.handle_webhook(&unsigned).await.unwrap_err(),
            OrderError::InvalidSignature
        ));
        assert!(store.snapshot().await.bookings().is_empty());
    }

    #[tokio::test]
    async fn test_amount_mismatch_is_rejected() {
        let store = Arc::new(InMemoryStore::new());
        let svc = service(&store, Arc::new(StubGateway::default()));
        let (_, order_code) = linked_draft(&store, &svc).await;

        let err = svc.handle_webhook(&webhook(&order_code, 1000, "00")).await.unwrap_err();
        assert!(matches!(err, OrderError::AmountMismatch { expected: 250000, received: 1000 }));
        assert!(store.snapshot().await.bookings().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_order_code_is_ignored() {
        let store = Arc::new(InMemoryStore::new());
        let svc = service(&store, Arc::new(StubGateway::default()));
        let outcome = svc.handle_webhook(&webhook("999", 1000, "00")).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::Ignored);
        let outcome = svc.handle_webhook(&webhook("999", 1000, "07")).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_failure_webhook_never_downgrades_paid_payment() {
        let store = Arc::new(InMemoryStore::new());
        let svc = service(&store, Arc::new(StubGateway::default()));
        let (_, order_code) = linked_draft(&store, &svc).await;

        svc.handle_webhook(&webhook(&order_code, 250000, "00")).await.unwrap();
        let outcome = svc.handle_webhook(&webhook(&order_code, 250000, "07")).await.unwrap();
        assert!(matches!(
            outcome,
            WebhookOutcome::FailureRecorded { status: PaymentStatus::Succeeded, .. }
        ));

        let state = store.snapshot().await;
        let payments = state.payments_for(state.bookings()[0].id);
        assert_eq!(payments[0].status, PaymentStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_malformed_but_signed_payload() {
        let store = Arc::new(InMemoryStore::new());
        let svc = service(&store, Arc::new(StubGateway::default()));
        let data = json!({ "amount": "lots" });
        let signature = signature::sign_data(data.as_object().unwrap(), KEY).unwrap();

        let err = svc
            .handle_webhook(&json!({ "data": data, "signature": signature }))
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::MalformedNotification(_)));
    }
}
