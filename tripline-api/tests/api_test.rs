use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use tripline_api::{app, middleware::AdminClaims, AppState, AuthConfig};
use tripline_core::payment::{GatewayError, PaymentGateway, PaymentLink, PaymentLinkRequest};
use tripline_core::signature;
use tripline_order::{
    BookingStatus, Draft, DraftItem, DraftLeg, InMemoryStore, LegDirection, LinkSettings,
    PaymentStatus, RefundPolicyConfig,
};
use tripline_shared::Masked;
use uuid::Uuid;

const CHECKSUM_KEY: &str = "test-checksum";
const JWT_SECRET: &str = "test-jwt-secret";

struct StubGateway;

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn create_payment_link(
        &self,
        request: &PaymentLinkRequest,
    ) -> Result<PaymentLink, GatewayError> {
        request.reconcile()?;
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

fn test_app(store: &Arc<InMemoryStore>) -> Router {
    let state = AppState::new(
        store.clone(),
        Arc::new(StubGateway),
        LinkSettings {
            provider: "payos".into(),
            return_url: "https://tripline.example/return".into(),
            cancel_url: "https://tripline.example/cancel".into(),
            ttl: Duration::minutes(15),
            checksum_key: CHECKSUM_KEY.into(),
        },
        RefundPolicyConfig::default(),
        AuthConfig { secret: JWT_SECRET.into() },
    );
    app(state)
}

fn draft(trip_id: i64, order_code: &str, seats: &[(i64, i64)]) -> Draft {
    let leg_id = Uuid::new_v4();
    let subtotal: i64 = seats.iter().map(|(_, price)| price).sum();
    Draft {
        id: Uuid::new_v4(),
        user_id: Some(42),
        payment_provider: Some("payos".into()),
        payment_intent_id: Some(order_code.into()),
        passenger_name: "Tran Van B".into(),
        passenger_phone: Masked::new("0901234567".into()),
        passenger_email: None,
        legs: vec![DraftLeg {
            id: leg_id,
            direction: LegDirection::Out,
            trip_id,
            pickup_location_id: Some(1),
            dropoff_location_id: Some(2),
            pickup_address: None,
            dropoff_address: None,
            pickup_snapshot: json!({ "name": "Da Lat" }),
            dropoff_snapshot: json!({ "name": "Sai Gon" }),
            total_price: subtotal,
        }],
        items: seats
            .iter()
            .map(|(seat_id, price)| DraftItem {
                id: Uuid::new_v4(),
                draft_leg_id: Some(leg_id),
                trip_id,
                seat_id: *seat_id,
                seat_label: format!("A{}", seat_id),
                price: *price,
            })
            .collect(),
        subtotal_price: subtotal,
        discount_amount: 0,
        total_price: subtotal,
        coupon_id: None,
        booking_id: None,
        completed_at: None,
        expires_at: Utc::now() + Duration::minutes(15),
    }
}

fn signed_webhook(order_code: i64, amount: i64, code: &str, key: &str) -> Value {
    let data = json!({
        "orderCode": order_code,
        "amount": amount,
        "code": code,
        "desc": "success",
        "reference": "FT2610170001",
        "currency": "VND",
    });
    let signature = signature::sign_data(data.as_object().unwrap(), key).unwrap();
    json!({ "code": code, "desc": "success", "data": data, "signature": signature })
}

fn token(sub: &str, role: &str) -> String {
    let claims = AdminClaims {
        sub: sub.into(),
        role: role.into(),
        exp: (Utc::now() + Duration::hours(1)).timestamp() as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(JWT_SECRET.as_bytes())).unwrap()
}

async fn send(app: &Router, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, json)
}

#[tokio::test]
async fn test_health() {
    let store = Arc::new(InMemoryStore::new());
    let (status, body) = send(&test_app(&store), "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_webhook_materializes_booking_once() {
    let store = Arc::new(InMemoryStore::new());
    let app = test_app(&store);
    let draft = draft(501, "1760000000123", &[(3, 200000), (4, 200000)]);
    store.insert_draft(draft.clone()).await;

    let payload = signed_webhook(1760000000123, 400000, "00", CHECKSUM_KEY);
    let (status, first) = send(&app, "POST", "/v1/webhooks/payos", None, Some(payload.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["outcome"], "materialized");

    let (status, again) = send(&app, "POST", "/v1/webhooks/payos", None, Some(payload)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["booking_id"], first["booking_id"]);

    let state = store.snapshot().await;
    assert_eq!(state.bookings().len(), 1);
    assert!(state.seat_lock(501, 3).unwrap().is_booked);
}

#[tokio::test]
async fn test_webhook_with_bad_signature_writes_nothing() {
    let store = Arc::new(InMemoryStore::new());
    let app = test_app(&store);
    store.insert_draft(draft(502, "1760000000456", &[(1, 100000)])).await;

    let payload = signed_webhook(1760000000456, 100000, "00", "wrong-key");
    let (status, body) = send(&app, "POST", "/v1/webhooks/payos", None, Some(payload)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("signature"));
    assert!(store.snapshot().await.bookings().is_empty());
}

#[tokio::test]
async fn test_payment_link_for_draft() {
    let store = Arc::new(InMemoryStore::new());
    let app = test_app(&store);
    let mut unlinked = draft(503, "unused", &[(7, 150000)]);
    unlinked.payment_intent_id = None;
    store.insert_draft(unlinked.clone()).await;

    let uri = format!("/v1/drafts/{}/payment-link", unlinked.id);
    let (status, body) = send(&app, "POST", &uri, None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["amount"], 150000);
    let order_code = body["orderCode"].as_i64().unwrap().to_string();
    let state = store.snapshot().await;
    assert_eq!(state.draft(unlinked.id).unwrap().payment_intent_id.as_deref(), Some(order_code.as_str()));
}

#[tokio::test]
async fn test_materialize_unknown_draft_is_not_found() {
    let store = Arc::new(InMemoryStore::new());
    let uri = format!("/v1/drafts/{}/materialize", Uuid::new_v4());
    let (status, _) = send(&test_app(&store), "POST", &uri, None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_routes_require_admin_token() {
    let store = Arc::new(InMemoryStore::new());
    let app = test_app(&store);
    let uri = format!("/v1/admin/bookings/{}", Uuid::new_v4());

    let (status, _) = send(&app, "GET", &uri, None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, "GET", &uri, Some("not-a-jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, "GET", &uri, Some(&token("7", "CUSTOMER")), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&app, "GET", &uri, Some(&token("7", "ADMIN")), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_refund_flow() {
    let store = Arc::new(InMemoryStore::new());
    let app = test_app(&store);
    store.insert_trip(504, Utc::now() + Duration::hours(48)).await;
    let draft = draft(504, "1760000000789", &[(9, 300000)]);
    store.insert_draft(draft.clone()).await;

    let (status, graph) = send(&app, "POST", &format!("/v1/drafts/{}/materialize", draft.id), None, None).await;
    assert_eq!(status, StatusCode::OK);
    let booking_id = graph["id"].as_str().unwrap().to_string();
    let admin = token("7", "ADMIN");

    let (status, policy) = send(
        &app,
        "GET",
        &format!("/v1/admin/bookings/{}/refund-policy", booking_id),
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(policy["percent"], 100);
    assert_eq!(policy["max_refundable"], 300000);

    let (status, payment) = send(
        &app,
        "POST",
        &format!("/v1/admin/bookings/{}/pending-refunds", booking_id),
        Some(&admin),
        Some(json!({ "amount": 50000, "reason": "moved to a cheaper seat" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payment["meta"]["total_pending_refund_from_modification"], 50000);

    let refunds = format!("/v1/admin/bookings/{}/refunds", booking_id);
    let (status, outcome) = send(&app, "POST", &refunds, Some(&admin), Some(json!({ "scope": "price_difference" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["entry"]["amount"], 50000);
    assert_eq!(outcome["entry"]["actor_id"], 7);
    assert_eq!(outcome["booking"]["status"], "paid");

    let (status, outcome) = send(&app, "POST", &refunds, Some(&admin), Some(json!({ "reason": "trip cancelled" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["entry"]["amount"], 250000);
    assert_eq!(outcome["released_seats"], 1);

    let (status, _) = send(&app, "POST", &refunds, Some(&admin), Some(json!({}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let state = store.snapshot().await;
    let booking = state.booking(booking_id.parse().unwrap()).unwrap();
    assert_eq!(booking.status, BookingStatus::Cancelled);
    assert_eq!(state.payments_for(booking.id)[0].status, PaymentStatus::Refunded);
    assert!(!state.seat_lock(504, 9).unwrap().is_booked);
}

#[tokio::test]
async fn test_release_seats_refuses_paid_booking() {
    let store = Arc::new(InMemoryStore::new());
    let app = test_app(&store);
    let draft = draft(505, "1760000000999", &[(2, 120000)]);
    store.insert_draft(draft.clone()).await;

    let (_, graph) = send(&app, "POST", &format!("/v1/drafts/{}/materialize", draft.id), None, None).await;
    let uri = format!("/v1/admin/bookings/{}/seats/release", graph["id"].as_str().unwrap());
    let (status, _) = send(&app, "POST", &uri, Some(&token("7", "SUPER_ADMIN")), None).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert!(store.snapshot().await.seat_lock(505, 2).unwrap().is_booked);
}
