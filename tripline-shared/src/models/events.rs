use serde::Serialize;
use uuid::Uuid;

/// A fact about the booking lifecycle that downstream consumers
/// (notifications, reporting) care about.
pub trait DomainEvent: Serialize {
    const NAME: &'static str;
}

/// Emit an event as a structured log record on the `tripline::events` target.
pub fn emit<E: DomainEvent>(event: &E) {
    match serde_json::to_string(event) {
        Ok(payload) => tracing::info!(target: "tripline::events", event = E::NAME, %payload),
        Err(e) => tracing::error!(target: "tripline::events", event = E::NAME, error = %e, "event serialization failed"),
    }
}

#[derive(Debug, Serialize, serde::Deserialize, Clone)]
pub struct BookingMaterializedEvent {
    pub booking_id: Uuid,
    pub booking_code: String,
    pub draft_id: Uuid,
    pub user_id: Option<i64>,
    pub total_price: i64,
    pub seat_count: usize,
    pub timestamp: i64,
}

impl DomainEvent for BookingMaterializedEvent {
    const NAME: &'static str = "booking_materialized";
}

#[derive(Debug, Serialize, serde::Deserialize, Clone)]
pub struct RefundAppliedEvent {
    pub booking_id: Uuid,
    pub payment_id: Uuid,
    pub actor_id: i64,
    pub amount: i64,
    pub refund_type: String,
    pub cumulative_refund: i64,
    pub booking_cancelled: bool,
    pub timestamp: i64,
}

impl DomainEvent for RefundAppliedEvent {
    const NAME: &'static str = "refund_applied";
}

#[derive(Debug, Serialize, serde::Deserialize, Clone)]
pub struct SeatConflictEvent {
    pub trip_id: i64,
    pub seat_id: i64,
    pub requested_by: Uuid,
    pub timestamp: i64,
}

impl DomainEvent for SeatConflictEvent {
    const NAME: &'static str = "seat_conflict";
}

#[derive(Debug, Serialize, serde::Deserialize, Clone)]
pub struct PaymentFailedEvent {
    pub payment_id: Uuid,
    pub booking_id: Uuid,
    pub failure_code: Option<String>,
    pub timestamp: i64,
}

impl DomainEvent for PaymentFailedEvent {
    const NAME: &'static str = "payment_failed";
}
