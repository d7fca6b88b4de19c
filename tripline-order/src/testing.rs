//! Fixtures shared by the engine's unit tests.

use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::Arc;
use tripline_shared::Masked;
use uuid::Uuid;

use crate::materializer::Materializer;
use crate::memory::InMemoryStore;
use crate::models::{BookingGraph, Draft, DraftItem, DraftLeg, LegDirection};

/// One OUT leg on `trip_id` with a seat per `(seat_id, price)`.
pub(crate) fn draft_for(trip_id: i64, seats: &[(i64, i64)], discount: i64) -> Draft {
    let leg = DraftLeg {
        id: Uuid::new_v4(),
        direction: LegDirection::Out,
        trip_id,
        pickup_location_id: Some(10),
        dropoff_location_id: Some(20),
        pickup_address: None,
        dropoff_address: None,
        pickup_snapshot: json!({ "name": "Sai Gon" }),
        dropoff_snapshot: json!({ "name": "Nha Trang" }),
        total_price: seats.iter().map(|(_, p)| p).sum(),
    };
    let items: Vec<DraftItem> = seats
        .iter()
        .map(|(seat_id, price)| DraftItem {
            id: Uuid::new_v4(),
            draft_leg_id: Some(leg.id),
            trip_id,
            seat_id: *seat_id,
            seat_label: format!("B{}", seat_id),
            price: *price,
        })
        .collect();
    let subtotal: i64 = items.iter().map(|i| i.price).sum();

    Draft {
        id: Uuid::new_v4(),
        user_id: Some(11),
        payment_provider: Some("payos".into()),
        payment_intent_id: Some(Uuid::new_v4().simple().to_string()),
        passenger_name: "Pham Thi D".into(),
        passenger_phone: Masked::new("0933000111".into()),
        passenger_email: None,
        legs: vec![leg],
        items,
        subtotal_price: subtotal,
        discount_amount: discount,
        total_price: subtotal - discount,
        coupon_id: None,
        booking_id: None,
        completed_at: None,
        expires_at: Utc::now() + Duration::minutes(15),
    }
}

/// Materialize a fresh draft and return its booking.
pub(crate) async fn paid_booking(
    store: &Arc<InMemoryStore>,
    trip_id: i64,
    seats: &[(i64, i64)],
) -> BookingGraph {
    let draft = draft_for(trip_id, seats, 0);
    store.insert_draft(draft.clone()).await;
    Materializer::new(store.clone())
        .materialize(draft.id)
        .await
        .unwrap()
}
