use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{OrderError, OrderResult};
use crate::models::{BookingLeg, BookingStatus};
use crate::payments::{totals, PaymentTotals};
use crate::repository::BookingStore;

/// Refund tiers by time left before departure.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RefundPolicyConfig {
    pub full_refund_hours: i64,
    pub partial_refund_hours: i64,
    pub partial_refund_percent: u32,
}

impl Default for RefundPolicyConfig {
    fn default() -> Self {
        Self {
            full_refund_hours: 24,
            partial_refund_hours: 4,
            partial_refund_percent: 50,
        }
    }
}

/// Advisory refund figures for an admin. Nothing is written.
#[derive(Debug, Clone, Serialize)]
pub struct RefundPolicy {
    pub booking_id: Uuid,
    pub booking_status: BookingStatus,
    pub percent: u32,
    pub max_refundable: i64,
    pub suggested_amount: i64,
    pub hours_until_departure: Option<f64>,
    pub departure_at: Option<DateTime<Utc>>,
    pub total_paid: i64,
    pub already_refunded: i64,
    /// Owed from modifications but not yet paid out; excluded from `max_refundable`.
    pub pending_refund_from_modification: i64,
}

pub struct RefundPolicyEngine {
    store: Arc<dyn BookingStore>,
    config: RefundPolicyConfig,
}

impl RefundPolicyEngine {
    pub fn new(store: Arc<dyn BookingStore>, config: RefundPolicyConfig) -> Self {
        Self { store, config }
    }

    pub async fn policy(&self, booking_id: Uuid) -> OrderResult<RefundPolicy> {
        self.policy_at(booking_id, Utc::now()).await
    }

    pub async fn policy_at(&self, booking_id: Uuid, now: DateTime<Utc>) -> OrderResult<RefundPolicy> {
        let mut tx = self.store.begin().await?;
        let booking = tx
            .find_booking(booking_id)
            .await?
            .ok_or(OrderError::BookingNotFound(booking_id))?;
        let legs = tx.booking_legs(booking_id).await?;
        let payments = tx.payments_for_booking(booking_id).await?;

        let departure_at = match first_leg(&legs) {
            Some(leg) => tx.trip_departure(leg.trip_id).await?,
            None => None,
        };

        Ok(evaluate(
            &self.config,
            booking_id,
            booking.status,
            totals(&payments),
            departure_at,
            now,
        ))
    }
}

/// OUT before RETURN before anything else; earliest listed wins a tie.
pub fn first_leg(legs: &[BookingLeg]) -> Option<&BookingLeg> {
    legs.iter().min_by_key(|l| l.direction.priority())
}

/// Percent refundable with `seconds` left before departure.
pub fn refund_percent(config: &RefundPolicyConfig, seconds: i64) -> u32 {
    if seconds < 0 {
        0
    } else if seconds >= config.full_refund_hours * 3600 {
        100
    } else if seconds >= config.partial_refund_hours * 3600 {
        config.partial_refund_percent
    } else {
        0
    }
}

pub fn evaluate(
    config: &RefundPolicyConfig,
    booking_id: Uuid,
    booking_status: BookingStatus,
    totals: Option<PaymentTotals>,
    departure_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> RefundPolicy {
    let (total_paid, already_refunded, pending) = totals
        .map(|t| (t.total_paid, t.already_refunded, t.pending_from_modification))
        .unwrap_or_default();
    let max_refundable = (total_paid - already_refunded).max(0);

    let seconds = departure_at.map(|d| (d - now).num_seconds());
    let percent = seconds.map(|s| refund_percent(config, s)).unwrap_or(0);
    let suggested_amount = if percent > 0 {
        max_refundable * i64::from(percent) / 100
    } else {
        0
    };

    RefundPolicy {
        booking_id,
        booking_status,
        percent,
        max_refundable,
        suggested_amount,
        hours_until_departure: seconds.map(|s| s as f64 / 3600.0),
        departure_at,
        total_paid,
        already_refunded,
        pending_refund_from_modification: pending,
    }
}
