use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tripline_shared::Masked;
use uuid::Uuid;

use crate::error::{OrderError, OrderResult};

/// Currency every amount in this crate is denominated in (smallest unit).
pub const DEFAULT_CURRENCY: &str = "VND";

/// Provider recorded when a booking carries no gateway reference.
pub const MANUAL_PROVIDER: &str = "manual";

macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!("unknown {} '{}'", stringify!($name), other)),
                }
            }
        }
    };
}

/// Booking lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Paid,
    Cancelled,
}

string_enum!(BookingStatus {
    Pending => "pending",
    Paid => "paid",
    Cancelled => "cancelled",
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
    Refunded,
    Canceled,
}

string_enum!(PaymentStatus {
    Pending => "pending",
    Succeeded => "succeeded",
    Failed => "failed",
    Refunded => "refunded",
    Canceled => "canceled",
});

impl PaymentStatus {
    /// Initial status of the payment recorded alongside a booking.
    pub fn for_booking(status: BookingStatus) -> Self {
        match status {
            BookingStatus::Paid => PaymentStatus::Succeeded,
            BookingStatus::Cancelled => PaymentStatus::Canceled,
            BookingStatus::Pending => PaymentStatus::Pending,
        }
    }
}

/// Leg direction. Anything other than outbound/return sorts last.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LegDirection {
    Out,
    Return,
    Other,
}

string_enum!(LegDirection {
    Out => "OUT",
    Return => "RETURN",
    Other => "OTHER",
});

impl LegDirection {
    pub fn priority(&self) -> u8 {
        match self {
            LegDirection::Out => 0,
            LegDirection::Return => 1,
            LegDirection::Other => 2,
        }
    }
}

// ============================================================================
// Draft (owned by the checkout subsystem, read here)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Draft {
    pub id: Uuid,
    pub user_id: Option<i64>,
    pub payment_provider: Option<String>,
    pub payment_intent_id: Option<String>,
    pub passenger_name: String,
    pub passenger_phone: Masked<String>,
    pub passenger_email: Option<Masked<String>>,
    pub legs: Vec<DraftLeg>,
    pub items: Vec<DraftItem>,
    pub subtotal_price: i64,
    pub discount_amount: i64,
    pub total_price: i64,
    pub coupon_id: Option<i64>,
    pub booking_id: Option<Uuid>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftLeg {
    pub id: Uuid,
    pub direction: LegDirection,
    pub trip_id: i64,
    pub pickup_location_id: Option<i64>,
    pub dropoff_location_id: Option<i64>,
    pub pickup_address: Option<String>,
    pub dropoff_address: Option<String>,
    pub pickup_snapshot: serde_json::Value,
    pub dropoff_snapshot: serde_json::Value,
    pub total_price: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftItem {
    pub id: Uuid,
    pub draft_leg_id: Option<Uuid>,
    pub trip_id: i64,
    pub seat_id: i64,
    pub seat_label: String,
    pub price: i64,
}

// ============================================================================
// Booking graph
// ============================================================================

/// The durable sale record. Never deleted; refunds move it to `Cancelled`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub code: String,
    pub user_id: Option<i64>,
    pub coupon_id: Option<i64>,
    pub subtotal_price: i64,
    pub discount_amount: i64,
    pub total_price: i64,
    pub status: BookingStatus,
    pub payment_provider: Option<String>,
    pub payment_intent_id: Option<String>,
    pub passenger_name: String,
    pub passenger_phone: Masked<String>,
    pub passenger_email: Option<Masked<String>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// Build a paid booking from a draft. The draft's price breakdown must
    /// satisfy `total = subtotal - discount >= 0`.
    pub fn from_draft(draft: &Draft, code: String, now: DateTime<Utc>) -> OrderResult<Self> {
        validate_pricing(draft.subtotal_price, draft.discount_amount, draft.total_price)?;

        Ok(Self {
            id: Uuid::new_v4(),
            code,
            user_id: draft.user_id,
            coupon_id: draft.coupon_id,
            subtotal_price: draft.subtotal_price,
            discount_amount: draft.discount_amount,
            total_price: draft.total_price,
            status: BookingStatus::Paid,
            payment_provider: draft.payment_provider.clone(),
            payment_intent_id: draft.payment_intent_id.clone(),
            passenger_name: draft.passenger_name.clone(),
            passenger_phone: draft.passenger_phone.clone(),
            passenger_email: draft.passenger_email.clone(),
            paid_at: Some(now),
            cancelled_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) {
        self.status = BookingStatus::Cancelled;
        self.cancelled_at = Some(now);
        self.updated_at = now;
    }
}

fn validate_pricing(subtotal: i64, discount: i64, total: i64) -> OrderResult<()> {
    if subtotal < 0 || discount < 0 {
        return Err(OrderError::InvalidPricing(format!(
            "subtotal {} and discount {} must be non-negative",
            subtotal, discount
        )));
    }
    if total != subtotal - discount || total < 0 {
        return Err(OrderError::InvalidPricing(format!(
            "total {} does not equal subtotal {} minus discount {}",
            total, subtotal, discount
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingLeg {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub direction: LegDirection,
    pub trip_id: i64,
    pub pickup_location_id: Option<i64>,
    pub dropoff_location_id: Option<i64>,
    pub pickup_address: Option<String>,
    pub dropoff_address: Option<String>,
    pub pickup_snapshot: serde_json::Value,
    pub dropoff_snapshot: serde_json::Value,
    pub total_price: i64,
    pub reminder_sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl BookingLeg {
    pub fn from_draft_leg(booking_id: Uuid, leg: &DraftLeg, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            booking_id,
            direction: leg.direction,
            trip_id: leg.trip_id,
            pickup_location_id: leg.pickup_location_id,
            dropoff_location_id: leg.dropoff_location_id,
            pickup_address: leg.pickup_address.clone(),
            dropoff_address: leg.dropoff_address.clone(),
            pickup_snapshot: leg.pickup_snapshot.clone(),
            dropoff_snapshot: leg.dropoff_snapshot.clone(),
            total_price: leg.total_price,
            reminder_sent_at: None,
            created_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingItem {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub booking_leg_id: Uuid,
    pub seat_id: i64,
    pub seat_label: String,
    pub price: i64,
    pub created_at: DateTime<Utc>,
}

/// A booking with its legs and items loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingGraph {
    #[serde(flatten)]
    pub booking: Booking,
    pub legs: Vec<BookingLeg>,
    pub items: Vec<BookingItem>,
}

// ============================================================================
// Seat ledger
// ============================================================================

/// Reservation row for one (trip, seat). Rows are flipped, never deleted, so
/// `booking_id` keeps pointing at the last holder after a release.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeatLock {
    pub trip_id: i64,
    pub seat_id: i64,
    pub booking_id: Option<Uuid>,
    pub booked_by: Option<i64>,
    pub is_booked: bool,
    pub booked_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// A request to mark a seat booked. Succeeds only if the seat is free or
/// already held by the same booking.
#[derive(Debug, Clone)]
pub struct SeatClaim {
    pub trip_id: i64,
    pub seat_id: i64,
    pub booking_id: Uuid,
    pub booked_by: Option<i64>,
    pub at: DateTime<Utc>,
}

// ============================================================================
// Payments
// ============================================================================

/// One gateway transaction for a booking. `sequence` orders payments of the
/// same booking; the lowest succeeded one is the "original" payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub sequence: i32,
    pub amount: i64,
    pub fee: i64,
    pub refund_amount: i64,
    pub currency: String,
    pub provider: String,
    pub provider_txn_id: Option<String>,
    pub status: PaymentStatus,
    pub failure_code: Option<String>,
    pub failure_message: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub meta: PaymentMeta,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// The payment recorded when a booking is materialized.
    pub fn initial(booking: &Booking, now: DateTime<Utc>) -> Self {
        let status = PaymentStatus::for_booking(booking.status);
        Self {
            id: Uuid::new_v4(),
            booking_id: booking.id,
            sequence: 1,
            amount: booking.total_price,
            fee: 0,
            refund_amount: 0,
            currency: DEFAULT_CURRENCY.to_string(),
            provider: booking
                .payment_provider
                .clone()
                .unwrap_or_else(|| MANUAL_PROVIDER.to_string()),
            provider_txn_id: booking.payment_intent_id.clone(),
            status,
            failure_code: None,
            failure_message: None,
            paid_at: (status == PaymentStatus::Succeeded).then_some(now),
            refunded_at: None,
            meta: PaymentMeta::default(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Refund audit log and pending-modification tracking, stored as a JSON
/// document on the payment row. Entries are only ever appended.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PaymentMeta {
    #[serde(default)]
    pub refunds: Vec<RefundEntry>,
    #[serde(default)]
    pub total_pending_refund_from_modification: i64,
    #[serde(default)]
    pub pending_refunds: Vec<PendingRefund>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RefundType {
    PriceDifference,
    FullBookingRefund,
}

string_enum!(RefundType {
    PriceDifference => "price_difference",
    FullBookingRefund => "full_booking_refund",
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RefundMethod {
    BankTransfer,
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BankInfo {
    pub bank_name: String,
    pub account_number: Masked<String>,
    pub account_holder: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RefundEntry {
    pub amount: i64,
    pub reason: Option<String>,
    pub actor_id: i64,
    pub refunded_at: DateTime<Utc>,
    pub method: RefundMethod,
    #[serde(rename = "type")]
    pub refund_type: RefundType,
    /// Portion that settled pending-modification obligations.
    pub modification_amount: i64,
    /// Portion decided by the admin on top of any modification obligation.
    pub manual_amount: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bank_info: Option<BankInfo>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PendingRefundStatus {
    Pending,
    Refunded,
}

/// Money owed after a post-sale change moved the booking to a cheaper option.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingRefund {
    pub id: Uuid,
    pub amount: i64,
    pub reason: Option<String>,
    pub actor_id: i64,
    pub status: PendingRefundStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub refunded_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouponUsage {
    pub id: Uuid,
    pub coupon_id: i64,
    pub booking_id: Uuid,
    pub user_id: Option<i64>,
    pub discount_amount: i64,
    pub created_at: DateTime<Utc>,
}
