use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    Booking, BookingItem, BookingLeg, CouponUsage, Draft, Payment, SeatClaim, SeatLock,
};

/// Unique constraint names shared by every store implementation.
pub mod constraints {
    pub const BOOKING_CODE: &str = "bookings_code_key";
    pub const BOOKING_PAYMENT_INTENT: &str = "bookings_payment_intent_key";
    pub const PAYMENT_PROVIDER_TXN: &str = "payments_provider_txn_key";
    pub const PAYMENT_SEQUENCE: &str = "payments_booking_sequence_key";
    pub const COUPON_USAGE: &str = "coupon_usages_coupon_booking_key";
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Entry point to the relational store backing the engine.
#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Open a transaction. Dropping the returned handle without calling
    /// [`StoreTx::commit`] discards every write made through it.
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>>;
}

/// Reads and writes inside one atomic unit of work. `lock_*` reads take a
/// row lock held until commit or rollback.
#[async_trait]
pub trait StoreTx: Send {
    // ------------------------------------------------------------------
    // Drafts
    // ------------------------------------------------------------------

    /// Draft header with legs and items loaded.
    async fn lock_draft(&mut self, id: Uuid) -> StoreResult<Option<Draft>>;

    /// Resolves the draft's current intent as well as every intent it was
    /// given before.
    async fn find_draft_id_by_intent(
        &mut self,
        provider: &str,
        intent_id: &str,
    ) -> StoreResult<Option<Uuid>>;

    /// Make `intent_id` the draft's current intent and remember it.
    async fn attach_payment_intent(
        &mut self,
        draft_id: Uuid,
        provider: &str,
        intent_id: &str,
    ) -> StoreResult<()>;

    async fn complete_draft(
        &mut self,
        draft_id: Uuid,
        booking_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<()>;

    // ------------------------------------------------------------------
    // Bookings
    // ------------------------------------------------------------------

    async fn booking_code_exists(&mut self, code: &str) -> StoreResult<bool>;

    async fn insert_booking(&mut self, booking: &Booking) -> StoreResult<()>;

    async fn find_booking(&mut self, id: Uuid) -> StoreResult<Option<Booking>>;

    async fn lock_booking(&mut self, id: Uuid) -> StoreResult<Option<Booking>>;

    async fn update_booking(&mut self, booking: &Booking) -> StoreResult<()>;

    async fn insert_leg(&mut self, leg: &BookingLeg) -> StoreResult<()>;

    async fn insert_item(&mut self, item: &BookingItem) -> StoreResult<()>;

    async fn booking_legs(&mut self, booking_id: Uuid) -> StoreResult<Vec<BookingLeg>>;

    async fn booking_items(&mut self, booking_id: Uuid) -> StoreResult<Vec<BookingItem>>;

    /// Scheduled departure from the trip catalog.
    async fn trip_departure(&mut self, trip_id: i64) -> StoreResult<Option<DateTime<Utc>>>;

    // ------------------------------------------------------------------
    // Seat ledger
    // ------------------------------------------------------------------

    /// Insert or take over the (trip, seat) row. Returns `false` without
    /// writing when another booking currently holds the seat.
    async fn claim_seat(&mut self, claim: &SeatClaim) -> StoreResult<bool>;

    /// Flip every booked row of `booking_id` to free. Returns rows changed.
    async fn release_seats(&mut self, booking_id: Uuid, at: DateTime<Utc>) -> StoreResult<u64>;

    async fn seat_lock(&mut self, trip_id: i64, seat_id: i64) -> StoreResult<Option<SeatLock>>;

    async fn seat_locks_for_booking(&mut self, booking_id: Uuid) -> StoreResult<Vec<SeatLock>>;

    // ------------------------------------------------------------------
    // Coupons
    // ------------------------------------------------------------------

    async fn coupon_usage_exists(&mut self, coupon_id: i64, booking_id: Uuid) -> StoreResult<bool>;

    async fn insert_coupon_usage(&mut self, usage: &CouponUsage) -> StoreResult<()>;

    // ------------------------------------------------------------------
    // Payments
    // ------------------------------------------------------------------

    /// All payments of a booking ordered by `sequence`, row-locked.
    async fn payments_for_booking(&mut self, booking_id: Uuid) -> StoreResult<Vec<Payment>>;

    async fn lock_payment_by_provider_txn(
        &mut self,
        provider: &str,
        provider_txn_id: &str,
    ) -> StoreResult<Option<Payment>>;

    async fn insert_payment(&mut self, payment: &Payment) -> StoreResult<()>;

    async fn update_payment(&mut self, payment: &Payment) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}
