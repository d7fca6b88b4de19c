use tripline_core::payment::GatewayError;
use tripline_core::CoreError;
use uuid::Uuid;

use crate::models::BookingStatus;
use crate::repository::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("Draft not found: {0}")]
    DraftNotFound(Uuid),

    #[error("Booking not found: {0}")]
    BookingNotFound(Uuid),

    #[error("Draft item {item_id} on trip {trip_id} cannot be matched to a booking leg")]
    UnresolvableItem { item_id: Uuid, trip_id: i64 },

    #[error("Seat {seat_id} on trip {trip_id} is already taken")]
    SeatConflict { trip_id: i64, seat_id: i64 },

    #[error("Invalid pricing: {0}")]
    InvalidPricing(String),

    #[error("Booking {booking_id} is {status}, only paid bookings can be refunded")]
    BookingNotPaid { booking_id: Uuid, status: BookingStatus },

    #[error("Booking {0} has no succeeded payment")]
    NoSucceededPayment(Uuid),

    #[error("Invalid refund amount {requested}: refundable amount is {refundable}")]
    InvalidRefundAmount { requested: i64, refundable: i64 },

    #[error("Booking {0} has no pending refund from modification")]
    NoPendingRefund(Uuid),

    #[error("Draft {draft_id} is already completed")]
    DraftCompleted { draft_id: Uuid },

    #[error("Paid amount {received} does not match draft total {expected}")]
    AmountMismatch { expected: i64, received: i64 },

    #[error("Could not allocate a unique booking code after {0} attempts")]
    CodeSpaceExhausted(u32),

    #[error("Webhook signature verification failed")]
    InvalidSignature,

    #[error("Malformed webhook payload: {0}")]
    MalformedNotification(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl OrderError {
    /// Expected, user/admin-facing failures. These are reported as-is and
    /// never retried automatically.
    pub fn is_domain(&self) -> bool {
        matches!(
            self,
            OrderError::DraftNotFound(_)
                | OrderError::BookingNotFound(_)
                | OrderError::UnresolvableItem { .. }
                | OrderError::SeatConflict { .. }
                | OrderError::InvalidPricing(_)
                | OrderError::BookingNotPaid { .. }
                | OrderError::NoSucceededPayment(_)
                | OrderError::InvalidRefundAmount { .. }
                | OrderError::NoPendingRefund(_)
                | OrderError::DraftCompleted { .. }
                | OrderError::AmountMismatch { .. }
        )
    }
}

pub type OrderResult<T> = Result<T, OrderError>;
