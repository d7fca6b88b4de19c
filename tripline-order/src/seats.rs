use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};
use tripline_shared::models::events::{self, SeatConflictEvent};
use uuid::Uuid;

use crate::error::{OrderError, OrderResult};
use crate::models::{Booking, SeatClaim, SeatLock};
use crate::repository::{BookingStore, StoreTx};

/// Reservation ledger keyed by (trip, seat).
///
/// A reservation is a conditional claim: it lands only if the seat is free or
/// already held by the same booking, and reports [`OrderError::SeatConflict`]
/// otherwise. A claim never overwrites another booking's seat.
pub struct SeatLedger {
    store: Arc<dyn BookingStore>,
}

impl SeatLedger {
    pub fn new(store: Arc<dyn BookingStore>) -> Self {
        Self { store }
    }

    /// Reserve `seat_ids` on `trip_id` for `booking` in a transaction of its
    /// own. Either every seat is claimed or none is.
    pub async fn reserve(
        &self,
        trip_id: i64,
        seat_ids: &[i64],
        booking: &Booking,
    ) -> OrderResult<usize> {
        let mut tx = self.store.begin().await?;
        let count = reserve_in(tx.as_mut(), trip_id, seat_ids, booking, Utc::now()).await?;
        tx.commit().await?;
        Ok(count)
    }

    /// Free every seat held by `booking_id`, keeping the rows for history.
    pub async fn release(&self, booking_id: Uuid) -> OrderResult<u64> {
        let mut tx = self.store.begin().await?;
        let released = release_in(tx.as_mut(), booking_id, Utc::now()).await?;
        tx.commit().await?;
        Ok(released)
    }

    pub async fn locks_for_booking(&self, booking_id: Uuid) -> OrderResult<Vec<SeatLock>> {
        let mut tx = self.store.begin().await?;
        Ok(tx.seat_locks_for_booking(booking_id).await?)
    }
}

/// Drop non-positive ids and duplicates, keep ascending order.
pub fn normalize_seat_ids(seat_ids: &[i64]) -> Vec<i64> {
    seat_ids
        .iter()
        .copied()
        .filter(|id| *id > 0)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub(crate) async fn reserve_in(
    tx: &mut dyn StoreTx,
    trip_id: i64,
    seat_ids: &[i64],
    booking: &Booking,
    at: DateTime<Utc>,
) -> OrderResult<usize> {
    let seats = normalize_seat_ids(seat_ids);
    if seats.is_empty() {
        return Ok(0);
    }

    for seat_id in &seats {
        let claim = SeatClaim {
            trip_id,
            seat_id: *seat_id,
            booking_id: booking.id,
            booked_by: booking.user_id,
            at,
        };

        if !tx.claim_seat(&claim).await? {
            warn!(trip_id, seat_id, booking_id = %booking.id, "seat already taken");
            events::emit(&SeatConflictEvent {
                trip_id,
                seat_id: *seat_id,
                requested_by: booking.id,
                timestamp: at.timestamp(),
            });
            return Err(OrderError::SeatConflict { trip_id, seat_id: *seat_id });
        }
    }

    debug!(trip_id, booking_id = %booking.id, seats = seats.len(), "seats reserved");
    Ok(seats.len())
}

pub(crate) async fn release_in(
    tx: &mut dyn StoreTx,
    booking_id: Uuid,
    at: DateTime<Utc>,
) -> OrderResult<u64> {
    let released = tx.release_seats(booking_id, at).await?;
    debug!(%booking_id, released, "seats released");
    Ok(released)
}
