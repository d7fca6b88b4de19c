use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::models::{
    Booking, BookingItem, BookingLeg, CouponUsage, Draft, Payment, SeatClaim, SeatLock,
};
use crate::repository::{constraints, BookingStore, StoreError, StoreResult, StoreTx};

/// Process-local store. Transactions are serialised: `begin` takes the lock,
/// works on a copy, and `commit` swaps the copy in. A dropped transaction
/// leaves the shared state untouched.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    drafts: HashMap<Uuid, Draft>,
    draft_intents: HashMap<(String, String), Uuid>,
    trips: HashMap<i64, DateTime<Utc>>,
    bookings: Vec<Booking>,
    legs: Vec<BookingLeg>,
    items: Vec<BookingItem>,
    seat_locks: BTreeMap<(i64, i64), SeatLock>,
    coupon_usages: Vec<CouponUsage>,
    payments: Vec<Payment>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the committed state.
    pub async fn snapshot(&self) -> MemoryState {
        self.state.lock().await.clone()
    }

    pub async fn insert_draft(&self, draft: Draft) {
        self.state.lock().await.drafts.insert(draft.id, draft);
    }

    pub async fn insert_trip(&self, trip_id: i64, departure: DateTime<Utc>) {
        self.state.lock().await.trips.insert(trip_id, departure);
    }

    /// Seed a payment row directly, e.g. a top-up from a trip change.
    pub async fn insert_payment(&self, payment: Payment) -> StoreResult<()> {
        self.state.lock().await.add_payment(payment)
    }
}

impl MemoryState {
    pub fn draft(&self, id: Uuid) -> Option<&Draft> {
        self.drafts.get(&id)
    }

    pub fn bookings(&self) -> &[Booking] {
        &self.bookings
    }

    pub fn booking(&self, id: Uuid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn legs(&self) -> &[BookingLeg] {
        &self.legs
    }

    pub fn items(&self) -> &[BookingItem] {
        &self.items
    }

    pub fn seat_locks(&self) -> &BTreeMap<(i64, i64), SeatLock> {
        &self.seat_locks
    }

    pub fn seat_lock(&self, trip_id: i64, seat_id: i64) -> Option<&SeatLock> {
        self.seat_locks.get(&(trip_id, seat_id))
    }

    pub fn coupon_usages(&self) -> &[CouponUsage] {
        &self.coupon_usages
    }

    pub fn payments_for(&self, booking_id: Uuid) -> Vec<&Payment> {
        let mut payments: Vec<_> = self.payments.iter().filter(|p| p.booking_id == booking_id).collect();
        payments.sort_by_key(|p| p.sequence);
        payments
    }

    fn add_payment(&mut self, payment: Payment) -> StoreResult<()> {
        if let Some(txn) = &payment.provider_txn_id {
            if self
                .payments
                .iter()
                .any(|p| p.provider == payment.provider && p.provider_txn_id.as_ref() == Some(txn))
            {
                return Err(StoreError::UniqueViolation(constraints::PAYMENT_PROVIDER_TXN.into()));
            }
        }
        if self
            .payments
            .iter()
            .any(|p| p.booking_id == payment.booking_id && p.sequence == payment.sequence)
        {
            return Err(StoreError::UniqueViolation(constraints::PAYMENT_SEQUENCE.into()));
        }
        self.payments.push(payment);
        Ok(())
    }
}

#[async_trait]
impl BookingStore for InMemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let guard = self.state.clone().lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(MemoryTx { guard, work }))
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    work: MemoryState,
}

fn missing(what: &str, id: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(format!("{} {} does not exist", what, id))
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn lock_draft(&mut self, id: Uuid) -> StoreResult<Option<Draft>> {
        Ok(self.work.drafts.get(&id).cloned())
    }

    async fn find_draft_id_by_intent(
        &mut self,
        provider: &str,
        intent_id: &str,
    ) -> StoreResult<Option<Uuid>> {
        let current = self.work.drafts.values().find(|d| {
            d.payment_provider.as_deref() == Some(provider)
                && d.payment_intent_id.as_deref() == Some(intent_id)
        });
        Ok(current.map(|d| d.id).or_else(|| {
            self.work
                .draft_intents
                .get(&(provider.to_string(), intent_id.to_string()))
                .copied()
        }))
    }

    async fn attach_payment_intent(
        &mut self,
        draft_id: Uuid,
        provider: &str,
        intent_id: &str,
    ) -> StoreResult<()> {
        let draft = self.work.drafts.get_mut(&draft_id).ok_or_else(|| missing("draft", draft_id))?;
        draft.payment_provider = Some(provider.to_string());
        draft.payment_intent_id = Some(intent_id.to_string());
        self.work
            .draft_intents
            .entry((provider.to_string(), intent_id.to_string()))
            .or_insert(draft_id);
        Ok(())
    }

    async fn complete_draft(
        &mut self,
        draft_id: Uuid,
        booking_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let draft = self.work.drafts.get_mut(&draft_id).ok_or_else(|| missing("draft", draft_id))?;
        draft.booking_id = Some(booking_id);
        draft.completed_at = Some(at);
        Ok(())
    }

    async fn booking_code_exists(&mut self, code: &str) -> StoreResult<bool> {
        Ok(self.work.bookings.iter().any(|b| b.code == code))
    }

    async fn insert_booking(&mut self, booking: &Booking) -> StoreResult<()> {
        if self.work.bookings.iter().any(|b| b.code == booking.code) {
            return Err(StoreError::UniqueViolation(constraints::BOOKING_CODE.into()));
        }
        if let (Some(provider), Some(intent)) = (&booking.payment_provider, &booking.payment_intent_id) {
            if self.work.bookings.iter().any(|b| {
                b.payment_provider.as_ref() == Some(provider)
                    && b.payment_intent_id.as_ref() == Some(intent)
            }) {
                return Err(StoreError::UniqueViolation(constraints::BOOKING_PAYMENT_INTENT.into()));
            }
        }
        self.work.bookings.push(booking.clone());
        Ok(())
    }

    async fn find_booking(&mut self, id: Uuid) -> StoreResult<Option<Booking>> {
        Ok(self.work.booking(id).cloned())
    }

    async fn lock_booking(&mut self, id: Uuid) -> StoreResult<Option<Booking>> {
        Ok(self.work.booking(id).cloned())
    }

    async fn update_booking(&mut self, booking: &Booking) -> StoreResult<()> {
        let row = self
            .work
            .bookings
            .iter_mut()
            .find(|b| b.id == booking.id)
            .ok_or_else(|| missing("booking", booking.id))?;
        *row = booking.clone();
        Ok(())
    }

    async fn insert_leg(&mut self, leg: &BookingLeg) -> StoreResult<()> {
        self.work.legs.push(leg.clone());
        Ok(())
    }

    async fn insert_item(&mut self, item: &BookingItem) -> StoreResult<()> {
        self.work.items.push(item.clone());
        Ok(())
    }

    async fn booking_legs(&mut self, booking_id: Uuid) -> StoreResult<Vec<BookingLeg>> {
        let mut legs: Vec<_> = self.work.legs.iter().filter(|l| l.booking_id == booking_id).cloned().collect();
        legs.sort_by_key(|l| l.direction.priority());
        Ok(legs)
    }

    async fn booking_items(&mut self, booking_id: Uuid) -> StoreResult<Vec<BookingItem>> {
        let mut items: Vec<_> = self.work.items.iter().filter(|i| i.booking_id == booking_id).cloned().collect();
        items.sort_by_key(|i| (i.created_at, i.seat_id));
        Ok(items)
    }

    async fn trip_departure(&mut self, trip_id: i64) -> StoreResult<Option<DateTime<Utc>>> {
        Ok(self.work.trips.get(&trip_id).copied())
    }

    async fn claim_seat(&mut self, claim: &SeatClaim) -> StoreResult<bool> {
        let key = (claim.trip_id, claim.seat_id);
        if let Some(lock) = self.work.seat_locks.get(&key) {
            if lock.is_booked && lock.booking_id != Some(claim.booking_id) {
                return Ok(false);
            }
        }

        self.work.seat_locks.insert(
            key,
            SeatLock {
                trip_id: claim.trip_id,
                seat_id: claim.seat_id,
                booking_id: Some(claim.booking_id),
                booked_by: claim.booked_by,
                is_booked: true,
                booked_at: Some(claim.at),
                updated_at: claim.at,
            },
        );
        Ok(true)
    }

    async fn release_seats(&mut self, booking_id: Uuid, at: DateTime<Utc>) -> StoreResult<u64> {
        let mut released = 0;
        for lock in self.work.seat_locks.values_mut() {
            if lock.is_booked && lock.booking_id == Some(booking_id) {
                lock.is_booked = false;
                lock.booked_by = None;
                lock.booked_at = None;
                lock.updated_at = at;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn seat_lock(&mut self, trip_id: i64, seat_id: i64) -> StoreResult<Option<SeatLock>> {
        Ok(self.work.seat_lock(trip_id, seat_id).cloned())
    }

    async fn seat_locks_for_booking(&mut self, booking_id: Uuid) -> StoreResult<Vec<SeatLock>> {
        Ok(self
            .work
            .seat_locks
            .values()
            .filter(|l| l.booking_id == Some(booking_id))
            .cloned()
            .collect())
    }

    async fn coupon_usage_exists(&mut self, coupon_id: i64, booking_id: Uuid) -> StoreResult<bool> {
        Ok(self
            .work
            .coupon_usages
            .iter()
            .any(|u| u.coupon_id == coupon_id && u.booking_id == booking_id))
    }

    async fn insert_coupon_usage(&mut self, usage: &CouponUsage) -> StoreResult<()> {
        if self.coupon_usage_exists(usage.coupon_id, usage.booking_id).await? {
            return Err(StoreError::UniqueViolation(constraints::COUPON_USAGE.into()));
        }
        self.work.coupon_usages.push(usage.clone());
        Ok(())
    }

    async fn payments_for_booking(&mut self, booking_id: Uuid) -> StoreResult<Vec<Payment>> {
        Ok(self.work.payments_for(booking_id).into_iter().cloned().collect())
    }

    async fn lock_payment_by_provider_txn(
        &mut self,
        provider: &str,
        provider_txn_id: &str,
    ) -> StoreResult<Option<Payment>> {
        Ok(self
            .work
            .payments
            .iter()
            .find(|p| p.provider == provider && p.provider_txn_id.as_deref() == Some(provider_txn_id))
            .cloned())
    }

    async fn insert_payment(&mut self, payment: &Payment) -> StoreResult<()> {
        self.work.add_payment(payment.clone())
    }

    async fn update_payment(&mut self, payment: &Payment) -> StoreResult<()> {
        let row = self
            .work
            .payments
            .iter_mut()
            .find(|p| p.id == payment.id)
            .ok_or_else(|| missing("payment", payment.id))?;
        *row = payment.clone();
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTx { mut guard, work } = *self;
        *guard = work;
        Ok(())
    }
}
