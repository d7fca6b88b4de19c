use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tripline_shared::models::events::{self, BookingMaterializedEvent};
use uuid::Uuid;

use crate::error::{OrderError, OrderResult};
use crate::models::{Booking, BookingGraph, BookingItem, BookingLeg, CouponUsage, Draft, DraftItem};
use crate::payments::ensure_payment_in;
use crate::repository::{constraints, BookingStore, StoreError, StoreTx};
use crate::seats::reserve_in;

/// 32 symbols, no 0/O or 1/I.
pub const BOOKING_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const BOOKING_CODE_LEN: usize = 6;
/// Uniqueness lookups per transaction. With 32^6 (~1.07e9) codes a miss is
/// already improbable; five in a row means something is wrong.
pub const MAX_CODE_ATTEMPTS: u32 = 5;
/// Whole-transaction retries when a concurrent insert took the same code.
pub const MAX_MATERIALIZE_ATTEMPTS: u32 = 3;

type CodeGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// Turns a paid draft into a booking graph exactly once.
pub struct Materializer {
    store: Arc<dyn BookingStore>,
    codes: CodeGenerator,
}

impl Materializer {
    pub fn new(store: Arc<dyn BookingStore>) -> Self {
        Self {
            store,
            codes: Arc::new(random_booking_code),
        }
    }

    pub fn with_code_generator(
        store: Arc<dyn BookingStore>,
        codes: impl Fn() -> String + Send + Sync + 'static,
    ) -> Self {
        Self { store, codes: Arc::new(codes) }
    }

    /// Materialize `draft_id`. Calling it again for the same draft returns
    /// the booking created the first time.
    pub async fn materialize(&self, draft_id: Uuid) -> OrderResult<BookingGraph> {
        let mut attempt = 1;
        loop {
            match self.try_materialize(draft_id).await {
                Err(OrderError::Store(StoreError::UniqueViolation(constraint)))
                    if constraint == constraints::BOOKING_CODE
                        && attempt < MAX_MATERIALIZE_ATTEMPTS =>
                {
                    warn!(%draft_id, attempt, "booking code taken concurrently, retrying");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Booking with legs and items.
    pub async fn load_booking(&self, booking_id: Uuid) -> OrderResult<BookingGraph> {
        let mut tx = self.store.begin().await?;
        load_graph(tx.as_mut(), booking_id).await
    }

    async fn try_materialize(&self, draft_id: Uuid) -> OrderResult<BookingGraph> {
        let mut tx = self.store.begin().await?;

        // the draft row lock serialises concurrent deliveries for the same draft
        let draft = tx
            .lock_draft(draft_id)
            .await?
            .ok_or(OrderError::DraftNotFound(draft_id))?;

        if let Some(booking_id) = draft.booking_id {
            debug!(%draft_id, %booking_id, "draft already materialized");
            return load_graph(tx.as_mut(), booking_id).await;
        }

        let now = Utc::now();
        let code = self.allocate_code(tx.as_mut()).await?;
        let booking = Booking::from_draft(&draft, code, now)?;
        tx.insert_booking(&booking).await?;

        let mut legs = Vec::with_capacity(draft.legs.len());
        let mut by_draft_leg: HashMap<Uuid, usize> = HashMap::new();
        let mut by_trip: HashMap<i64, usize> = HashMap::new();

        for draft_leg in &draft.legs {
            let leg = BookingLeg::from_draft_leg(booking.id, draft_leg, now);
            tx.insert_leg(&leg).await?;

            by_draft_leg.insert(draft_leg.id, legs.len());
            by_trip.entry(draft_leg.trip_id).or_insert(legs.len());
            legs.push(leg);
        }

        let mut items = Vec::with_capacity(draft.items.len());
        let mut seats_by_trip: BTreeMap<i64, Vec<i64>> = BTreeMap::new();

        for draft_item in &draft.items {
            let leg = &legs[resolve_leg(draft_item, &by_draft_leg, &by_trip)?];

            let item = BookingItem {
                id: Uuid::new_v4(),
                booking_id: booking.id,
                booking_leg_id: leg.id,
                seat_id: draft_item.seat_id,
                seat_label: draft_item.seat_label.clone(),
                price: draft_item.price,
                created_at: now,
            };
            tx.insert_item(&item).await?;

            seats_by_trip.entry(leg.trip_id).or_default().push(item.seat_id);
            items.push(item);
        }

        let items_total: i64 = items.iter().map(|i| i.price).sum();
        if items_total != booking.subtotal_price {
            warn!(
                booking_id = %booking.id,
                items_total,
                subtotal = booking.subtotal_price,
                "item prices do not add up to subtotal"
            );
        }

        for (trip_id, seat_ids) in &seats_by_trip {
            reserve_in(tx.as_mut(), *trip_id, seat_ids, &booking, now).await?;
        }

        record_coupon_usage(tx.as_mut(), &booking, now).await?;
        ensure_payment_in(tx.as_mut(), &booking, now).await?;
        tx.complete_draft(draft.id, booking.id, now).await?;

        tx.commit().await?;

        info!(%draft_id, booking_id = %booking.id, code = %booking.code, "draft materialized");
        events::emit(&BookingMaterializedEvent {
            booking_id: booking.id,
            booking_code: booking.code.clone(),
            draft_id,
            user_id: booking.user_id,
            total_price: booking.total_price,
            seat_count: items.len(),
            timestamp: now.timestamp(),
        });

        Ok(BookingGraph { booking, legs, items })
    }

    async fn allocate_code(&self, tx: &mut dyn StoreTx) -> OrderResult<String> {
        for _ in 0..MAX_CODE_ATTEMPTS {
            let code = (self.codes)();
            if !tx.booking_code_exists(&code).await? {
                return Ok(code);
            }
        }
        Err(OrderError::CodeSpaceExhausted(MAX_CODE_ATTEMPTS))
    }
}

/// Uniform random code over [`BOOKING_CODE_ALPHABET`].
pub fn random_booking_code() -> String {
    let mut rng = rand::thread_rng();
    (0..BOOKING_CODE_LEN)
        .map(|_| BOOKING_CODE_ALPHABET[rng.gen_range(0..BOOKING_CODE_ALPHABET.len())] as char)
        .collect()
}

/// Explicit leg link first, then the first leg on the same trip.
fn resolve_leg(
    item: &DraftItem,
    by_draft_leg: &HashMap<Uuid, usize>,
    by_trip: &HashMap<i64, usize>,
) -> OrderResult<usize> {
    item.draft_leg_id
        .and_then(|leg_id| by_draft_leg.get(&leg_id))
        .or_else(|| by_trip.get(&item.trip_id))
        .copied()
        .ok_or(OrderError::UnresolvableItem {
            item_id: item.id,
            trip_id: item.trip_id,
        })
}

async fn record_coupon_usage(
    tx: &mut dyn StoreTx,
    booking: &Booking,
    now: DateTime<Utc>,
) -> OrderResult<()> {
    let Some(coupon_id) = booking.coupon_id else {
        return Ok(());
    };

    if tx.coupon_usage_exists(coupon_id, booking.id).await? {
        return Ok(());
    }

    tx.insert_coupon_usage(&CouponUsage {
        id: Uuid::new_v4(),
        coupon_id,
        booking_id: booking.id,
        user_id: booking.user_id,
        discount_amount: booking.discount_amount,
        created_at: now,
    })
    .await?;
    Ok(())
}

pub(crate) async fn load_graph(tx: &mut dyn StoreTx, booking_id: Uuid) -> OrderResult<BookingGraph> {
    let booking = tx
        .find_booking(booking_id)
        .await?
        .ok_or(OrderError::BookingNotFound(booking_id))?;
    let legs = tx.booking_legs(booking_id).await?;
    let items = tx.booking_items(booking_id).await?;
    Ok(BookingGraph { booking, legs, items })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use crate::models::{BookingStatus, DraftLeg, LegDirection, PaymentStatus};
    use serde_json::json;
    use tripline_shared::Masked;

    const TRIP: i64 = 501;

    fn leg(direction: LegDirection, trip_id: i64, total: i64) -> DraftLeg {
        DraftLeg {
            id: Uuid::new_v4(),
            direction,
            trip_id,
            pickup_location_id: Some(1),
            dropoff_location_id: Some(2),
            pickup_address: Some("12 Le Loi".into()),
            dropoff_address: Some("Ben xe Mien Dong".into()),
            pickup_snapshot: json!({ "name": "District 1" }),
            dropoff_snapshot: json!({ "name": "Da Lat" }),
            total_price: total,
        }
    }

    fn item(leg: Option<&DraftLeg>, trip_id: i64, seat_id: i64, price: i64) -> DraftItem {
        DraftItem {
            id: Uuid::new_v4(),
            draft_leg_id: leg.map(|l| l.id),
            trip_id,
            seat_id,
            seat_label: format!("A{}", seat_id),
            price,
        }
    }

    /// One OUT leg, two seats at 150000, discount 50000.
    fn two_seat_draft() -> Draft {
        let out = leg(LegDirection::Out, TRIP, 300000);
        let items = vec![
            item(Some(&out), TRIP, 1, 150000),
            item(Some(&out), TRIP, 2, 150000),
        ];
        Draft {
            id: Uuid::new_v4(),
            user_id: Some(42),
            payment_provider: Some("payos".into()),
            payment_intent_id: Some("1730000999".into()),
            passenger_name: "Nguyen Van C".into(),
            passenger_phone: Masked::new("0987654321".into()),
            passenger_email: Some(Masked::new("c@example.com".into())),
            legs: vec![out],
            items,
            subtotal_price: 300000,
            discount_amount: 50000,
            total_price: 250000,
            coupon_id: Some(9),
            booking_id: None,
            completed_at: None,
            expires_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_end_to_end_materialization() {
        let store = Arc::new(InMemoryStore::new());
        let draft = two_seat_draft();
        store.insert_draft(draft.clone()).await;

        let graph = Materializer::new(store.clone()).materialize(draft.id).await.unwrap();

        assert_eq!(graph.booking.total_price, 250000);
        assert_eq!(graph.booking.status, BookingStatus::Paid);
        assert_eq!(graph.booking.code.len(), BOOKING_CODE_LEN);
        assert_eq!(graph.legs.len(), 1);
        assert_eq!(graph.items.len(), 2);
        assert!(graph.items.iter().all(|i| i.booking_leg_id == graph.legs[0].id));

        let state = store.snapshot().await;
        let payments = state.payments_for(graph.booking.id);
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].amount, 250000);
        assert_eq!(payments[0].status, PaymentStatus::Succeeded);
        assert_eq!(payments[0].provider_txn_id.as_deref(), Some("1730000999"));

        for seat in [1, 2] {
            let lock = state.seat_lock(TRIP, seat).unwrap();
            assert!(lock.is_booked);
            assert_eq!(lock.booking_id, Some(graph.booking.id));
        }

        assert_eq!(state.coupon_usages().len(), 1);
        assert_eq!(state.coupon_usages()[0].discount_amount, 50000);
        assert_eq!(state.draft(draft.id).unwrap().booking_id, Some(graph.booking.id));
    }

    #[tokio::test]
    async fn test_materialize_is_idempotent() {
        let store = Arc::new(InMemoryStore::new());
        let draft = two_seat_draft();
        store.insert_draft(draft.clone()).await;
        let materializer = Materializer::new(store.clone());

        let first = materializer.materialize(draft.id).await.unwrap();
        let second = materializer.materialize(draft.id).await.unwrap();

        assert_eq!(first.booking.id, second.booking.id);
        assert_eq!(second.items.len(), 2);

        let state = store.snapshot().await;
        assert_eq!(state.bookings().len(), 1);
        assert_eq!(state.legs().len(), 1);
        assert_eq!(state.items().len(), 2);
        assert_eq!(state.coupon_usages().len(), 1);
        assert_eq!(state.payments_for(first.booking.id).len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_deliveries_create_one_booking() {
        let store = Arc::new(InMemoryStore::new());
        let draft = two_seat_draft();
        store.insert_draft(draft.clone()).await;
        let materializer = Arc::new(Materializer::new(store.clone()));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let m = materializer.clone();
                let id = draft.id;
                tokio::spawn(async move { m.materialize(id).await.map(|g| g.booking.id) })
            })
            .collect();

        let mut ids = Vec::new();
        for h in handles {
            ids.push(h.await.unwrap().unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(store.snapshot().await.bookings().len(), 1);
    }

    #[tokio::test]
    async fn test_items_fall_back_to_trip_match() {
        let store = Arc::new(InMemoryStore::new());
        let mut draft = two_seat_draft();
        let ret = leg(LegDirection::Return, 777, 150000);
        draft.items.push(item(None, 777, 5, 150000));
        draft.legs.push(ret);
        draft.subtotal_price = 450000;
        draft.total_price = 400000;
        store.insert_draft(draft.clone()).await;

        let graph = Materializer::new(store.clone()).materialize(draft.id).await.unwrap();
        let return_leg = graph.legs.iter().find(|l| l.trip_id == 777).unwrap();
        let fallback = graph.items.iter().find(|i| i.seat_id == 5).unwrap();
        assert_eq!(fallback.booking_leg_id, return_leg.id);
        assert!(store.snapshot().await.seat_lock(777, 5).unwrap().is_booked);
    }

    #[tokio::test]
    async fn test_unresolvable_item_aborts_everything() {
        let store = Arc::new(InMemoryStore::new());
        let mut draft = two_seat_draft();
        draft.items.push(item(None, 999, 3, 0));
        store.insert_draft(draft.clone()).await;

        let err = Materializer::new(store.clone()).materialize(draft.id).await.unwrap_err();
        assert!(matches!(err, OrderError::UnresolvableItem { trip_id: 999, .. }));

        let state = store.snapshot().await;
        assert!(state.bookings().is_empty());
        assert!(state.legs().is_empty());
        assert!(state.seat_locks().is_empty());
        assert!(state.draft(draft.id).unwrap().booking_id.is_none());
    }

    #[tokio::test]
    async fn test_seat_conflict_aborts_second_draft() {
        let store = Arc::new(InMemoryStore::new());
        let first = two_seat_draft();
        let mut second = two_seat_draft();
        second.payment_intent_id = Some("1730000888".into());
        store.insert_draft(first.clone()).await;
        store.insert_draft(second.clone()).await;
        let materializer = Materializer::new(store.clone());

        let winner = materializer.materialize(first.id).await.unwrap();
        let err = materializer.materialize(second.id).await.unwrap_err();
        assert!(matches!(err, OrderError::SeatConflict { trip_id: TRIP, seat_id: 1 }));

        let state = store.snapshot().await;
        assert_eq!(state.bookings().len(), 1);
        assert_eq!(state.seat_lock(TRIP, 1).unwrap().booking_id, Some(winner.booking.id));
    }

    #[tokio::test]
    async fn test_unknown_draft() {
        let store = Arc::new(InMemoryStore::new());
        let err = Materializer::new(store).materialize(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, OrderError::DraftNotFound(_)));
    }

    #[tokio::test]
    async fn test_code_space_exhaustion_fails_loudly() {
        let store = Arc::new(InMemoryStore::new());
        let first = two_seat_draft();
        let mut second = two_seat_draft();
        second.items.iter_mut().for_each(|i| i.seat_id += 10);
        second.payment_intent_id = Some("other".into());
        store.insert_draft(first.clone()).await;
        store.insert_draft(second.clone()).await;

        let materializer = Materializer::with_code_generator(store.clone(), || "AAAAAA".to_string());
        materializer.materialize(first.id).await.unwrap();

        let err = materializer.materialize(second.id).await.unwrap_err();
        assert!(matches!(err, OrderError::CodeSpaceExhausted(MAX_CODE_ATTEMPTS)));
        assert_eq!(store.snapshot().await.bookings().len(), 1);
    }

    #[test]
    fn test_random_code_alphabet() {
        for _ in 0..100 {
            let code = random_booking_code();
            assert_eq!(code.len(), BOOKING_CODE_LEN);
            assert!(code.bytes().all(|b| BOOKING_CODE_ALPHABET.contains(&b)));
        }
    }
}
