use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use std::str::FromStr;
use tripline_order::{
    Booking, BookingItem, BookingLeg, BookingStore, CouponUsage, Draft, DraftItem, DraftLeg,
    Payment, PaymentMeta, SeatClaim, SeatLock, StoreError, StoreResult, StoreTx,
};
use tripline_shared::Masked;
use uuid::Uuid;

/// Postgres implementation of the engine's store. Every [`StoreTx`] is one
/// database transaction; row locks come from `SELECT ... FOR UPDATE`.
#[derive(Clone)]
pub struct PgBookingStore {
    pool: PgPool,
}

impl PgBookingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BookingStore for PgBookingStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let tx = self.pool.begin().await.map_err(store_err)?;
        Ok(Box::new(PgTx { tx }))
    }
}

struct PgTx {
    tx: Transaction<'static, Postgres>,
}

/// Unique violations keep their constraint name so callers can tell a
/// booking-code race from anything else.
fn store_err(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return StoreError::UniqueViolation(db.constraint().unwrap_or("unknown").to_string());
        }
    }
    StoreError::Backend(e.to_string())
}

fn parse<T: FromStr<Err = String>>(raw: &str) -> StoreResult<T> {
    raw.parse().map_err(StoreError::Corrupt)
}

// ============================================================================
// Row types
// ============================================================================

#[derive(sqlx::FromRow)]
struct DraftRow {
    id: Uuid,
    user_id: Option<i64>,
    payment_provider: Option<String>,
    payment_intent_id: Option<String>,
    passenger_name: String,
    passenger_phone: String,
    passenger_email: Option<String>,
    subtotal_price: i64,
    discount_amount: i64,
    total_price: i64,
    coupon_id: Option<i64>,
    booking_id: Option<Uuid>,
    completed_at: Option<DateTime<Utc>>,
    expires_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct DraftLegRow {
    id: Uuid,
    direction: String,
    trip_id: i64,
    pickup_location_id: Option<i64>,
    dropoff_location_id: Option<i64>,
    pickup_address: Option<String>,
    dropoff_address: Option<String>,
    pickup_snapshot: Value,
    dropoff_snapshot: Value,
    total_price: i64,
}

#[derive(sqlx::FromRow)]
struct DraftItemRow {
    id: Uuid,
    draft_leg_id: Option<Uuid>,
    trip_id: i64,
    seat_id: i64,
    seat_label: String,
    price: i64,
}

#[derive(sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    code: String,
    user_id: Option<i64>,
    coupon_id: Option<i64>,
    subtotal_price: i64,
    discount_amount: i64,
    total_price: i64,
    status: String,
    payment_provider: Option<String>,
    payment_intent_id: Option<String>,
    passenger_name: String,
    passenger_phone: String,
    passenger_email: Option<String>,
    paid_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = StoreError;

    fn try_from(row: BookingRow) -> StoreResult<Self> {
        Ok(Booking {
            id: row.id,
            code: row.code,
            user_id: row.user_id,
            coupon_id: row.coupon_id,
            subtotal_price: row.subtotal_price,
            discount_amount: row.discount_amount,
            total_price: row.total_price,
            status: parse(&row.status)?,
            payment_provider: row.payment_provider,
            payment_intent_id: row.payment_intent_id,
            passenger_name: row.passenger_name,
            passenger_phone: Masked(row.passenger_phone),
            passenger_email: row.passenger_email.map(Masked),
            paid_at: row.paid_at,
            cancelled_at: row.cancelled_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct BookingLegRow {
    id: Uuid,
    booking_id: Uuid,
    direction: String,
    trip_id: i64,
    pickup_location_id: Option<i64>,
    dropoff_location_id: Option<i64>,
    pickup_address: Option<String>,
    dropoff_address: Option<String>,
    pickup_snapshot: Value,
    dropoff_snapshot: Value,
    total_price: i64,
    reminder_sent_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct BookingItemRow {
    id: Uuid,
    booking_id: Uuid,
    booking_leg_id: Uuid,
    seat_id: i64,
    seat_label: String,
    price: i64,
    created_at: DateTime<Utc>,
}

impl From<BookingItemRow> for BookingItem {
    fn from(row: BookingItemRow) -> Self {
        BookingItem {
            id: row.id,
            booking_id: row.booking_id,
            booking_leg_id: row.booking_leg_id,
            seat_id: row.seat_id,
            seat_label: row.seat_label,
            price: row.price,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SeatLockRow {
    trip_id: i64,
    seat_id: i64,
    booking_id: Option<Uuid>,
    booked_by: Option<i64>,
    is_booked: bool,
    booked_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl From<SeatLockRow> for SeatLock {
    fn from(row: SeatLockRow) -> Self {
        SeatLock {
            trip_id: row.trip_id,
            seat_id: row.seat_id,
            booking_id: row.booking_id,
            booked_by: row.booked_by,
            is_booked: row.is_booked,
            booked_at: row.booked_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    booking_id: Uuid,
    sequence: i32,
    amount: i64,
    fee: i64,
    refund_amount: i64,
    currency: String,
    provider: String,
    provider_txn_id: Option<String>,
    status: String,
    failure_code: Option<String>,
    failure_message: Option<String>,
    paid_at: Option<DateTime<Utc>>,
    refunded_at: Option<DateTime<Utc>>,
    meta: Json<PaymentMeta>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = StoreError;

    fn try_from(row: PaymentRow) -> StoreResult<Self> {
        Ok(Payment {
            id: row.id,
            booking_id: row.booking_id,
            sequence: row.sequence,
            amount: row.amount,
            fee: row.fee,
            refund_amount: row.refund_amount,
            currency: row.currency,
            provider: row.provider,
            provider_txn_id: row.provider_txn_id,
            status: parse(&row.status)?,
            failure_code: row.failure_code,
            failure_message: row.failure_message,
            paid_at: row.paid_at,
            refunded_at: row.refunded_at,
            meta: row.meta.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const BOOKING_COLUMNS: &str = "id, code, user_id, coupon_id, subtotal_price, discount_amount, \
    total_price, status, payment_provider, payment_intent_id, passenger_name, passenger_phone, \
    passenger_email, paid_at, cancelled_at, created_at, updated_at";

const PAYMENT_COLUMNS: &str = "id, booking_id, sequence, amount, fee, refund_amount, currency, \
    provider, provider_txn_id, status, failure_code, failure_message, paid_at, refunded_at, meta, \
    created_at, updated_at";

const SEAT_COLUMNS: &str = "trip_id, seat_id, booking_id, booked_by, is_booked, booked_at, updated_at";

impl PgTx {
    async fn fetch_booking(&mut self, id: Uuid, lock: bool) -> StoreResult<Option<Booking>> {
        let sql = format!(
            "SELECT {} FROM bookings WHERE id = $1{}",
            BOOKING_COLUMNS,
            if lock { " FOR UPDATE" } else { "" }
        );
        sqlx::query_as::<_, BookingRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(store_err)?
            .map(Booking::try_from)
            .transpose()
    }
}

#[async_trait]
impl StoreTx for PgTx {
    // ------------------------------------------------------------------
    // Drafts
    // ------------------------------------------------------------------

    async fn lock_draft(&mut self, id: Uuid) -> StoreResult<Option<Draft>> {
        let Some(row) = sqlx::query_as::<_, DraftRow>(
            r#"
            SELECT id, user_id, payment_provider, payment_intent_id, passenger_name,
                   passenger_phone, passenger_email, subtotal_price, discount_amount,
                   total_price, coupon_id, booking_id, completed_at, expires_at
            FROM drafts WHERE id = $1 FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(store_err)?
        else {
            return Ok(None);
        };

        let leg_rows = sqlx::query_as::<_, DraftLegRow>(
            r#"
            SELECT id, direction, trip_id, pickup_location_id, dropoff_location_id,
                   pickup_address, dropoff_address, pickup_snapshot, dropoff_snapshot, total_price
            FROM draft_legs WHERE draft_id = $1 ORDER BY position, id
            "#,
        )
        .bind(id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(store_err)?;

        let item_rows = sqlx::query_as::<_, DraftItemRow>(
            r#"
            SELECT id, draft_leg_id, trip_id, seat_id, seat_label, price
            FROM draft_items WHERE draft_id = $1 ORDER BY position, id
            "#,
        )
        .bind(id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(store_err)?;

        let mut legs = Vec::with_capacity(leg_rows.len());
        for leg in leg_rows {
            legs.push(DraftLeg {
                id: leg.id,
                direction: parse(&leg.direction)?,
                trip_id: leg.trip_id,
                pickup_location_id: leg.pickup_location_id,
                dropoff_location_id: leg.dropoff_location_id,
                pickup_address: leg.pickup_address,
                dropoff_address: leg.dropoff_address,
                pickup_snapshot: leg.pickup_snapshot,
                dropoff_snapshot: leg.dropoff_snapshot,
                total_price: leg.total_price,
            });
        }

        let items = item_rows
            .into_iter()
            .map(|item| DraftItem {
                id: item.id,
                draft_leg_id: item.draft_leg_id,
                trip_id: item.trip_id,
                seat_id: item.seat_id,
                seat_label: item.seat_label,
                price: item.price,
            })
            .collect();

        Ok(Some(Draft {
            id: row.id,
            user_id: row.user_id,
            payment_provider: row.payment_provider,
            payment_intent_id: row.payment_intent_id,
            passenger_name: row.passenger_name,
            passenger_phone: Masked(row.passenger_phone),
            passenger_email: row.passenger_email.map(Masked),
            legs,
            items,
            subtotal_price: row.subtotal_price,
            discount_amount: row.discount_amount,
            total_price: row.total_price,
            coupon_id: row.coupon_id,
            booking_id: row.booking_id,
            completed_at: row.completed_at,
            expires_at: row.expires_at,
        }))
    }

    async fn find_draft_id_by_intent(
        &mut self,
        provider: &str,
        intent_id: &str,
    ) -> StoreResult<Option<Uuid>> {
        sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM drafts WHERE payment_provider = $1 AND payment_intent_id = $2 \
             UNION \
             SELECT draft_id FROM draft_payment_intents WHERE provider = $1 AND intent_id = $2 \
             LIMIT 1",
        )
        .bind(provider)
        .bind(intent_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(store_err)
    }

    async fn attach_payment_intent(
        &mut self,
        draft_id: Uuid,
        provider: &str,
        intent_id: &str,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE drafts SET payment_provider = $2, payment_intent_id = $3 WHERE id = $1")
            .bind(draft_id)
            .bind(provider)
            .bind(intent_id)
            .execute(&mut *self.tx)
            .await
            .map_err(store_err)?;

        sqlx::query(
            "INSERT INTO draft_payment_intents (provider, intent_id, draft_id) VALUES ($1, $2, $3) \
             ON CONFLICT (provider, intent_id) DO NOTHING",
        )
        .bind(provider)
        .bind(intent_id)
        .bind(draft_id)
        .execute(&mut *self.tx)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn complete_draft(
        &mut self,
        draft_id: Uuid,
        booking_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE drafts SET booking_id = $2, completed_at = $3 WHERE id = $1")
            .bind(draft_id)
            .bind(booking_id)
            .bind(at)
            .execute(&mut *self.tx)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Bookings
    // ------------------------------------------------------------------

    async fn booking_code_exists(&mut self, code: &str) -> StoreResult<bool> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM bookings WHERE code = $1)")
            .bind(code)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(store_err)
    }

    async fn insert_booking(&mut self, b: &Booking) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO bookings (id, code, user_id, coupon_id, subtotal_price, discount_amount,
                total_price, status, payment_provider, payment_intent_id, passenger_name,
                passenger_phone, passenger_email, paid_at, cancelled_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(b.id)
        .bind(&b.code)
        .bind(b.user_id)
        .bind(b.coupon_id)
        .bind(b.subtotal_price)
        .bind(b.discount_amount)
        .bind(b.total_price)
        .bind(b.status.as_str())
        .bind(&b.payment_provider)
        .bind(&b.payment_intent_id)
        .bind(&b.passenger_name)
        .bind(b.passenger_phone.expose())
        .bind(b.passenger_email.as_ref().map(|e| e.expose().as_str()))
        .bind(b.paid_at)
        .bind(b.cancelled_at)
        .bind(b.created_at)
        .bind(b.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn find_booking(&mut self, id: Uuid) -> StoreResult<Option<Booking>> {
        self.fetch_booking(id, false).await
    }

    async fn lock_booking(&mut self, id: Uuid) -> StoreResult<Option<Booking>> {
        self.fetch_booking(id, true).await
    }

    async fn update_booking(&mut self, b: &Booking) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE bookings
            SET status = $2, paid_at = $3, cancelled_at = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(b.id)
        .bind(b.status.as_str())
        .bind(b.paid_at)
        .bind(b.cancelled_at)
        .bind(b.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn insert_leg(&mut self, leg: &BookingLeg) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO booking_legs (id, booking_id, direction, trip_id, pickup_location_id,
                dropoff_location_id, pickup_address, dropoff_address, pickup_snapshot,
                dropoff_snapshot, total_price, reminder_sent_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(leg.id)
        .bind(leg.booking_id)
        .bind(leg.direction.as_str())
        .bind(leg.trip_id)
        .bind(leg.pickup_location_id)
        .bind(leg.dropoff_location_id)
        .bind(&leg.pickup_address)
        .bind(&leg.dropoff_address)
        .bind(&leg.pickup_snapshot)
        .bind(&leg.dropoff_snapshot)
        .bind(leg.total_price)
        .bind(leg.reminder_sent_at)
        .bind(leg.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn insert_item(&mut self, item: &BookingItem) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO booking_items (id, booking_id, booking_leg_id, seat_id, seat_label, price, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(item.id)
        .bind(item.booking_id)
        .bind(item.booking_leg_id)
        .bind(item.seat_id)
        .bind(&item.seat_label)
        .bind(item.price)
        .bind(item.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn booking_legs(&mut self, booking_id: Uuid) -> StoreResult<Vec<BookingLeg>> {
        let rows = sqlx::query_as::<_, BookingLegRow>(
            r#"
            SELECT id, booking_id, direction, trip_id, pickup_location_id, dropoff_location_id,
                   pickup_address, dropoff_address, pickup_snapshot, dropoff_snapshot,
                   total_price, reminder_sent_at, created_at
            FROM booking_legs WHERE booking_id = $1
            ORDER BY CASE direction WHEN 'OUT' THEN 0 WHEN 'RETURN' THEN 1 ELSE 2 END, created_at
            "#,
        )
        .bind(booking_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(store_err)?;

        rows.into_iter()
            .map(|row| -> StoreResult<BookingLeg> {
                Ok(BookingLeg {
                    id: row.id,
                    booking_id: row.booking_id,
                    direction: parse(&row.direction)?,
                    trip_id: row.trip_id,
                    pickup_location_id: row.pickup_location_id,
                    dropoff_location_id: row.dropoff_location_id,
                    pickup_address: row.pickup_address,
                    dropoff_address: row.dropoff_address,
                    pickup_snapshot: row.pickup_snapshot,
                    dropoff_snapshot: row.dropoff_snapshot,
                    total_price: row.total_price,
                    reminder_sent_at: row.reminder_sent_at,
                    created_at: row.created_at,
                })
            })
            .collect()
    }

    async fn booking_items(&mut self, booking_id: Uuid) -> StoreResult<Vec<BookingItem>> {
        let rows = sqlx::query_as::<_, BookingItemRow>(
            r#"
            SELECT id, booking_id, booking_leg_id, seat_id, seat_label, price, created_at
            FROM booking_items WHERE booking_id = $1 ORDER BY created_at, seat_id
            "#,
        )
        .bind(booking_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(store_err)?;
        Ok(rows.into_iter().map(BookingItem::from).collect())
    }

    async fn trip_departure(&mut self, trip_id: i64) -> StoreResult<Option<DateTime<Utc>>> {
        sqlx::query_scalar::<_, DateTime<Utc>>("SELECT departure_time FROM trips WHERE id = $1")
            .bind(trip_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(store_err)
    }

    // ------------------------------------------------------------------
    // Seat ledger
    // ------------------------------------------------------------------

    async fn claim_seat(&mut self, claim: &SeatClaim) -> StoreResult<bool> {
        // The conflict branch only fires when the seat is free or already
        // ours; otherwise no row comes back and the claim is refused.
        let claimed = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO trip_seat_statuses (trip_id, seat_id, booking_id, booked_by, is_booked, booked_at, updated_at)
            VALUES ($1, $2, $3, $4, TRUE, $5, $5)
            ON CONFLICT (trip_id, seat_id) DO UPDATE
            SET booking_id = EXCLUDED.booking_id,
                booked_by = EXCLUDED.booked_by,
                is_booked = TRUE,
                booked_at = EXCLUDED.booked_at,
                updated_at = EXCLUDED.updated_at
            WHERE trip_seat_statuses.is_booked = FALSE
               OR trip_seat_statuses.booking_id = EXCLUDED.booking_id
            RETURNING seat_id
            "#,
        )
        .bind(claim.trip_id)
        .bind(claim.seat_id)
        .bind(claim.booking_id)
        .bind(claim.booked_by)
        .bind(claim.at)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(store_err)?;

        Ok(claimed.is_some())
    }

    async fn release_seats(&mut self, booking_id: Uuid, at: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE trip_seat_statuses
            SET is_booked = FALSE, booked_by = NULL, booked_at = NULL, updated_at = $2
            WHERE booking_id = $1 AND is_booked = TRUE
            "#,
        )
        .bind(booking_id)
        .bind(at)
        .execute(&mut *self.tx)
        .await
        .map_err(store_err)?;
        Ok(result.rows_affected())
    }

    async fn seat_lock(&mut self, trip_id: i64, seat_id: i64) -> StoreResult<Option<SeatLock>> {
        let sql = format!(
            "SELECT {} FROM trip_seat_statuses WHERE trip_id = $1 AND seat_id = $2",
            SEAT_COLUMNS
        );
        let row = sqlx::query_as::<_, SeatLockRow>(&sql)
            .bind(trip_id)
            .bind(seat_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(store_err)?;
        Ok(row.map(SeatLock::from))
    }

    async fn seat_locks_for_booking(&mut self, booking_id: Uuid) -> StoreResult<Vec<SeatLock>> {
        let sql = format!(
            "SELECT {} FROM trip_seat_statuses WHERE booking_id = $1 ORDER BY trip_id, seat_id",
            SEAT_COLUMNS
        );
        let rows = sqlx::query_as::<_, SeatLockRow>(&sql)
            .bind(booking_id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(store_err)?;
        Ok(rows.into_iter().map(SeatLock::from).collect())
    }

    // ------------------------------------------------------------------
    // Coupons
    // ------------------------------------------------------------------

    async fn coupon_usage_exists(&mut self, coupon_id: i64, booking_id: Uuid) -> StoreResult<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM coupon_usages WHERE coupon_id = $1 AND booking_id = $2)",
        )
        .bind(coupon_id)
        .bind(booking_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(store_err)
    }

    async fn insert_coupon_usage(&mut self, usage: &CouponUsage) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO coupon_usages (id, coupon_id, booking_id, user_id, discount_amount, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(usage.id)
        .bind(usage.coupon_id)
        .bind(usage.booking_id)
        .bind(usage.user_id)
        .bind(usage.discount_amount)
        .bind(usage.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Payments
    // ------------------------------------------------------------------

    async fn payments_for_booking(&mut self, booking_id: Uuid) -> StoreResult<Vec<Payment>> {
        let sql = format!(
            "SELECT {} FROM payments WHERE booking_id = $1 ORDER BY sequence FOR UPDATE",
            PAYMENT_COLUMNS
        );
        let rows = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(booking_id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(store_err)?;
        rows.into_iter().map(Payment::try_from).collect()
    }

    async fn lock_payment_by_provider_txn(
        &mut self,
        provider: &str,
        provider_txn_id: &str,
    ) -> StoreResult<Option<Payment>> {
        let sql = format!(
            "SELECT {} FROM payments WHERE provider = $1 AND provider_txn_id = $2 FOR UPDATE",
            PAYMENT_COLUMNS
        );
        sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(provider)
            .bind(provider_txn_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(store_err)?
            .map(Payment::try_from)
            .transpose()
    }

    async fn insert_payment(&mut self, p: &Payment) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO payments (id, booking_id, sequence, amount, fee, refund_amount, currency,
                provider, provider_txn_id, status, failure_code, failure_message, paid_at,
                refunded_at, meta, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(p.id)
        .bind(p.booking_id)
        .bind(p.sequence)
        .bind(p.amount)
        .bind(p.fee)
        .bind(p.refund_amount)
        .bind(&p.currency)
        .bind(&p.provider)
        .bind(&p.provider_txn_id)
        .bind(p.status.as_str())
        .bind(&p.failure_code)
        .bind(&p.failure_message)
        .bind(p.paid_at)
        .bind(p.refunded_at)
        .bind(Json(&p.meta))
        .bind(p.created_at)
        .bind(p.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn update_payment(&mut self, p: &Payment) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE payments
            SET refund_amount = $2, status = $3, failure_code = $4, failure_message = $5,
                paid_at = $6, refunded_at = $7, meta = $8, updated_at = $9
            WHERE id = $1
            "#,
        )
        .bind(p.id)
        .bind(p.refund_amount)
        .bind(p.status.as_str())
        .bind(&p.failure_code)
        .bind(&p.failure_message)
        .bind(p.paid_at)
        .bind(p.refunded_at)
        .bind(Json(&p.meta))
        .bind(p.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await.map_err(store_err)
    }
}
