use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tripline_shared::models::events::{self, PaymentFailedEvent, RefundAppliedEvent};
use uuid::Uuid;

use crate::error::{OrderError, OrderResult};
use crate::models::{
    BankInfo, Booking, BookingStatus, Payment, PaymentMeta, PaymentStatus, PendingRefund,
    PendingRefundStatus, RefundEntry, RefundMethod, RefundType,
};
use crate::repository::{BookingStore, StoreTx};
use crate::seats::release_in;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundScope {
    /// Up to the whole remaining paid amount, admin-chosen.
    Full,
    /// Exactly the pending modification amount.
    PriceDifference,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RefundRequest {
    pub actor_id: i64,
    pub amount: Option<i64>,
    pub reason: Option<String>,
    pub bank_info: Option<BankInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PendingRefundRequest {
    pub actor_id: i64,
    pub amount: i64,
    pub reason: Option<String>,
    #[serde(default)]
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefundOutcome {
    pub booking: Booking,
    pub payment: Payment,
    pub entry: RefundEntry,
    pub released_seats: u64,
}

/// Money position of a booking across its succeeded payments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PaymentTotals {
    /// Index of the original (lowest `sequence`) succeeded payment.
    #[serde(skip)]
    pub original_index: usize,
    pub total_paid: i64,
    pub already_refunded: i64,
    pub pending_from_modification: i64,
}

impl PaymentTotals {
    pub fn remaining(&self) -> i64 {
        (self.total_paid - self.already_refunded).max(0)
    }
}

/// `None` when no payment has succeeded. `payments` need not be sorted.
pub fn totals(payments: &[Payment]) -> Option<PaymentTotals> {
    let succeeded = || {
        payments
            .iter()
            .enumerate()
            .filter(|(_, p)| p.status == PaymentStatus::Succeeded)
    };

    let (original_index, original) = succeeded().min_by_key(|(_, p)| p.sequence)?;
    Some(PaymentTotals {
        original_index,
        total_paid: succeeded().map(|(_, p)| p.amount).sum(),
        already_refunded: original.refund_amount,
        pending_from_modification: original.meta.total_pending_refund_from_modification,
    })
}

/// Owns every write to payment rows and their refund ledger.
pub struct PaymentRecords {
    store: Arc<dyn BookingStore>,
}

impl PaymentRecords {
    pub fn new(store: Arc<dyn BookingStore>) -> Self {
        Self { store }
    }

    /// Return the booking's original payment, creating it if missing.
    pub async fn record_payment(&self, booking_id: Uuid) -> OrderResult<Payment> {
        let mut tx = self.store.begin().await?;
        let booking = tx
            .lock_booking(booking_id)
            .await?
            .ok_or(OrderError::BookingNotFound(booking_id))?;
        let payment = ensure_payment_in(tx.as_mut(), &booking, Utc::now()).await?;
        tx.commit().await?;
        Ok(payment)
    }

    pub async fn payments_for(&self, booking_id: Uuid) -> OrderResult<Vec<Payment>> {
        let mut tx = self.store.begin().await?;
        Ok(tx.payments_for_booking(booking_id).await?)
    }

    pub async fn refund(&self, booking_id: Uuid, request: RefundRequest) -> OrderResult<RefundOutcome> {
        self.apply_refund(booking_id, request, RefundScope::Full).await
    }

    pub async fn refund_price_difference(
        &self,
        booking_id: Uuid,
        request: RefundRequest,
    ) -> OrderResult<RefundOutcome> {
        self.apply_refund(booking_id, request, RefundScope::PriceDifference).await
    }

    /// Refund against the original payment. Once cumulative refunds cover
    /// everything paid, the payment becomes `refunded`, the booking is
    /// cancelled and its seats are released, all in the same transaction.
    pub async fn apply_refund(
        &self,
        booking_id: Uuid,
        request: RefundRequest,
        scope: RefundScope,
    ) -> OrderResult<RefundOutcome> {
        let mut tx = self.store.begin().await?;
        let mut booking = lock_paid_booking(tx.as_mut(), booking_id).await?;
        let mut payments = tx.payments_for_booking(booking_id).await?;
        let totals = totals(&payments).ok_or(OrderError::NoSucceededPayment(booking_id))?;

        let now = Utc::now();
        let payment = &mut payments[totals.original_index];
        let entry = match scope {
            RefundScope::Full => full_refund_entry(&mut payment.meta, &totals, &request, now)?,
            RefundScope::PriceDifference => {
                price_difference_entry(&mut payment.meta, &totals, &request, booking_id, now)?
            }
        };

        payment.refund_amount += entry.amount;
        payment.meta.refunds.push(entry.clone());
        payment.updated_at = now;

        let fully_refunded = payment.refund_amount >= totals.total_paid;
        let mut released_seats = 0;
        if fully_refunded {
            payment.status = PaymentStatus::Refunded;
            payment.refunded_at = Some(now);
            booking.cancel(now);
            tx.update_booking(&booking).await?;
            released_seats = release_in(tx.as_mut(), booking_id, now).await?;
        }
        tx.update_payment(payment).await?;
        let payment = payment.clone();

        tx.commit().await?;

        info!(
            %booking_id,
            payment_id = %payment.id,
            amount = entry.amount,
            refund_type = %entry.refund_type,
            cumulative = payment.refund_amount,
            fully_refunded,
            "refund applied"
        );
        events::emit(&RefundAppliedEvent {
            booking_id,
            payment_id: payment.id,
            actor_id: entry.actor_id,
            amount: entry.amount,
            refund_type: entry.refund_type.to_string(),
            cumulative_refund: payment.refund_amount,
            booking_cancelled: fully_refunded,
            timestamp: now.timestamp(),
        });

        Ok(RefundOutcome { booking, payment, entry, released_seats })
    }

    /// Record money owed after a post-sale change made the booking cheaper.
    /// The obligation is disbursed later by a price-difference or full refund.
    pub async fn register_pending_refund(
        &self,
        booking_id: Uuid,
        request: PendingRefundRequest,
    ) -> OrderResult<Payment> {
        let mut tx = self.store.begin().await?;
        lock_paid_booking(tx.as_mut(), booking_id).await?;
        let mut payments = tx.payments_for_booking(booking_id).await?;
        let totals = totals(&payments).ok_or(OrderError::NoSucceededPayment(booking_id))?;

        let headroom = totals.remaining() - totals.pending_from_modification;
        if request.amount <= 0 || request.amount > headroom {
            return Err(OrderError::InvalidRefundAmount {
                requested: request.amount,
                refundable: headroom.max(0),
            });
        }

        let now = Utc::now();
        let payment = &mut payments[totals.original_index];
        payment.meta.pending_refunds.push(PendingRefund {
            id: Uuid::new_v4(),
            amount: request.amount,
            reason: request.reason,
            actor_id: request.actor_id,
            status: PendingRefundStatus::Pending,
            created_at: now,
            refunded_at: None,
            details: request.details,
        });
        payment.meta.total_pending_refund_from_modification += request.amount;
        payment.updated_at = now;
        tx.update_payment(payment).await?;
        let payment = payment.clone();

        tx.commit().await?;
        info!(
            %booking_id,
            amount = request.amount,
            pending = payment.meta.total_pending_refund_from_modification,
            "pending refund registered"
        );
        Ok(payment)
    }

    /// Mark a pending gateway payment failed. Settled payments are never
    /// downgraded. Returns `None` when no payment carries the reference.
    pub async fn mark_failed(
        &self,
        provider: &str,
        provider_txn_id: &str,
        failure_code: &str,
        failure_message: &str,
    ) -> OrderResult<Option<Payment>> {
        let mut tx = self.store.begin().await?;
        let Some(mut payment) = tx.lock_payment_by_provider_txn(provider, provider_txn_id).await? else {
            debug!(provider, provider_txn_id, "no payment for failed transaction");
            return Ok(None);
        };

        if payment.status != PaymentStatus::Pending {
            warn!(
                payment_id = %payment.id,
                status = %payment.status,
                failure_code,
                "ignoring failure notice for settled payment"
            );
            return Ok(Some(payment));
        }

        let now = Utc::now();
        payment.status = PaymentStatus::Failed;
        payment.failure_code = Some(failure_code.to_string());
        payment.failure_message = Some(failure_message.to_string());
        payment.updated_at = now;
        tx.update_payment(&payment).await?;
        tx.commit().await?;

        events::emit(&PaymentFailedEvent {
            payment_id: payment.id,
            booking_id: payment.booking_id,
            failure_code: payment.failure_code.clone(),
            timestamp: now.timestamp(),
        });
        Ok(Some(payment))
    }
}

async fn lock_paid_booking(tx: &mut dyn StoreTx, booking_id: Uuid) -> OrderResult<Booking> {
    let booking = tx
        .lock_booking(booking_id)
        .await?
        .ok_or(OrderError::BookingNotFound(booking_id))?;
    if booking.status != BookingStatus::Paid {
        return Err(OrderError::BookingNotPaid { booking_id, status: booking.status });
    }
    Ok(booking)
}

/// The original payment if the booking has one, otherwise a fresh one.
pub(crate) async fn ensure_payment_in(
    tx: &mut dyn StoreTx,
    booking: &Booking,
    now: DateTime<Utc>,
) -> OrderResult<Payment> {
    if let Some(existing) = tx.payments_for_booking(booking.id).await?.into_iter().next() {
        return Ok(existing);
    }

    let payment = Payment::initial(booking, now);
    tx.insert_payment(&payment).await?;
    debug!(booking_id = %booking.id, payment_id = %payment.id, amount = payment.amount, "payment recorded");
    Ok(payment)
}

fn full_refund_entry(
    meta: &mut PaymentMeta,
    totals: &PaymentTotals,
    request: &RefundRequest,
    now: DateTime<Utc>,
) -> OrderResult<RefundEntry> {
    let refundable = totals.remaining();
    let amount = request.amount.unwrap_or(refundable);
    if amount <= 0 || amount > refundable {
        return Err(OrderError::InvalidRefundAmount { requested: amount, refundable });
    }

    let pending = meta.total_pending_refund_from_modification;
    let modification_amount = if pending > 0 && amount >= pending {
        settle_pending(meta, now)
    } else {
        0
    };

    Ok(entry(request, amount, modification_amount, RefundType::FullBookingRefund, now))
}

fn price_difference_entry(
    meta: &mut PaymentMeta,
    totals: &PaymentTotals,
    request: &RefundRequest,
    booking_id: Uuid,
    now: DateTime<Utc>,
) -> OrderResult<RefundEntry> {
    let pending = meta.total_pending_refund_from_modification;
    if pending <= 0 {
        return Err(OrderError::NoPendingRefund(booking_id));
    }
    if pending > totals.remaining() {
        return Err(OrderError::InvalidRefundAmount {
            requested: pending,
            refundable: totals.remaining(),
        });
    }

    let amount = settle_pending(meta, now);
    Ok(entry(request, amount, amount, RefundType::PriceDifference, now))
}

/// Mark every pending entry refunded and zero the counter. Returns the
/// amount that was pending.
fn settle_pending(meta: &mut PaymentMeta, now: DateTime<Utc>) -> i64 {
    let pending = meta.total_pending_refund_from_modification;
    for p in meta
        .pending_refunds
        .iter_mut()
        .filter(|p| p.status == PendingRefundStatus::Pending)
    {
        p.status = PendingRefundStatus::Refunded;
        p.refunded_at = Some(now);
    }
    meta.total_pending_refund_from_modification = 0;
    pending
}

fn entry(
    request: &RefundRequest,
    amount: i64,
    modification_amount: i64,
    refund_type: RefundType,
    now: DateTime<Utc>,
) -> RefundEntry {
    RefundEntry {
        amount,
        reason: request.reason.clone(),
        actor_id: request.actor_id,
        refunded_at: now,
        method: if request.bank_info.is_some() {
            RefundMethod::BankTransfer
        } else {
            RefundMethod::Manual
        },
        refund_type,
        modification_amount,
        manual_amount: amount - modification_amount,
        bank_info: request.bank_info.clone(),
    }
}
