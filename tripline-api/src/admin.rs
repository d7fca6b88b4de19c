use axum::{
    extract::{Path, State},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tripline_order::{
    BankInfo, BookingGraph, BookingStatus, Payment, PendingRefundRequest, RefundOutcome,
    RefundPolicy, RefundRequest, RefundScope, SeatLock,
};
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::{admin_auth_middleware, AdminClaims};
use crate::state::AppState;

pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/v1/admin/bookings/{id}", get(get_booking))
        .route("/v1/admin/bookings/{id}/refund-policy", get(get_refund_policy))
        .route("/v1/admin/bookings/{id}/refunds", post(apply_refund))
        .route("/v1/admin/bookings/{id}/pending-refunds", post(register_pending_refund))
        .route("/v1/admin/bookings/{id}/seats/release", post(release_seats))
        .route_layer(axum::middleware::from_fn_with_state(state, admin_auth_middleware))
}

fn actor_id(claims: &AdminClaims) -> Result<i64, AppError> {
    claims
        .actor_id()
        .ok_or_else(|| AppError::AuthenticationError("Token subject is not a user id".into()))
}

#[derive(Debug, Serialize)]
pub struct BookingDetail {
    #[serde(flatten)]
    pub graph: BookingGraph,
    pub payments: Vec<Payment>,
    pub seat_locks: Vec<SeatLock>,
}

/// GET /v1/admin/bookings/{id}
pub async fn get_booking(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<BookingDetail>, AppError> {
    let graph = state.materializer.load_booking(booking_id).await?;
    let payments = state.payments.payments_for(booking_id).await?;
    let seat_locks = state.seats.locks_for_booking(booking_id).await?;

    Ok(Json(BookingDetail { graph, payments, seat_locks }))
}

/// GET /v1/admin/bookings/{id}/refund-policy
pub async fn get_refund_policy(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<RefundPolicy>, AppError> {
    Ok(Json(state.policy.policy(booking_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct RefundBody {
    #[serde(default = "default_scope")]
    pub scope: RefundScope,
    pub amount: Option<i64>,
    pub reason: Option<String>,
    pub bank_info: Option<BankInfo>,
}

fn default_scope() -> RefundScope {
    RefundScope::Full
}

/// POST /v1/admin/bookings/{id}/refunds
pub async fn apply_refund(
    State(state): State<AppState>,
    Extension(claims): Extension<AdminClaims>,
    Path(booking_id): Path<Uuid>,
    Json(body): Json<RefundBody>,
) -> Result<Json<RefundOutcome>, AppError> {
    let request = RefundRequest {
        actor_id: actor_id(&claims)?,
        amount: body.amount,
        reason: body.reason,
        bank_info: body.bank_info,
    };

    tracing::info!(%booking_id, actor = request.actor_id, scope = ?body.scope, "Admin refund requested");
    let outcome = match body.scope {
        RefundScope::Full => state.payments.refund(booking_id, request).await?,
        RefundScope::PriceDifference => state.payments.refund_price_difference(booking_id, request).await?,
    };
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct PendingRefundBody {
    pub amount: i64,
    pub reason: Option<String>,
    #[serde(default)]
    pub details: Value,
}

/// POST /v1/admin/bookings/{id}/pending-refunds
pub async fn register_pending_refund(
    State(state): State<AppState>,
    Extension(claims): Extension<AdminClaims>,
    Path(booking_id): Path<Uuid>,
    Json(body): Json<PendingRefundBody>,
) -> Result<Json<Payment>, AppError> {
    let request = PendingRefundRequest {
        actor_id: actor_id(&claims)?,
        amount: body.amount,
        reason: body.reason,
        details: body.details,
    };
    Ok(Json(state.payments.register_pending_refund(booking_id, request).await?))
}

/// POST /v1/admin/bookings/{id}/seats/release
///
/// Frees seats still marked for a cancelled booking. Paid bookings keep
/// their seats.
pub async fn release_seats(
    State(state): State<AppState>,
    Extension(claims): Extension<AdminClaims>,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let graph = state.materializer.load_booking(booking_id).await?;
    if graph.booking.status != BookingStatus::Cancelled {
        return Err(AppError::ConflictError(format!(
            "Booking {} is {}, only cancelled bookings release seats",
            booking_id, graph.booking.status
        )));
    }

    let released = state.seats.release(booking_id).await?;
    tracing::info!(%booking_id, actor = %claims.sub, released, "Seats released by admin");
    Ok(Json(json!({ "booking_id": booking_id, "released": released })))
}
