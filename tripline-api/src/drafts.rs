use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use tripline_core::payment::PaymentLink;
use tripline_order::BookingGraph;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/drafts/{id}/payment-link", post(create_payment_link))
        .route("/v1/drafts/{id}/materialize", post(materialize_draft))
}

/// POST /v1/drafts/{id}/payment-link
pub async fn create_payment_link(
    State(state): State<AppState>,
    Path(draft_id): Path<Uuid>,
) -> Result<Json<PaymentLink>, AppError> {
    let link = state.checkout.create_payment_link(draft_id).await?;
    Ok(Json(link))
}

/// POST /v1/drafts/{id}/materialize
///
/// For drafts settled outside the hosted checkout. Repeating the call returns
/// the booking created the first time.
pub async fn materialize_draft(
    State(state): State<AppState>,
    Path(draft_id): Path<Uuid>,
) -> Result<Json<BookingGraph>, AppError> {
    let graph = state.materializer.materialize(draft_id).await?;
    Ok(Json(graph))
}
