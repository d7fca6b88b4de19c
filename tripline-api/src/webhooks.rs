use axum::{extract::State, routing::post, Json, Router};
use serde_json::Value;
use tripline_order::WebhookOutcome;

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/webhooks/payos", post(handle_payos_webhook))
}

/// POST /v1/webhooks/payos
///
/// Deliveries are verified before anything is read or written. A redelivery
/// of an already materialized payment answers with the same booking.
pub async fn handle_payos_webhook(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<Json<WebhookOutcome>, AppError> {
    let order_code = payload.pointer("/data/orderCode").cloned().unwrap_or(Value::Null);
    tracing::info!(%order_code, "Received payment webhook");

    let outcome = state.checkout.handle_webhook(&payload).await?;
    Ok(Json(outcome))
}
