// handlers/admin.rs
// Operator endpoints. Mounted only when ENABLE_ADMIN_ROUTES=true.
use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{info, warn};
use validator::Validate;

use crate::database::transaction_store::Transition;
use crate::dtos::payment_dtos::ConfirmPaymentRequest;
use crate::errors::{AppError, Result};
use crate::models::transaction::{StatusUpdate, TransactionView};
use crate::state::AppState;

pub async fn reset_circuit_breakers(State(state): State<AppState>) -> Json<Value> {
    state.gateway.reset_circuit_breakers();
    warn!("Circuit breakers reset by operator");

    Json(json!({
        "success": true,
        "message": "Circuit breakers reset",
        "gateway": state.gateway.health(),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// Records a receipt the customer quoted when the provider could not be asked.
pub async fn confirm_payment(
    State(state): State<AppState>,
    payload: std::result::Result<Json<ConfirmPaymentRequest>, JsonRejection>,
) -> Result<Json<Value>> {
    let Json(request) = payload.map_err(|e| AppError::invalid_data(e.body_text()))?;
    request
        .validate()
        .map_err(|e| AppError::invalid_data(e.to_string()))?;

    let update = StatusUpdate::completed(Some(request.receipt_number.trim().to_string()));
    match state.store.transition(&request.checkout_request_id, &update).await? {
        Transition::Applied(tx) => {
            info!(
                checkout_request_id = %tx.checkout_request_id,
                receipt = ?tx.receipt_number,
                "Payment confirmed manually"
            );
            Ok(Json(json!({
                "success": true,
                "message": "Payment confirmed",
                "transaction": TransactionView::from(tx),
            })))
        }
        Transition::Rejected(tx) => Ok(Json(json!({
            "success": false,
            "message": format!("Transaction already {}", tx.status),
            "transaction": TransactionView::from(tx),
        }))),
        Transition::NotFound => Err(AppError::NotFound("Transaction".to_string())),
    }
}
