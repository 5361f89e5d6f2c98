// handlers/payment_handlers.rs
use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{error, info, warn};
use validator::Validate;

use crate::dtos::payment_dtos::{CheckStatusResponse, InitiatePushRequest, InitiatePushResponse};
use crate::errors::{AppError, Result};
use crate::models::mpesa::{callback_ack, notification_ack};
use crate::models::transaction::{
    NewTransaction, StatusUpdate, Transaction, TransactionStatus, TransactionView,
};
use crate::services::callback::handle_callback_payload;
use crate::state::AppState;

fn or_default(value: Option<String>, default: &str) -> String {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

pub async fn initiate_push(
    State(state): State<AppState>,
    payload: std::result::Result<Json<InitiatePushRequest>, JsonRejection>,
) -> Result<Json<InitiatePushResponse>> {
    let Json(request) = payload.map_err(|e| AppError::invalid_data(e.body_text()))?;
    request
        .validate()
        .map_err(|e| AppError::invalid_data(e.to_string()))?;

    let account_reference = or_default(request.account_reference, &state.config.default_account_reference);
    let description = or_default(request.transaction_desc, &state.config.default_transaction_desc);

    let push = state
        .gateway
        .initiate_push(
            &request.phone_number,
            &request.amount.as_text(),
            &account_reference,
            &description,
        )
        .await?;

    let provider = state.gateway.provider_name();
    let tx = Transaction::pending(
        NewTransaction {
            checkout_request_id: push.checkout_request_id.clone(),
            merchant_request_id: push.merchant_request_id.clone(),
            phone_number: push.phone_number.clone(),
            amount: push.amount,
            account_reference,
            description,
            response_description: Some(push.description.clone()),
            customer_message: push.customer_message.clone(),
            provider: provider.to_string(),
            environment: state.config.mpesa_environment.to_string(),
        },
        Utc::now(),
    );

    if let Err(e) = state.store.insert(tx).await {
        // The customer already has the prompt on their phone.
        error!(
            checkout_request_id = %push.checkout_request_id,
            error = %e,
            "Push accepted but transaction could not be stored"
        );
        return Err(e);
    }

    info!(checkout_request_id = %push.checkout_request_id, provider, "Pending transaction recorded");

    Ok(Json(InitiatePushResponse {
        success: true,
        checkout_request_id: push.checkout_request_id,
        merchant_request_id: push.merchant_request_id,
        response_description: push.description,
        customer_message: push.customer_message,
        phone_number: push.phone_number,
        amount: push.amount,
        provider,
    }))
}

pub async fn check_status(
    State(state): State<AppState>,
    Path(checkout_request_id): Path<String>,
) -> Result<Json<CheckStatusResponse>> {
    let tx = state
        .store
        .find_by_checkout_id(&checkout_request_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Transaction".to_string()))?;

    if tx.status != TransactionStatus::Pending {
        return Ok(Json(CheckStatusResponse::from_transaction(tx, false)));
    }

    if !state.gateway.issued(&tx) {
        warn!(
            checkout_request_id = %checkout_request_id,
            issued_by = %tx.provider,
            active = state.gateway.provider_name(),
            "Transaction belongs to another provider, returning stored state"
        );
        return Ok(Json(CheckStatusResponse::from_transaction(tx, false)));
    }

    let result = match state.gateway.query_status(&checkout_request_id).await {
        Ok(result) => result,
        Err(e) => {
            warn!(checkout_request_id = %checkout_request_id, error = %e, "Live status query failed, returning stored state");
            return Ok(Json(CheckStatusResponse::from_transaction(tx, false)));
        }
    };

    if result.status == TransactionStatus::Pending {
        return Ok(Json(CheckStatusResponse::from_transaction(tx, result.rate_limited)));
    }

    let update = if result.status == TransactionStatus::Completed {
        StatusUpdate::completed(result.receipt_number)
    } else {
        StatusUpdate::unsuccessful(
            result.status,
            result
                .result_desc
                .unwrap_or_else(|| format!("Provider reported {}", result.status)),
        )
    };

    let current = state
        .store
        .transition(&checkout_request_id, &update)
        .await?
        .transaction()
        .cloned()
        .unwrap_or(tx);

    Ok(Json(CheckStatusResponse::from_transaction(current, false)))
}

/// Acknowledges first; the payload is processed on a detached task.
pub async fn provider_callback(State(state): State<AppState>, body: Bytes) -> Json<Value> {
    match serde_json::from_slice::<Value>(&body) {
        Ok(payload) => {
            let store = state.store.clone();
            tokio::spawn(async move {
                handle_callback_payload(store.as_ref(), payload).await;
            });
        }
        Err(e) => error!(error = %e, bytes = body.len(), "STK callback body is not JSON"),
    }

    Json(callback_ack())
}

pub async fn list_transactions(State(state): State<AppState>) -> Result<Json<Value>> {
    let transactions: Vec<TransactionView> = state
        .store
        .list_recent()
        .await?
        .into_iter()
        .map(TransactionView::from)
        .collect();

    Ok(Json(json!({
        "success": true,
        "count": transactions.len(),
        "transactions": transactions,
    })))
}

pub async fn timeout_notification(body: Bytes) -> Json<Value> {
    warn!(payload = %String::from_utf8_lossy(&body), "M-Pesa timeout notification");
    Json(notification_ack("Timeout acknowledged"))
}

pub async fn result_notification(body: Bytes) -> Json<Value> {
    info!(payload = %String::from_utf8_lossy(&body), "M-Pesa result notification");
    Json(notification_ack("Result acknowledged"))
}
