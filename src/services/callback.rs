// services/callback.rs
use serde_json::Value;
use tracing::{error, info, warn};

use crate::database::transaction_store::{TransactionStore, Transition};
use crate::errors::{AppError, Result};
use crate::models::mpesa::{CallbackEnvelope, StkCallback};
use crate::models::transaction::{StatusUpdate, TransactionStatus};

#[derive(Debug, Clone, PartialEq)]
pub enum CallbackOutcome {
    Applied(TransactionStatus),
    /// The row was already final; duplicate or late delivery.
    Ignored(TransactionStatus),
    UnknownTransaction,
}

pub fn parse_callback(payload: Value) -> Result<StkCallback> {
    serde_json::from_value::<CallbackEnvelope>(payload)
        .map(|envelope| envelope.body.stk_callback)
        .map_err(|e| AppError::invalid_data(format!("malformed STK callback: {}", e)))
}

pub fn status_update_for(callback: &StkCallback) -> StatusUpdate {
    let status = TransactionStatus::from_result_code(&callback.result_code);
    if status == TransactionStatus::Completed {
        let metadata = callback.callback_metadata.clone().unwrap_or_default();
        return StatusUpdate {
            receipt_number: metadata.receipt_number(),
            confirmed_amount: metadata.number("Amount"),
            confirmed_phone: metadata.text("PhoneNumber"),
            transaction_date: metadata.text("TransactionDate"),
            ..StatusUpdate::completed(None)
        };
    }

    // Codes without a dedicated status still end the attempt.
    let status = if status == TransactionStatus::Pending {
        TransactionStatus::Failed
    } else {
        status
    };
    let reason = callback
        .result_desc
        .clone()
        .unwrap_or_else(|| format!("Provider result code {}", callback.result_code));
    StatusUpdate::unsuccessful(status, reason)
}

pub async fn process_callback(
    store: &dyn TransactionStore,
    callback: &StkCallback,
) -> Result<CallbackOutcome> {
    let checkout_request_id = callback.checkout_request_id.as_str();
    info!(
        checkout_request_id = %checkout_request_id,
        merchant_request_id = %callback.merchant_request_id,
        result_code = %callback.result_code,
        "Processing STK callback"
    );

    let update = status_update_for(callback);
    match store.transition(checkout_request_id, &update).await? {
        Transition::Applied(tx) => {
            info!(
                checkout_request_id = %checkout_request_id,
                status = %tx.status,
                receipt = ?tx.receipt_number,
                "Transaction updated from callback"
            );
            Ok(CallbackOutcome::Applied(tx.status))
        }
        Transition::Rejected(tx) => {
            info!(
                checkout_request_id = %checkout_request_id,
                status = %tx.status,
                "Callback ignored, transaction already final"
            );
            Ok(CallbackOutcome::Ignored(tx.status))
        }
        Transition::NotFound => {
            warn!(checkout_request_id = %checkout_request_id, "Callback for unknown transaction");
            Ok(CallbackOutcome::UnknownTransaction)
        }
    }
}

/// Post-acknowledgement path: every failure ends in the log.
pub async fn handle_callback_payload(store: &dyn TransactionStore, payload: Value) {
    let callback = match parse_callback(payload) {
        Ok(callback) => callback,
        Err(e) => {
            error!(error = %e, "Rejected STK callback payload");
            return;
        }
    };

    if let Err(e) = process_callback(store, &callback).await {
        error!(
            checkout_request_id = %callback.checkout_request_id,
            error = %e,
            "Failed to apply STK callback"
        );
    }
}
