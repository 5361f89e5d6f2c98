use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::transaction::{Transaction, TransactionStatus};

/// Clients send the amount either as `"10"` or `10`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AmountInput {
    Text(String),
    Number(serde_json::Number),
}

impl AmountInput {
    pub fn as_text(&self) -> String {
        match self {
            AmountInput::Text(s) => s.clone(),
            AmountInput::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct InitiatePushRequest {
    #[validate(length(min = 1, message = "phoneNumber is required"))]
    pub phone_number: String,

    pub amount: AmountInput,

    #[validate(length(max = 12, message = "accountReference must be at most 12 characters"))]
    pub account_reference: Option<String>,

    #[validate(length(max = 13, message = "transactionDesc must be at most 13 characters"))]
    pub transaction_desc: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiatePushResponse {
    pub success: bool,
    pub checkout_request_id: String,
    pub merchant_request_id: String,
    pub response_description: String,
    pub customer_message: Option<String>,
    pub phone_number: String,
    pub amount: f64,
    pub provider: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckStatusResponse {
    pub success: bool,
    pub checkout_request_id: String,
    pub status: TransactionStatus,
    pub receipt_number: Option<String>,
    pub amount: f64,
    pub phone_number: String,
    pub failure_reason: Option<String>,
    /// When the push was recorded.
    pub timestamp: String,
    pub updated_at: String,
    pub rate_limited: bool,
}

impl CheckStatusResponse {
    pub fn from_transaction(tx: Transaction, rate_limited: bool) -> Self {
        CheckStatusResponse {
            success: true,
            checkout_request_id: tx.checkout_request_id,
            status: tx.status,
            receipt_number: tx.receipt_number,
            amount: tx.amount,
            phone_number: tx.phone_number,
            failure_reason: tx.failure_reason,
            timestamp: tx.created_at.to_rfc3339(),
            updated_at: tx.updated_at.to_rfc3339(),
            rate_limited,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmPaymentRequest {
    #[validate(length(min = 1, message = "checkoutRequestId is required"))]
    pub checkout_request_id: String,

    #[validate(length(min = 1, message = "receiptNumber is required"))]
    pub receipt_number: String,
}
