// models/transaction.rs
use chrono::{DateTime, Utc};
use mongodb::bson::{self, oid::ObjectId};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
    Timeout,
    InsufficientFunds,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Cancelled => "cancelled",
            TransactionStatus::Timeout => "timeout",
            TransactionStatus::InsufficientFunds => "insufficient_funds",
        }
    }

    /// Every status except `pending` is final.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }

    /// Maps a definitive provider result code. Unknown codes stay `pending`.
    pub fn from_result_code(code: &str) -> Self {
        match code.trim() {
            "0" => TransactionStatus::Completed,
            "1032" => TransactionStatus::Cancelled,
            "1037" => TransactionStatus::Timeout,
            "1001" => TransactionStatus::InsufficientFunds,
            "1" => TransactionStatus::Failed,
            _ => TransactionStatus::Pending,
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One push-payment attempt, keyed by the provider's checkout request id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub checkout_request_id: String,
    pub merchant_request_id: String,
    pub phone_number: String,
    pub amount: f64,
    pub account_reference: String,
    #[serde(rename = "transactionDesc")]
    pub description: String,
    pub status: TransactionStatus,
    #[serde(rename = "mpesaReceiptNumber", default)]
    pub receipt_number: Option<String>,
    #[serde(default)]
    pub response_description: Option<String>,
    #[serde(default)]
    pub customer_message: Option<String>,
    pub provider: String,
    pub environment: String,

    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<bson::DateTime>,
    #[serde(default)]
    pub failed_at: Option<bson::DateTime>,
    #[serde(default)]
    pub failure_reason: Option<String>,

    // Confirmation details reported by the provider callback
    #[serde(default)]
    pub confirmed_amount: Option<f64>,
    #[serde(default)]
    pub confirmed_phone: Option<String>,
    #[serde(default)]
    pub transaction_date: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub checkout_request_id: String,
    pub merchant_request_id: String,
    pub phone_number: String,
    pub amount: f64,
    pub account_reference: String,
    pub description: String,
    pub response_description: Option<String>,
    pub customer_message: Option<String>,
    pub provider: String,
    pub environment: String,
}

impl Transaction {
    pub fn pending(new: NewTransaction, now: DateTime<Utc>) -> Self {
        Transaction {
            id: None,
            checkout_request_id: new.checkout_request_id,
            merchant_request_id: new.merchant_request_id,
            phone_number: new.phone_number,
            amount: new.amount,
            account_reference: new.account_reference,
            description: new.description,
            status: TransactionStatus::Pending,
            receipt_number: None,
            response_description: new.response_description,
            customer_message: new.customer_message,
            provider: new.provider,
            environment: new.environment,
            created_at: now,
            updated_at: now,
            completed_at: None,
            failed_at: None,
            failure_reason: None,
            confirmed_amount: None,
            confirmed_phone: None,
            transaction_date: None,
        }
    }

    /// Whether `update` may be written over this record.
    ///
    /// A pending row accepts any update. A completed row that is still missing its
    /// receipt accepts a later completion carrying one; every other terminal row is
    /// frozen.
    pub fn accepts(&self, update: &StatusUpdate) -> bool {
        match self.status {
            TransactionStatus::Pending => update.status != TransactionStatus::Pending,
            TransactionStatus::Completed => {
                update.status == TransactionStatus::Completed
                    && self.receipt_number.is_none()
                    && update.receipt_number.is_some()
            }
            _ => false,
        }
    }

    /// Applies `update` in place. Callers check [`Transaction::accepts`] first.
    pub fn apply(&mut self, update: &StatusUpdate, now: DateTime<Utc>) {
        let stamp = bson::DateTime::from_chrono(now);
        self.status = update.status;
        self.updated_at = now;
        if update.status == TransactionStatus::Completed {
            if update.receipt_number.is_some() {
                self.receipt_number = update.receipt_number.clone();
            }
            if self.completed_at.is_none() {
                self.completed_at = Some(stamp);
            }
            if update.confirmed_amount.is_some() {
                self.confirmed_amount = update.confirmed_amount;
            }
            if update.confirmed_phone.is_some() {
                self.confirmed_phone = update.confirmed_phone.clone();
            }
            if update.transaction_date.is_some() {
                self.transaction_date = update.transaction_date.clone();
            }
        } else {
            self.failure_reason = update.failure_reason.clone();
            self.failed_at = Some(stamp);
        }
    }
}

/// A status transition requested by the callback handler, the reconciler or a
/// manual confirmation.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: TransactionStatus,
    pub receipt_number: Option<String>,
    pub failure_reason: Option<String>,
    pub confirmed_amount: Option<f64>,
    pub confirmed_phone: Option<String>,
    pub transaction_date: Option<String>,
}

impl StatusUpdate {
    pub fn completed(receipt_number: Option<String>) -> Self {
        StatusUpdate {
            status: TransactionStatus::Completed,
            receipt_number,
            failure_reason: None,
            confirmed_amount: None,
            confirmed_phone: None,
            transaction_date: None,
        }
    }

    pub fn unsuccessful(status: TransactionStatus, reason: impl Into<String>) -> Self {
        StatusUpdate {
            status,
            receipt_number: None,
            failure_reason: Some(reason.into()),
            confirmed_amount: None,
            confirmed_phone: None,
            transaction_date: None,
        }
    }
}

/// Public JSON shape of a stored transaction.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionView {
    pub checkout_request_id: String,
    pub merchant_request_id: String,
    pub phone_number: String,
    pub amount: f64,
    pub account_reference: String,
    pub transaction_desc: String,
    pub status: TransactionStatus,
    pub receipt_number: Option<String>,
    pub provider: String,
    pub environment: String,
    pub failure_reason: Option<String>,
    pub confirmed_amount: Option<f64>,
    pub confirmed_phone: Option<String>,
    pub transaction_date: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl From<Transaction> for TransactionView {
    fn from(tx: Transaction) -> Self {
        TransactionView {
            checkout_request_id: tx.checkout_request_id,
            merchant_request_id: tx.merchant_request_id,
            phone_number: tx.phone_number,
            amount: tx.amount,
            account_reference: tx.account_reference,
            transaction_desc: tx.description,
            status: tx.status,
            receipt_number: tx.receipt_number,
            provider: tx.provider,
            environment: tx.environment,
            failure_reason: tx.failure_reason,
            confirmed_amount: tx.confirmed_amount,
            confirmed_phone: tx.confirmed_phone,
            transaction_date: tx.transaction_date,
            created_at: tx.created_at,
            updated_at: tx.updated_at,
            completed_at: tx.completed_at.map(|d| d.to_chrono()),
            failed_at: tx.failed_at.map(|d| d.to_chrono()),
        }
    }
}
