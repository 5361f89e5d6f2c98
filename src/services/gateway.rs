// services/gateway.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::errors::Result;
use crate::models::transaction::{Transaction, TransactionStatus};
use crate::services::circuit_breaker::BreakerStatus;

/// An accepted push: the provider now owns the attempt under `checkout_request_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct PushResult {
    pub checkout_request_id: String,
    pub merchant_request_id: String,
    pub description: String,
    pub customer_message: Option<String>,
    /// Normalized form of the payer's number.
    pub phone_number: String,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusResult {
    pub status: TransactionStatus,
    pub receipt_number: Option<String>,
    pub result_code: Option<String>,
    pub result_desc: Option<String>,
    /// Provider throttled the query; the status is a placeholder `pending`.
    pub rate_limited: bool,
}

impl StatusResult {
    pub fn pending() -> Self {
        StatusResult {
            status: TransactionStatus::Pending,
            receipt_number: None,
            result_code: None,
            result_desc: None,
            rate_limited: false,
        }
    }

    pub fn rate_limited() -> Self {
        StatusResult {
            rate_limited: true,
            ..StatusResult::pending()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayHealth {
    pub provider: &'static str,
    pub environment: String,
    pub token_breaker: Option<BreakerStatus>,
    pub stk_breaker: Option<BreakerStatus>,
    pub access_token_cached: bool,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub configured: bool,
}

/// Capability set of a push-payment provider. One implementation is chosen at
/// startup and serves every transaction for the life of the process.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn provider_name(&self) -> &'static str;

    /// Only the provider that issued a checkout id may be asked about it.
    fn issued(&self, tx: &Transaction) -> bool {
        tx.provider == self.provider_name()
    }

    async fn initiate_push(
        &self,
        phone_number: &str,
        amount: &str,
        account_reference: &str,
        description: &str,
    ) -> Result<PushResult>;

    async fn query_status(&self, checkout_request_id: &str) -> Result<StatusResult>;

    fn health(&self) -> GatewayHealth;

    fn reset_circuit_breakers(&self);
}
