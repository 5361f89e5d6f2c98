// services/mock_gateway.rs
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::info;
use uuid::Uuid;

use crate::errors::Result;
use crate::models::transaction::TransactionStatus;
use crate::services::gateway::{GatewayHealth, PaymentGateway, PushResult, StatusResult};
use crate::services::validation::{normalize_phone_number, parse_amount};

/// Offline stand-in for the provider. Validates input exactly like the real
/// client, accepts every push and reports every query as paid.
#[derive(Debug, Default)]
pub struct MockGateway {
    pushes: AtomicUsize,
    queries: AtomicUsize,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_count(&self) -> usize {
        self.pushes.load(Ordering::SeqCst)
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    fn short_id() -> String {
        Uuid::new_v4().simple().to_string()
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    fn provider_name(&self) -> &'static str {
        "mock"
    }

    async fn initiate_push(
        &self,
        phone_number: &str,
        amount: &str,
        account_reference: &str,
        _description: &str,
    ) -> Result<PushResult> {
        let phone_number = normalize_phone_number(phone_number)?;
        let amount = parse_amount(amount)?;
        self.pushes.fetch_add(1, Ordering::SeqCst);

        let id = Self::short_id();
        info!(phone = %phone_number, amount, reference = %account_reference, "Mock STK Push accepted");

        Ok(PushResult {
            checkout_request_id: format!("ws_CO_mock_{}", id),
            merchant_request_id: format!("mock_merchant_{}", id),
            description: "Success. Request accepted for processing".to_string(),
            customer_message: Some("Success. Request accepted for processing".to_string()),
            phone_number,
            amount,
        })
    }

    async fn query_status(&self, checkout_request_id: &str) -> Result<StatusResult> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let receipt = format!("MOCK{}", &Self::short_id()[..8].to_uppercase());
        info!(checkout_request_id = %checkout_request_id, receipt = %receipt, "Mock status query");

        Ok(StatusResult {
            status: TransactionStatus::Completed,
            receipt_number: Some(receipt),
            result_code: Some("0".to_string()),
            result_desc: Some("The service request is processed successfully.".to_string()),
            rate_limited: false,
        })
    }

    fn health(&self) -> GatewayHealth {
        GatewayHealth {
            provider: self.provider_name(),
            environment: "mock".to_string(),
            token_breaker: None,
            stk_breaker: None,
            access_token_cached: false,
            token_expires_at: None,
            configured: true,
        }
    }

    fn reset_circuit_breakers(&self) {}
}
