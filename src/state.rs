use std::sync::Arc;

use crate::config::AppConfig;
use crate::database::transaction_store::TransactionStore;
use crate::services::gateway::PaymentGateway;

/// Handles shared by every request handler. Built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub store: Arc<dyn TransactionStore>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        gateway: Arc<dyn PaymentGateway>,
        store: Arc<dyn TransactionStore>,
    ) -> Self {
        AppState {
            config: Arc::new(config),
            gateway,
            store,
        }
    }
}
