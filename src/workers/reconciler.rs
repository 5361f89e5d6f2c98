//! Pending-transaction reconciler.
//!
//! Safety net for callbacks that never arrive. Every tick it walks the pending
//! rows: rows older than the pending timeout are closed as `timeout` without
//! asking the provider, the rest are re-queried through the provider that
//! issued them and any definitive answer is written through the store's
//! conditional transition. The callback handler may be writing the same rows
//! concurrently; whichever terminal write lands first wins.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::database::transaction_store::{TransactionStore, Transition};
use crate::errors::Result;
use crate::models::transaction::{StatusUpdate, Transaction, TransactionStatus};
use crate::services::gateway::PaymentGateway;

pub const TIMEOUT_REASON: &str = "Timed out after pending too long";

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub interval: Duration,
    pub pending_timeout: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(120),
            pending_timeout: Duration::from_secs(600),
        }
    }
}

impl From<&AppConfig> for ReconcilerConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            interval: config.reconcile_interval,
            pending_timeout: config.pending_timeout,
        }
    }
}

/// Counts from one pass over the pending rows.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleSummary {
    pub scanned: usize,
    pub timed_out: usize,
    pub resolved: usize,
    pub still_pending: usize,
    /// Rows issued by a provider other than the active one; left for the timeout.
    pub skipped: usize,
    pub errors: usize,
}

pub struct Reconciler {
    store: Arc<dyn TransactionStore>,
    gateway: Arc<dyn PaymentGateway>,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        gateway: Arc<dyn PaymentGateway>,
        config: ReconcilerConfig,
    ) -> Self {
        Self { store, gateway, config }
    }

    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            pending_timeout_secs = self.config.pending_timeout.as_secs(),
            "Pending transaction reconciler started"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    info!("Shutdown signal received, stopping reconciler");
                    break;
                }
                _ = ticker.tick() => {
                    match self.run_cycle().await {
                        Ok(summary) if summary.scanned > 0 => info!(?summary, "Reconciliation cycle finished"),
                        Ok(_) => debug!("No pending transactions"),
                        Err(e) => error!(error = %e, "Reconciliation cycle failed"),
                    }
                }
            }
        }
    }

    pub async fn run_cycle(&self) -> Result<CycleSummary> {
        self.run_cycle_at(Utc::now()).await
    }

    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> Result<CycleSummary> {
        let pending = self.store.list_pending().await?;
        let mut summary = CycleSummary {
            scanned: pending.len(),
            ..Default::default()
        };

        for tx in pending {
            match self.reconcile_one(&tx, now).await {
                Ok(Reconciled::TimedOut) => summary.timed_out += 1,
                Ok(Reconciled::Resolved) => summary.resolved += 1,
                Ok(Reconciled::StillPending) => summary.still_pending += 1,
                Ok(Reconciled::Skipped) => summary.skipped += 1,
                Err(e) => {
                    summary.errors += 1;
                    warn!(
                        checkout_request_id = %tx.checkout_request_id,
                        error = %e,
                        "Failed to reconcile transaction, continuing"
                    );
                }
            }
        }

        Ok(summary)
    }

    fn is_stale(&self, tx: &Transaction, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(tx.created_at);
        age.to_std().map(|age| age > self.config.pending_timeout).unwrap_or(false)
    }

    async fn reconcile_one(&self, tx: &Transaction, now: DateTime<Utc>) -> Result<Reconciled> {
        let id = tx.checkout_request_id.as_str();

        if self.is_stale(tx, now) {
            let update = StatusUpdate::unsuccessful(TransactionStatus::Timeout, TIMEOUT_REASON);
            let outcome = self.store.transition(id, &update).await?;
            if outcome.is_applied() {
                info!(checkout_request_id = %id, "Pending transaction timed out");
            }
            return Ok(Reconciled::TimedOut);
        }

        if !self.gateway.issued(tx) {
            warn!(
                checkout_request_id = %id,
                issued_by = %tx.provider,
                active = self.gateway.provider_name(),
                "Transaction belongs to another provider, not querying"
            );
            return Ok(Reconciled::Skipped);
        }

        let result = self.gateway.query_status(id).await?;
        if result.status == TransactionStatus::Pending {
            debug!(checkout_request_id = %id, rate_limited = result.rate_limited, "Still pending");
            return Ok(Reconciled::StillPending);
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

        match self.store.transition(id, &update).await? {
            Transition::Applied(updated) => {
                info!(checkout_request_id = %id, status = %updated.status, "Transaction reconciled");
            }
            Transition::Rejected(current) => {
                debug!(checkout_request_id = %id, status = %current.status, "Already settled elsewhere");
            }
            Transition::NotFound => {
                warn!(checkout_request_id = %id, "Transaction disappeared during reconciliation");
            }
        }
        Ok(Reconciled::Resolved)
    }
}

enum Reconciled {
    TimedOut,
    Resolved,
    StillPending,
    Skipped,
}
