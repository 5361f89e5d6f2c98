// database/transaction_store.rs
use async_trait::async_trait;
use chrono::Utc;
use futures_util::TryStreamExt;
use mongodb::{
    bson::{doc, Bson, Document},
    options::IndexOptions,
    Collection, Database, IndexModel,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::errors::{AppError, Result};
use crate::models::transaction::{StatusUpdate, Transaction, TransactionStatus};

pub const TRANSACTIONS_COLLECTION: &str = "transactions";

// Concurrent writers that lose the compare-and-set re-read and try again.
const MAX_CAS_ATTEMPTS: usize = 5;

/// What a conditional status write did.
#[derive(Debug, Clone)]
pub enum Transition {
    /// The update was written; carries the stored row after the write.
    Applied(Transaction),
    /// The row had already moved past the state the update may overwrite.
    Rejected(Transaction),
    NotFound,
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied(_))
    }

    pub fn transaction(&self) -> Option<&Transaction> {
        match self {
            Transition::Applied(tx) | Transition::Rejected(tx) => Some(tx),
            Transition::NotFound => None,
        }
    }
}

/// Persistence for push-payment attempts keyed by checkout request id.
///
/// `transition` is the only way a stored status changes. It writes the update
/// only when [`Transaction::accepts`] holds against the row as stored at the
/// moment of the write.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn insert(&self, tx: Transaction) -> Result<Transaction>;

    async fn find_by_checkout_id(&self, checkout_request_id: &str) -> Result<Option<Transaction>>;

    /// Every transaction, newest first.
    async fn list_recent(&self) -> Result<Vec<Transaction>>;

    /// Pending transactions, oldest first.
    async fn list_pending(&self) -> Result<Vec<Transaction>>;

    async fn transition(&self, checkout_request_id: &str, update: &StatusUpdate) -> Result<Transition>;
}

/// Matches the stored row only while it still looks like `current`.
/// `accepts` never passes for a row that already carries a receipt, so the
/// receipt must still be unset at write time.
fn cas_filter(current: &Transaction) -> Document {
    doc! {
        "checkoutRequestId": current.checkout_request_id.as_str(),
        "status": current.status.as_str(),
        "mpesaReceiptNumber": Bson::Null,
    }
}

#[derive(Clone)]
pub struct MongoTransactionStore {
    collection: Collection<Transaction>,
}

impl MongoTransactionStore {
    pub fn new(db: &Database) -> Self {
        MongoTransactionStore {
            collection: db.collection::<Transaction>(TRANSACTIONS_COLLECTION),
        }
    }

    pub async fn ensure_indexes(&self) -> Result<()> {
        let unique_checkout = IndexModel::builder()
            .keys(doc! { "checkoutRequestId": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        let by_status = IndexModel::builder()
            .keys(doc! { "status": 1, "createdAt": 1 })
            .build();

        self.collection.create_index(unique_checkout).await?;
        self.collection.create_index(by_status).await?;
        info!(collection = TRANSACTIONS_COLLECTION, "Transaction indexes ensured");
        Ok(())
    }
}

#[async_trait]
impl TransactionStore for MongoTransactionStore {
    async fn insert(&self, mut tx: Transaction) -> Result<Transaction> {
        let result = self.collection.insert_one(&tx).await?;
        if let Bson::ObjectId(id) = result.inserted_id {
            tx.id = Some(id);
        }
        debug!(checkout_request_id = %tx.checkout_request_id, "Transaction stored");
        Ok(tx)
    }

    async fn find_by_checkout_id(&self, checkout_request_id: &str) -> Result<Option<Transaction>> {
        Ok(self
            .collection
            .find_one(doc! { "checkoutRequestId": checkout_request_id })
            .await?)
    }

    async fn list_recent(&self) -> Result<Vec<Transaction>> {
        let cursor = self
            .collection
            .find(doc! {})
            .sort(doc! { "createdAt": -1 })
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn list_pending(&self) -> Result<Vec<Transaction>> {
        let cursor = self
            .collection
            .find(doc! { "status": TransactionStatus::Pending.as_str() })
            .sort(doc! { "createdAt": 1 })
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn transition(&self, checkout_request_id: &str, update: &StatusUpdate) -> Result<Transition> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let Some(current) = self.find_by_checkout_id(checkout_request_id).await? else {
                return Ok(Transition::NotFound);
            };
            if !current.accepts(update) {
                return Ok(Transition::Rejected(current));
            }

            let mut next = current.clone();
            next.apply(update, Utc::now());

            let result = self.collection.replace_one(cas_filter(&current), &next).await?;
            if result.matched_count == 1 {
                return Ok(Transition::Applied(next));
            }
            debug!(checkout_request_id = %checkout_request_id, "Concurrent status write, re-reading");
        }

        warn!(checkout_request_id = %checkout_request_id, "Gave up on contended status write");
        Err(AppError::store(format!(
            "status write for {} kept losing to concurrent writers",
            checkout_request_id
        )))
    }
}

/// Process-local store; contents are lost on restart.
#[derive(Default, Clone)]
pub struct InMemoryTransactionStore {
    transactions: Arc<RwLock<HashMap<String, Transaction>>>,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn insert(&self, tx: Transaction) -> Result<Transaction> {
        let mut transactions = self.transactions.write().await;
        if transactions.contains_key(&tx.checkout_request_id) {
            return Err(AppError::store(format!(
                "duplicate checkoutRequestId {}",
                tx.checkout_request_id
            )));
        }
        transactions.insert(tx.checkout_request_id.clone(), tx.clone());
        Ok(tx)
    }

    async fn find_by_checkout_id(&self, checkout_request_id: &str) -> Result<Option<Transaction>> {
        let transactions = self.transactions.read().await;
        Ok(transactions.get(checkout_request_id).cloned())
    }

    async fn list_recent(&self) -> Result<Vec<Transaction>> {
        let transactions = self.transactions.read().await;
        let mut all: Vec<Transaction> = transactions.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    async fn list_pending(&self) -> Result<Vec<Transaction>> {
        let transactions = self.transactions.read().await;
        let mut pending: Vec<Transaction> = transactions
            .values()
            .filter(|tx| tx.status == TransactionStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(pending)
    }

    async fn transition(&self, checkout_request_id: &str, update: &StatusUpdate) -> Result<Transition> {
        // The write lock makes check-and-apply a single step.
        let mut transactions = self.transactions.write().await;
        let Some(current) = transactions.get_mut(checkout_request_id) else {
            return Ok(Transition::NotFound);
        };
        if !current.accepts(update) {
            return Ok(Transition::Rejected(current.clone()));
        }
        current.apply(update, Utc::now());
        Ok(Transition::Applied(current.clone()))
    }
}
