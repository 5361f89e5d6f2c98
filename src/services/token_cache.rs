// services/token_cache.rs
use chrono::{DateTime, Utc};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct CachedToken {
    pub token: String,
    /// Already reduced by the safety margin.
    pub expires_at: DateTime<Utc>,
}

/// Process-wide bearer credential. Reads and writes never span an await.
#[derive(Debug, Default)]
pub struct TokenCache {
    cached: RwLock<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<CachedToken>> {
        self.cached.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<CachedToken>> {
        self.cached.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self) -> Option<String> {
        self.get_at(Utc::now())
    }

    pub fn get_at(&self, now: DateTime<Utc>) -> Option<String> {
        self.read()
            .as_ref()
            .filter(|cached| now < cached.expires_at)
            .map(|cached| cached.token.clone())
    }

    pub fn store(&self, token: String, provider_ttl: Duration, safety_margin: Duration) -> CachedToken {
        self.store_at(token, provider_ttl, safety_margin, Utc::now())
    }

    pub fn store_at(
        &self,
        token: String,
        provider_ttl: Duration,
        safety_margin: Duration,
        now: DateTime<Utc>,
    ) -> CachedToken {
        let usable = provider_ttl.saturating_sub(safety_margin);
        let usable = chrono::Duration::from_std(usable).unwrap_or_else(|_| chrono::Duration::zero());
        let cached = CachedToken {
            token,
            expires_at: now + usable,
        };
        *self.write() = Some(cached.clone());
        cached
    }

    pub fn invalidate(&self) {
        *self.write() = None;
    }

    pub fn is_present(&self) -> bool {
        self.read().is_some()
    }

    pub fn snapshot(&self) -> Option<CachedToken> {
        self.read().clone()
    }
}
