// config.rs
use serde_json::json;
use std::env;
use std::fmt;
use std::time::Duration;
use tracing::{info, warn};

use crate::errors::{AppError, Result};

const PLACEHOLDER_MARKER: &str = "YOUR_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Sandbox,
    Production,
}

impl Environment {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            _ => Environment::Sandbox,
        }
    }

    /// Read ahead of the full config so logging is up before validation runs.
    pub fn from_env() -> Self {
        Self::parse(&env::var("MPESA_ENVIRONMENT").unwrap_or_default())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Sandbox => "sandbox",
            Environment::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which gateway implementation serves payments for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentProvider {
    Mpesa,
    Mock,
}

impl PaymentProvider {
    fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_lowercase().as_str() {
            "mpesa" | "" => Ok(PaymentProvider::Mpesa),
            "mock" | "test" => Ok(PaymentProvider::Mock),
            other => Err(AppError::configuration(format!(
                "PAYMENT_PROVIDER must be 'mpesa' or 'mock', got '{}'",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentProvider::Mpesa => "mpesa",
            PaymentProvider::Mock => "mock",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    MongoDb,
    Memory,
}

impl StorageBackend {
    fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_lowercase().as_str() {
            "mongodb" | "mongo" | "" => Ok(StorageBackend::MongoDb),
            "memory" => Ok(StorageBackend::Memory),
            other => Err(AppError::configuration(format!(
                "STORAGE_BACKEND must be 'mongodb' or 'memory', got '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MpesaUrls {
    pub auth_url: String,
    pub stk_push_url: String,
    pub stk_query_url: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub mpesa_consumer_key: String,
    pub mpesa_consumer_secret: String,
    pub mpesa_short_code: String,
    pub mpesa_passkey: String,
    pub mpesa_callback_url: String,
    pub mpesa_environment: Environment,
    pub mpesa_base_url: Option<String>,
    pub mpesa_transaction_type: String,
    pub mpesa_party_b: String,
    pub payment_provider: PaymentProvider,
    pub storage: StorageBackend,
    pub mongodb_uri: String,
    pub mongodb_database: String,
    pub host: String,
    pub port: u16,
    pub default_account_reference: String,
    pub default_transaction_desc: String,
    pub breaker_failure_threshold: u32,
    pub breaker_cooldown: Duration,
    pub token_safety_margin: Duration,
    pub token_retries: u32,
    pub push_retries: u32,
    pub retry_base_delay: Duration,
    pub token_timeout: Duration,
    pub push_timeout: Duration,
    pub query_timeout: Duration,
    pub reconcile_interval: Duration,
    pub pending_timeout: Duration,
    pub enable_admin_routes: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds and validates the configuration from any key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let get_or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());
        let parse_num = |key: &str, default: u64| -> Result<u64> {
            match get(key) {
                Some(raw) => raw
                    .parse::<u64>()
                    .map_err(|_| AppError::configuration(format!("{} must be a number, got '{}'", key, raw))),
                None => Ok(default),
            }
        };

        let mpesa_environment = Environment::parse(&get_or("MPESA_ENVIRONMENT", "sandbox"));
        let mpesa_short_code = get("MPESA_BUSINESS_SHORTCODE")
            .or_else(|| get("MPESA_SHORT_CODE"))
            .unwrap_or_default();
        let mpesa_party_b = get("MPESA_PARTY_B")
            .or_else(|| get("MPESA_TILL_NUMBER"))
            .unwrap_or_else(|| mpesa_short_code.clone());

        let port = parse_num("PORT", 3007)?;
        let port = u16::try_from(port)
            .map_err(|_| AppError::configuration(format!("PORT out of range: {}", port)))?;

        let config = AppConfig {
            mpesa_consumer_key: get("MPESA_CONSUMER_KEY").unwrap_or_default(),
            mpesa_consumer_secret: get("MPESA_CONSUMER_SECRET").unwrap_or_default(),
            mpesa_short_code,
            mpesa_passkey: get("MPESA_PASSKEY").unwrap_or_default(),
            mpesa_callback_url: get("MPESA_CALLBACK_URL").unwrap_or_default(),
            mpesa_environment,
            mpesa_base_url: get("MPESA_BASE_URL").map(|url| url.trim_end_matches('/').to_string()),
            mpesa_transaction_type: get_or("MPESA_TRANSACTION_TYPE", "CustomerPayBillOnline"),
            mpesa_party_b,
            payment_provider: PaymentProvider::parse(&get_or("PAYMENT_PROVIDER", "mpesa"))?,
            storage: StorageBackend::parse(&get_or("STORAGE_BACKEND", "mongodb"))?,
            mongodb_uri: get_or("MONGODB_URI", "mongodb://localhost:27017"),
            mongodb_database: get_or("MONGODB_DATABASE", "mpesa"),
            host: get_or("HOST", "0.0.0.0"),
            port,
            default_account_reference: get_or("DEFAULT_ACCOUNT_REFERENCE", "MKOPAJI"),
            default_transaction_desc: get_or("DEFAULT_TRANSACTION_DESC", "Loan Processing Fee"),
            breaker_failure_threshold: parse_num("CIRCUIT_BREAKER_THRESHOLD", 5)?.max(1) as u32,
            breaker_cooldown: Duration::from_secs(parse_num("CIRCUIT_BREAKER_COOLDOWN_SECS", 60)?),
            token_safety_margin: Duration::from_secs(parse_num("TOKEN_SAFETY_MARGIN_SECS", 60)?),
            token_retries: parse_num("TOKEN_RETRIES", 3)? as u32,
            push_retries: parse_num("STK_PUSH_RETRIES", 2)? as u32,
            retry_base_delay: Duration::from_millis(parse_num("RETRY_BASE_DELAY_MS", 1000)?),
            token_timeout: Duration::from_secs(parse_num("TOKEN_TIMEOUT_SECS", 10)?),
            push_timeout: Duration::from_secs(parse_num("STK_PUSH_TIMEOUT_SECS", 30)?),
            query_timeout: Duration::from_secs(parse_num("STK_QUERY_TIMEOUT_SECS", 15)?),
            reconcile_interval: Duration::from_secs(parse_num("RECONCILE_INTERVAL_SECS", 120)?.max(1)),
            pending_timeout: Duration::from_secs(parse_num("PENDING_TIMEOUT_SECS", 600)?),
            enable_admin_routes: matches!(
                get_or("ENABLE_ADMIN_ROUTES", "false").to_lowercase().as_str(),
                "true" | "1" | "yes"
            ),
        };

        config.validate()?;
        Ok(config)
    }

    /// Production refuses to start with incomplete credentials; sandbox only warns.
    fn validate(&self) -> Result<()> {
        if self.payment_provider == PaymentProvider::Mock {
            if self.is_production() {
                return Err(AppError::configuration(
                    "the mock payment provider cannot run in production",
                ));
            }
            info!("Mock payment provider selected, skipping M-Pesa credential checks");
            return Ok(());
        }

        let missing = self.missing_fields();
        if missing.is_empty() {
            info!(environment = %self.mpesa_environment, "M-Pesa configuration validated");
        } else if self.is_production() {
            return Err(AppError::configuration(format!(
                "production requires all credentials, missing or placeholder: {}",
                missing.join(", ")
            )));
        } else {
            for field in &missing {
                warn!(field = %field, "M-Pesa configuration value missing or placeholder");
            }
        }

        if self.is_production() && !self.mpesa_callback_url.starts_with("https://") {
            return Err(AppError::configuration(
                "production callback URL must use HTTPS",
            ));
        }

        Ok(())
    }

    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("consumerKey", &self.mpesa_consumer_key),
            ("consumerSecret", &self.mpesa_consumer_secret),
            ("shortCode", &self.mpesa_short_code),
            ("passkey", &self.mpesa_passkey),
            ("callbackUrl", &self.mpesa_callback_url),
        ]
        .into_iter()
        .filter(|(_, value)| value.is_empty() || value.contains(PLACEHOLDER_MARKER))
        .map(|(name, _)| name)
        .collect()
    }

    pub fn is_configured(&self) -> bool {
        self.payment_provider == PaymentProvider::Mock || self.missing_fields().is_empty()
    }

    pub fn is_production(&self) -> bool {
        self.mpesa_environment == Environment::Production
    }

    pub fn mpesa_urls(&self) -> MpesaUrls {
        let base_url = match &self.mpesa_base_url {
            Some(url) => url.as_str(),
            None if self.is_production() => "https://api.safaricom.co.ke",
            None => "https://sandbox.safaricom.co.ke",
        };

        MpesaUrls {
            auth_url: format!("{}/oauth/v1/generate?grant_type=client_credentials", base_url),
            stk_push_url: format!("{}/mpesa/stkpush/v1/processrequest", base_url),
            stk_query_url: format!("{}/mpesa/stkpushquery/v1/query", base_url),
        }
    }

    pub fn config_info(&self) -> serde_json::Value {
        json!({
            "environment": self.mpesa_environment.as_str(),
            "is_production": self.is_production(),
            "provider": self.payment_provider.as_str(),
            "business_shortcode": self.mpesa_short_code,
            "transaction_type": self.mpesa_transaction_type,
            "callback_url": self.mpesa_callback_url,
            "consumer_key_set": !self.mpesa_consumer_key.is_empty(),
            "consumer_secret_set": !self.mpesa_consumer_secret.is_empty(),
            "passkey_set": !self.mpesa_passkey.is_empty(),
            "missing_fields": self.missing_fields(),
            "configured": self.is_configured(),
        })
    }
}
