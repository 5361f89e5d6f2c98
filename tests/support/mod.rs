#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use loan_fee_api::config::AppConfig;
use loan_fee_api::errors::{AppError, Result};
use loan_fee_api::models::transaction::{NewTransaction, Transaction, TransactionStatus};
use loan_fee_api::services::gateway::{GatewayHealth, PaymentGateway, PushResult, StatusResult};

pub const SHORT_CODE: &str = "174379";
pub const PASSKEY: &str = "test-passkey";
pub const CONSUMER_KEY: &str = "test-key";
pub const CONSUMER_SECRET: &str = "test-secret";

/// Builds a validated config from test defaults plus `overrides`.
pub fn config_with(overrides: &[(&str, &str)]) -> AppConfig {
    let mut vars: HashMap<String, String> = [
        ("MPESA_CONSUMER_KEY", CONSUMER_KEY),
        ("MPESA_CONSUMER_SECRET", CONSUMER_SECRET),
        ("MPESA_BUSINESS_SHORTCODE", SHORT_CODE),
        ("MPESA_PASSKEY", PASSKEY),
        ("MPESA_CALLBACK_URL", "https://example.com/api/provider-callback"),
        ("MPESA_ENVIRONMENT", "sandbox"),
        ("STORAGE_BACKEND", "memory"),
        ("RETRY_BASE_DELAY_MS", "1"),
        ("TOKEN_TIMEOUT_SECS", "5"),
        ("STK_PUSH_TIMEOUT_SECS", "5"),
        ("STK_QUERY_TIMEOUT_SECS", "5"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    for (key, value) in overrides {
        vars.insert(key.to_string(), value.to_string());
    }

    AppConfig::from_lookup(|key| vars.get(key).cloned()).expect("test config is valid")
}

pub fn mock_provider_config(overrides: &[(&str, &str)]) -> AppConfig {
    let mut all = vec![("PAYMENT_PROVIDER", "mock")];
    all.extend_from_slice(overrides);
    config_with(&all)
}

pub fn pending_transaction(checkout_request_id: &str, age_secs: i64) -> Transaction {
    issued_transaction("mpesa", checkout_request_id, age_secs)
}

pub fn issued_transaction(provider: &str, checkout_request_id: &str, age_secs: i64) -> Transaction {
    Transaction::pending(
        NewTransaction {
            checkout_request_id: checkout_request_id.to_string(),
            merchant_request_id: format!("mr-{}", checkout_request_id),
            phone_number: "254712345678".to_string(),
            amount: 10.0,
            account_reference: "REF1".to_string(),
            description: "desc".to_string(),
            response_description: None,
            customer_message: None,
            provider: provider.to_string(),
            environment: "sandbox".to_string(),
        },
        Utc::now() - ChronoDuration::seconds(age_secs),
    )
}

pub fn stk_callback(checkout_request_id: &str, result_code: i64, receipt: Option<&str>) -> Value {
    let result_desc = if result_code == 0 {
        "The service request is processed successfully."
    } else {
        "Request cancelled by user"
    };
    let mut stk = json!({
        "MerchantRequestID": format!("mr-{}", checkout_request_id),
        "CheckoutRequestID": checkout_request_id,
        "ResultCode": result_code,
        "ResultDesc": result_desc,
    });
    if let Some(receipt) = receipt {
        stk["CallbackMetadata"] = json!({
            "Item": [
                {"Name": "Amount", "Value": 10.0},
                {"Name": "MpesaReceiptNumber", "Value": receipt},
                {"Name": "Balance"},
                {"Name": "TransactionDate", "Value": 20240115103000u64},
                {"Name": "PhoneNumber", "Value": 254712345678u64}
            ]
        });
    }
    json!({ "Body": { "stkCallback": stk } })
}

// ---------------------------------------------------------------------------
// In-process stand-in for the Daraja API
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum QueryMode {
    Result { code: String, receipt: Option<String> },
    Accepted,
    RateLimited,
    StillProcessing,
    ServerError,
}

#[derive(Debug)]
pub struct DarajaState {
    pub token_calls: AtomicUsize,
    pub push_calls: AtomicUsize,
    pub query_calls: AtomicUsize,
    issued_tokens: AtomicUsize,
    /// Token requests answered with HTTP 500 before succeeding.
    pub token_failures: AtomicUsize,
    /// Push requests answered with HTTP 503 before succeeding.
    pub push_failures: AtomicUsize,
    pub reject_push_auth_once: AtomicBool,
    pub push_override: Mutex<Option<(u16, Value)>>,
    pub query_mode: Mutex<QueryMode>,
    pub last_token_auth: Mutex<Option<String>>,
    pub last_bearer: Mutex<Option<String>>,
    pub last_push_body: Mutex<Option<Value>>,
    pub last_query_body: Mutex<Option<Value>>,
}

impl Default for DarajaState {
    fn default() -> Self {
        DarajaState {
            token_calls: AtomicUsize::new(0),
            push_calls: AtomicUsize::new(0),
            query_calls: AtomicUsize::new(0),
            issued_tokens: AtomicUsize::new(0),
            token_failures: AtomicUsize::new(0),
            push_failures: AtomicUsize::new(0),
            reject_push_auth_once: AtomicBool::new(false),
            push_override: Mutex::new(None),
            query_mode: Mutex::new(QueryMode::Accepted),
            last_token_auth: Mutex::new(None),
            last_bearer: Mutex::new(None),
            last_push_body: Mutex::new(None),
            last_query_body: Mutex::new(None),
        }
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn auth_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

async fn token_endpoint(State(state): State<Arc<DarajaState>>, headers: HeaderMap) -> Response {
    state.token_calls.fetch_add(1, Ordering::SeqCst);
    *state.last_token_auth.lock().unwrap() = auth_header(&headers);

    if take_one(&state.token_failures) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "token service down").into_response();
    }

    let n = state.issued_tokens.fetch_add(1, Ordering::SeqCst) + 1;
    Json(json!({
        "access_token": format!("token-{}", n),
        "expires_in": "3599"
    }))
    .into_response()
}

async fn push_endpoint(
    State(state): State<Arc<DarajaState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let n = state.push_calls.fetch_add(1, Ordering::SeqCst) + 1;
    *state.last_bearer.lock().unwrap() = auth_header(&headers);
    *state.last_push_body.lock().unwrap() = Some(body);

    if state.reject_push_auth_once.swap(false, Ordering::SeqCst) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"errorCode": "404.001.04", "errorMessage": "Invalid Access Token"})),
        )
            .into_response();
    }
    if take_one(&state.push_failures) {
        return (StatusCode::SERVICE_UNAVAILABLE, "upstream unavailable").into_response();
    }
    if let Some((status, body)) = state.push_override.lock().unwrap().clone() {
        let status = StatusCode::from_u16(status).unwrap();
        return (status, Json(body)).into_response();
    }

    Json(json!({
        "MerchantRequestID": format!("mr-{}", n),
        "CheckoutRequestID": format!("ws_CO_{}", n),
        "ResponseCode": "0",
        "ResponseDescription": "Success. Request accepted for processing",
        "CustomerMessage": "Success. Request accepted for processing"
    }))
    .into_response()
}

async fn query_endpoint(
    State(state): State<Arc<DarajaState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.query_calls.fetch_add(1, Ordering::SeqCst);
    *state.last_bearer.lock().unwrap() = auth_header(&headers);
    let checkout_request_id = body["CheckoutRequestID"].clone();
    *state.last_query_body.lock().unwrap() = Some(body);

    let mode = state.query_mode.lock().unwrap().clone();
    match mode {
        QueryMode::Result { code, receipt } => {
            let mut response = json!({
                "ResponseCode": "0",
                "ResponseDescription": "The service request has been accepted successsfully",
                "MerchantRequestID": "mr-1",
                "CheckoutRequestID": checkout_request_id,
                "ResultCode": code,
                "ResultDesc": "Result from provider"
            });
            if let Some(receipt) = receipt {
                response["CallbackMetadata"] = json!({
                    "Item": [{"Name": "MpesaReceiptNumber", "Value": receipt}]
                });
            }
            Json(response).into_response()
        }
        QueryMode::Accepted => Json(json!({
            "ResponseCode": "0",
            "ResponseDescription": "The service request has been accepted successsfully",
            "CheckoutRequestID": checkout_request_id
        }))
        .into_response(),
        QueryMode::RateLimited => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({"errorCode": "429.001.01", "errorMessage": "Too many requests"})),
        )
            .into_response(),
        QueryMode::StillProcessing => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"errorCode": "500.001.1001", "errorMessage": "The transaction is being processed"})),
        )
            .into_response(),
        QueryMode::ServerError => {
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
        }
    }
}

pub struct MockDaraja {
    pub base_url: String,
    pub state: Arc<DarajaState>,
}

impl MockDaraja {
    pub async fn start() -> Self {
        let state = Arc::new(DarajaState::default());
        let app = Router::new()
            .route("/oauth/v1/generate", get(token_endpoint))
            .route("/mpesa/stkpush/v1/processrequest", post(push_endpoint))
            .route("/mpesa/stkpushquery/v1/query", post(query_endpoint))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        MockDaraja {
            base_url: format!("http://{}", addr),
            state,
        }
    }

    /// Test config pointing the real client at this server.
    pub fn config(&self, overrides: &[(&str, &str)]) -> AppConfig {
        let mut all = vec![("MPESA_BASE_URL", self.base_url.as_str())];
        all.extend_from_slice(overrides);
        config_with(&all)
    }

    pub fn set_query_mode(&self, mode: QueryMode) {
        *self.state.query_mode.lock().unwrap() = mode;
    }

    pub fn token_calls(&self) -> usize {
        self.state.token_calls.load(Ordering::SeqCst)
    }

    pub fn push_calls(&self) -> usize {
        self.state.push_calls.load(Ordering::SeqCst)
    }

    pub fn query_calls(&self) -> usize {
        self.state.query_calls.load(Ordering::SeqCst)
    }

    pub fn network_calls(&self) -> usize {
        self.token_calls() + self.push_calls() + self.query_calls()
    }
}

// ---------------------------------------------------------------------------
// Gateway with per-id scripted answers
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct ScriptedGateway {
    answers: Mutex<HashMap<String, std::result::Result<StatusResult, String>>>,
    queries: AtomicUsize,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(&self, checkout_request_id: &str, result: StatusResult) {
        self.answers
            .lock()
            .unwrap()
            .insert(checkout_request_id.to_string(), Ok(result));
    }

    pub fn fail(&self, checkout_request_id: &str, message: &str) {
        self.answers
            .lock()
            .unwrap()
            .insert(checkout_request_id.to_string(), Err(message.to_string()));
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

pub fn status(status: TransactionStatus, receipt: Option<&str>) -> StatusResult {
    StatusResult {
        status,
        receipt_number: receipt.map(str::to_string),
        result_code: None,
        result_desc: None,
        rate_limited: false,
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    fn provider_name(&self) -> &'static str {
        "mpesa"
    }

    async fn initiate_push(
        &self,
        _phone_number: &str,
        _amount: &str,
        _account_reference: &str,
        _description: &str,
    ) -> Result<PushResult> {
        Err(AppError::ExternalApi("scripted gateway does not push".to_string()))
    }

    async fn query_status(&self, checkout_request_id: &str) -> Result<StatusResult> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let answer = self.answers.lock().unwrap().get(checkout_request_id).cloned();
        match answer {
            Some(Ok(result)) => Ok(result),
            Some(Err(message)) => Err(AppError::QueryError(message)),
            None => Ok(StatusResult::pending()),
        }
    }

    fn health(&self) -> GatewayHealth {
        GatewayHealth {
            provider: "mpesa",
            environment: "test".to_string(),
            token_breaker: None,
            stk_breaker: None,
            access_token_cached: false,
            token_expires_at: None,
            configured: true,
        }
    }

    fn reset_circuit_breakers(&self) {}
}
