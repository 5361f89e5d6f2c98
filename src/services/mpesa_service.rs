// services/mpesa_service.rs
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as base64, Engine as _};
use chrono::Utc;
use reqwest::{header, Client, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::{AppConfig, MpesaUrls};
use crate::errors::{AppError, Result};
use crate::models::mpesa::{
    AuthResponse, StkPushRequest, StkPushResponse, StkQueryRequest, StkQueryResponse, ACCEPTED_CODE,
};
use crate::models::transaction::TransactionStatus;
use crate::services::circuit_breaker::CircuitBreaker;
use crate::services::gateway::{GatewayHealth, PaymentGateway, PushResult, StatusResult};
use crate::services::retry::RetryPolicy;
use crate::services::token_cache::TokenCache;
use crate::services::validation::{amount_to_wire, normalize_phone_number, parse_amount};

/// Provider error codes with a known customer-facing explanation.
const FRIENDLY_PUSH_ERRORS: &[(&str, &str)] = &[
    ("2001", "Invalid phone number. Please check and try again."),
    ("2029", "Business short code not configured for STK Push. Please contact support."),
    ("2051", "Business short code is not active. Please contact support."),
    ("500.001.1001", "Business short code is not recognised by M-Pesa. Please contact support."),
];

/// Returned with HTTP 500 while the provider has not settled the request yet.
const STILL_PROCESSING_CODE: &str = "500.001.1001";

/// Matches the response code exactly first, then any known code embedded in
/// the provider's message.
pub fn friendly_push_message(response_code: Option<&str>, provider_message: &str) -> String {
    FRIENDLY_PUSH_ERRORS
        .iter()
        .find(|(code, _)| response_code == Some(*code))
        .or_else(|| {
            FRIENDLY_PUSH_ERRORS
                .iter()
                .find(|(code, _)| provider_message.contains(code))
        })
        .map(|(_, friendly)| friendly.to_string())
        .unwrap_or_else(|| provider_message.to_string())
}

pub fn timestamp_now() -> String {
    Utc::now().format("%Y%m%d%H%M%S").to_string()
}

/// `base64(shortcode + passkey + timestamp)`, the Daraja request signature.
pub fn generate_password(short_code: &str, passkey: &str, timestamp: &str) -> String {
    base64.encode(format!("{}{}{}", short_code, passkey, timestamp))
}

/// Result codes take precedence over the immediate response code; anything
/// ambiguous resolves to `pending`.
pub fn interpret_query_response(response: &StkQueryResponse) -> StatusResult {
    if let Some(result_code) = response.result_code.as_deref() {
        let status = TransactionStatus::from_result_code(result_code);
        let receipt_number = if status == TransactionStatus::Completed {
            response
                .callback_metadata
                .as_ref()
                .and_then(|metadata| metadata.receipt_number())
        } else {
            None
        };

        return StatusResult {
            status,
            receipt_number,
            result_code: Some(result_code.to_string()),
            result_desc: response.result_desc.clone(),
            rate_limited: false,
        };
    }

    if response.response_code.as_deref() == Some(ACCEPTED_CODE) {
        debug!("STK query accepted, request still being processed");
    }

    StatusResult::pending()
}

/// Pulls `errorMessage`/`errorCode` out of a provider error body when it is JSON.
fn provider_error_text(body: &str) -> String {
    let parsed: Option<StkPushResponse> = serde_json::from_str(body).ok();
    match parsed {
        Some(response) => response
            .error_message
            .map(|message| match response.error_code {
                Some(code) => format!("{} ({})", message, code),
                None => message,
            })
            .or(response.response_description)
            .unwrap_or_else(|| body.to_string()),
        None => body.to_string(),
    }
}

#[derive(Debug)]
pub struct MpesaService {
    config: AppConfig,
    urls: MpesaUrls,
    client: Client,
    token_cache: TokenCache,
    token_breaker: CircuitBreaker,
    stk_breaker: CircuitBreaker,
    token_retry: RetryPolicy,
    push_retry: RetryPolicy,
}

impl MpesaService {
    pub fn new(config: AppConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.push_timeout.max(config.query_timeout).max(config.token_timeout))
            .build()
            .map_err(|e| AppError::configuration(format!("failed to create HTTP client: {}", e)))?;

        let urls = config.mpesa_urls();
        info!(
            environment = %config.mpesa_environment,
            short_code = %config.mpesa_short_code,
            auth_url = %urls.auth_url,
            "M-Pesa service initialized"
        );

        Ok(MpesaService {
            token_breaker: CircuitBreaker::new(
                "Token",
                config.breaker_failure_threshold,
                config.breaker_cooldown,
            ),
            stk_breaker: CircuitBreaker::new(
                "STK Push",
                config.breaker_failure_threshold,
                config.breaker_cooldown,
            ),
            token_retry: RetryPolicy::new(config.token_retries, config.retry_base_delay),
            push_retry: RetryPolicy::new(config.push_retries, config.retry_base_delay),
            token_cache: TokenCache::new(),
            urls,
            client,
            config,
        })
    }

    pub fn token_cache(&self) -> &TokenCache {
        &self.token_cache
    }

    pub fn token_breaker(&self) -> &CircuitBreaker {
        &self.token_breaker
    }

    pub fn stk_breaker(&self) -> &CircuitBreaker {
        &self.stk_breaker
    }

    pub async fn get_access_token(&self) -> Result<String> {
        if let Some(token) = self.token_cache.get() {
            debug!("Using cached access token");
            return Ok(token);
        }

        let mut last_error = None;
        for attempt in 0..self.token_retry.max_attempts() {
            if !self.token_breaker.allow() {
                return Err(AppError::CircuitOpen(self.token_breaker.name()));
            }

            match self.request_token().await {
                Ok(auth) => {
                    self.token_breaker.record_success();
                    let ttl = Duration::from_secs(auth.ttl_secs());
                    let cached = self.token_cache.store(
                        auth.access_token,
                        ttl,
                        self.config.token_safety_margin,
                    );
                    info!(
                        expires_in_secs = ttl.as_secs(),
                        usable_until = %cached.expires_at,
                        "Access token obtained"
                    );
                    return Ok(cached.token);
                }
                Err(e) => {
                    self.token_breaker.record_failure();
                    error!(attempt = attempt + 1, error = %e, "Token request failed");
                    last_error = Some(e);
                    if attempt < self.token_retry.retries {
                        let delay = self.token_retry.delay_for(attempt);
                        warn!(delay_ms = delay.as_millis() as u64, "Retrying token request");
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        let cause = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempt made".to_string());
        Err(AppError::AuthError(cause))
    }

    async fn request_token(&self) -> Result<AuthResponse> {
        info!("Requesting new access token");
        let credentials = base64.encode(format!(
            "{}:{}",
            self.config.mpesa_consumer_key, self.config.mpesa_consumer_secret
        ));

        let response = self
            .client
            .get(&self.urls.auth_url)
            .header(header::AUTHORIZATION, format!("Basic {}", credentials))
            .timeout(self.config.token_timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ProviderStatus { status, body });
        }

        let auth: AuthResponse = response.json().await?;
        if auth.access_token.is_empty() {
            return Err(AppError::UnexpectedResponse(
                "token response carried an empty access_token".to_string(),
            ));
        }
        Ok(auth)
    }

    async fn post_json<B, R>(&self, url: &str, token: &str, body: &B, timeout: Duration) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let response = self
            .client
            .post(url)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .header(header::CONTENT_TYPE, "application/json")
            .timeout(timeout)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ProviderStatus {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json().await?)
    }

    /// Sends a signed request; a rejected bearer token is dropped, refreshed and
    /// the request replayed exactly once.
    async fn post_with_reauth<B, R>(&self, url: &str, body: &B, timeout: Duration) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let token = self.get_access_token().await?;
        match self.post_json(url, &token, body, timeout).await {
            Err(e) if e.is_auth_rejection() => {
                warn!(url = %url, "Access token rejected, refreshing and retrying once");
                self.token_cache.invalidate();
                let token = self.get_access_token().await?;
                self.post_json(url, &token, body, timeout).await
            }
            other => other,
        }
    }

    pub async fn initiate_stk_push(
        &self,
        phone_number: &str,
        amount: &str,
        account_reference: &str,
        transaction_desc: &str,
    ) -> Result<PushResult> {
        let formatted_phone = normalize_phone_number(phone_number)?;
        let amount_value = parse_amount(amount)?;
        if self.config.is_production() && amount_value < 1.0 {
            return Err(AppError::invalid_data("invalid amount"));
        }

        if !self.stk_breaker.allow() {
            return Err(AppError::CircuitOpen(self.stk_breaker.name()));
        }

        info!(phone = %formatted_phone, amount = amount_value, reference = %account_reference, "Initiating STK Push");

        let outcome = self
            .push_with_retries(&formatted_phone, amount_value, account_reference, transaction_desc)
            .await;

        match outcome {
            Ok(response) if response.response_code.as_deref() == Some(ACCEPTED_CODE) => {
                match (response.checkout_request_id, response.merchant_request_id) {
                    (Some(checkout_request_id), Some(merchant_request_id)) => {
                        self.stk_breaker.record_success();
                        info!(checkout_request_id = %checkout_request_id, "STK Push accepted");
                        Ok(PushResult {
                            checkout_request_id,
                            merchant_request_id,
                            description: response.response_description.unwrap_or_default(),
                            customer_message: response.customer_message,
                            phone_number: formatted_phone,
                            amount: amount_value,
                        })
                    }
                    _ => {
                        self.stk_breaker.record_failure();
                        Err(AppError::PushError {
                            message: "Provider accepted the request without identifiers".to_string(),
                            provider_description: response.response_description.unwrap_or_default(),
                        })
                    }
                }
            }
            Ok(response) => {
                self.stk_breaker.record_failure();
                let description = response
                    .response_description
                    .or(response.error_message)
                    .unwrap_or_else(|| "STK Push failed".to_string());
                error!(code = ?response.response_code, description = %description, "STK Push rejected");
                Err(AppError::PushError {
                    message: friendly_push_message(response.response_code.as_deref(), &description),
                    provider_description: description,
                })
            }
            Err(e) => {
                self.stk_breaker.record_failure();
                error!(error = %e, phone = %formatted_phone, "STK Push error");
                Err(match e {
                    AppError::ProviderStatus { body, .. } => {
                        let description = provider_error_text(&body);
                        AppError::PushError {
                            message: friendly_push_message(None, &description),
                            provider_description: description,
                        }
                    }
                    AppError::ExternalApi(message) | AppError::UnexpectedResponse(message) => {
                        AppError::PushError {
                            message: message.clone(),
                            provider_description: message,
                        }
                    }
                    other => other,
                })
            }
        }
    }

    async fn push_with_retries(
        &self,
        phone: &str,
        amount: f64,
        account_reference: &str,
        transaction_desc: &str,
    ) -> Result<StkPushResponse> {
        let mut attempt = 0;
        loop {
            let timestamp = timestamp_now();
            let request = StkPushRequest {
                business_short_code: self.config.mpesa_short_code.clone(),
                password: generate_password(&self.config.mpesa_short_code, &self.config.mpesa_passkey, &timestamp),
                timestamp,
                transaction_type: self.config.mpesa_transaction_type.clone(),
                amount: amount_to_wire(amount),
                party_a: phone.to_string(),
                party_b: self.config.mpesa_party_b.clone(),
                phone_number: phone.to_string(),
                callback_url: self.config.mpesa_callback_url.clone(),
                account_reference: account_reference.to_string(),
                transaction_desc: transaction_desc.to_string(),
            };

            match self
                .post_with_reauth::<_, StkPushResponse>(&self.urls.stk_push_url, &request, self.config.push_timeout)
                .await
            {
                Err(e) if e.is_transient() && attempt < self.push_retry.retries => {
                    let delay = self.push_retry.delay_for(attempt);
                    warn!(
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        retries_left = self.push_retry.retries - attempt,
                        "Retrying STK Push"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    pub async fn query_stk_status(&self, checkout_request_id: &str) -> Result<StatusResult> {
        let timestamp = timestamp_now();
        let request = StkQueryRequest {
            business_short_code: self.config.mpesa_short_code.clone(),
            password: generate_password(&self.config.mpesa_short_code, &self.config.mpesa_passkey, &timestamp),
            timestamp,
            checkout_request_id: checkout_request_id.to_string(),
        };

        debug!(checkout_request_id = %checkout_request_id, "Sending STK status query");

        match self
            .post_with_reauth::<_, StkQueryResponse>(&self.urls.stk_query_url, &request, self.config.query_timeout)
            .await
        {
            Ok(response) => {
                let result = interpret_query_response(&response);
                info!(
                    checkout_request_id = %checkout_request_id,
                    status = %result.status,
                    result_code = ?result.result_code,
                    "STK status resolved"
                );
                Ok(result)
            }
            Err(AppError::ProviderStatus { status, .. }) if status == StatusCode::TOO_MANY_REQUESTS.as_u16() => {
                warn!(checkout_request_id = %checkout_request_id, "Status query rate limited, reporting pending");
                Ok(StatusResult::rate_limited())
            }
            Err(AppError::ProviderStatus { body, .. }) if body.contains(STILL_PROCESSING_CODE) => {
                debug!(checkout_request_id = %checkout_request_id, "Provider still processing request");
                Ok(StatusResult::pending())
            }
            Err(e @ (AppError::CircuitOpen(_) | AppError::AuthError(_))) => Err(e),
            Err(e) => {
                error!(checkout_request_id = %checkout_request_id, error = %e, "Status check error");
                Err(AppError::QueryError(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl PaymentGateway for MpesaService {
    fn provider_name(&self) -> &'static str {
        "mpesa"
    }

    async fn initiate_push(
        &self,
        phone_number: &str,
        amount: &str,
        account_reference: &str,
        description: &str,
    ) -> Result<PushResult> {
        self.initiate_stk_push(phone_number, amount, account_reference, description)
            .await
    }

    async fn query_status(&self, checkout_request_id: &str) -> Result<StatusResult> {
        self.query_stk_status(checkout_request_id).await
    }

    fn health(&self) -> GatewayHealth {
        let token = self.token_cache.snapshot();
        GatewayHealth {
            provider: self.provider_name(),
            environment: self.config.mpesa_environment.to_string(),
            token_breaker: Some(self.token_breaker.status()),
            stk_breaker: Some(self.stk_breaker.status()),
            access_token_cached: token.is_some(),
            token_expires_at: token.map(|cached| cached.expires_at),
            configured: self.config.is_configured(),
        }
    }

    fn reset_circuit_breakers(&self) {
        self.token_breaker.reset();
        self.stk_breaker.reset();
        info!("All circuit breakers reset");
    }
}
