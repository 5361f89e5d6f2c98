mod support;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::json;

use loan_fee_api::errors::AppError;
use loan_fee_api::models::transaction::TransactionStatus;
use loan_fee_api::services::gateway::PaymentGateway;
use loan_fee_api::services::mpesa_service::MpesaService;
use support::{MockDaraja, QueryMode, CONSUMER_KEY, CONSUMER_SECRET, PASSKEY, SHORT_CODE};

#[tokio::test]
async fn push_sends_signed_request_with_normalized_phone() {
    let daraja = MockDaraja::start().await;
    let service = MpesaService::new(daraja.config(&[])).unwrap();

    let result = service
        .initiate_push("0712345678", "10", "REF1", "desc")
        .await
        .unwrap();

    assert_eq!(result.checkout_request_id, "ws_CO_1");
    assert_eq!(result.merchant_request_id, "mr-1");
    assert_eq!(result.phone_number, "254712345678");

    let expected_basic = format!(
        "Basic {}",
        STANDARD.encode(format!("{}:{}", CONSUMER_KEY, CONSUMER_SECRET))
    );
    assert_eq!(
        daraja.state.last_token_auth.lock().unwrap().as_deref(),
        Some(expected_basic.as_str())
    );
    assert_eq!(
        daraja.state.last_bearer.lock().unwrap().as_deref(),
        Some("Bearer token-1")
    );

    let body = daraja.state.last_push_body.lock().unwrap().clone().unwrap();
    assert_eq!(body["BusinessShortCode"], json!(SHORT_CODE));
    assert_eq!(body["TransactionType"], json!("CustomerPayBillOnline"));
    assert_eq!(body["Amount"], json!(10));
    assert_eq!(body["PartyA"], json!("254712345678"));
    assert_eq!(body["PartyB"], json!(SHORT_CODE));
    assert_eq!(body["PhoneNumber"], json!("254712345678"));
    assert_eq!(body["CallBackURL"], json!("https://example.com/api/provider-callback"));
    assert_eq!(body["AccountReference"], json!("REF1"));
    assert_eq!(body["TransactionDesc"], json!("desc"));

    let timestamp = body["Timestamp"].as_str().unwrap();
    assert_eq!(timestamp.len(), 14);
    let password = STANDARD.decode(body["Password"].as_str().unwrap()).unwrap();
    assert_eq!(
        String::from_utf8(password).unwrap(),
        format!("{}{}{}", SHORT_CODE, PASSKEY, timestamp)
    );
}

#[tokio::test]
async fn malformed_input_never_reaches_the_network() {
    let daraja = MockDaraja::start().await;
    let service = MpesaService::new(daraja.config(&[])).unwrap();

    for phone in ["", "07123", "0712345678901", "abcdefghij", "255712345678", "+1 202 555 0100"] {
        let err = service.initiate_push(phone, "10", "REF1", "desc").await.unwrap_err();
        assert!(
            matches!(&err, AppError::ValidationError(message) if message == "invalid phone number"),
            "phone {:?} gave {:?}",
            phone,
            err
        );
    }

    for amount in ["0", "-1", "ten", ""] {
        let err = service
            .initiate_push("0712345678", amount, "REF1", "desc")
            .await
            .unwrap_err();
        assert!(matches!(&err, AppError::ValidationError(message) if message == "invalid amount"));
    }

    assert_eq!(daraja.network_calls(), 0);
}

#[tokio::test]
async fn production_rejects_sub_unit_amounts() {
    let daraja = MockDaraja::start().await;
    let service = MpesaService::new(daraja.config(&[
        ("MPESA_ENVIRONMENT", "production"),
    ]))
    .unwrap();

    let err = service
        .initiate_push("0712345678", "0.5", "REF1", "desc")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ValidationError(_)));
    assert_eq!(daraja.network_calls(), 0);
}

#[tokio::test]
async fn rejected_token_is_refreshed_and_push_replayed_once() {
    let daraja = MockDaraja::start().await;
    let service = MpesaService::new(daraja.config(&[])).unwrap();
    daraja
        .state
        .reject_push_auth_once
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let result = service
        .initiate_push("0712345678", "10", "REF1", "desc")
        .await
        .unwrap();

    assert_eq!(result.checkout_request_id, "ws_CO_2");
    assert_eq!(daraja.token_calls(), 2);
    assert_eq!(daraja.push_calls(), 2);
    assert_eq!(service.token_cache().get().as_deref(), Some("token-2"));
    assert_eq!(
        daraja.state.last_bearer.lock().unwrap().as_deref(),
        Some("Bearer token-2")
    );
    assert_eq!(service.stk_breaker().status().failures, 0);
}

#[tokio::test]
async fn cached_token_is_reused_across_calls() {
    let daraja = MockDaraja::start().await;
    let service = MpesaService::new(daraja.config(&[])).unwrap();

    service.initiate_push("0712345678", "10", "REF1", "desc").await.unwrap();
    service.initiate_push("0712345679", "20", "REF2", "desc").await.unwrap();
    service.query_status("ws_CO_1").await.unwrap();

    assert_eq!(daraja.token_calls(), 1);
    assert!(service.health().access_token_cached);
}

#[tokio::test]
async fn transient_push_failures_are_retried() {
    let daraja = MockDaraja::start().await;
    let service = MpesaService::new(daraja.config(&[("STK_PUSH_RETRIES", "2")])).unwrap();
    daraja
        .state
        .push_failures
        .store(2, std::sync::atomic::Ordering::SeqCst);

    let result = service
        .initiate_push("0712345678", "10", "REF1", "desc")
        .await
        .unwrap();

    assert_eq!(result.checkout_request_id, "ws_CO_3");
    assert_eq!(daraja.push_calls(), 3);
}

#[tokio::test]
async fn push_gives_up_after_bounded_retries() {
    let daraja = MockDaraja::start().await;
    let service = MpesaService::new(daraja.config(&[("STK_PUSH_RETRIES", "2")])).unwrap();
    daraja
        .state
        .push_failures
        .store(10, std::sync::atomic::Ordering::SeqCst);

    let err = service
        .initiate_push("0712345678", "10", "REF1", "desc")
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::PushError { .. }));
    assert_eq!(daraja.push_calls(), 3);
    assert_eq!(service.stk_breaker().status().failures, 1);
}

#[tokio::test]
async fn known_provider_codes_get_friendly_messages() {
    let daraja = MockDaraja::start().await;
    let service = MpesaService::new(daraja.config(&[])).unwrap();
    *daraja.state.push_override.lock().unwrap() = Some((
        400,
        json!({"requestId": "abc", "errorCode": "2001", "errorMessage": "Bad Request - Invalid PhoneNumber"}),
    ));

    let err = service
        .initiate_push("0712345678", "10", "REF1", "desc")
        .await
        .unwrap_err();

    match err {
        AppError::PushError { message, provider_description } => {
            assert_eq!(message, "Invalid phone number. Please check and try again.");
            assert_eq!(provider_description, "Bad Request - Invalid PhoneNumber (2001)");
        }
        other => panic!("unexpected error {:?}", other),
    }
    // 4xx answers are final
    assert_eq!(daraja.push_calls(), 1);
}

#[tokio::test]
async fn non_accepted_response_code_passes_description_through() {
    let daraja = MockDaraja::start().await;
    let service = MpesaService::new(daraja.config(&[])).unwrap();
    *daraja.state.push_override.lock().unwrap() = Some((
        200,
        json!({"ResponseCode": "1", "ResponseDescription": "Unable to lock subscriber"}),
    ));

    let err = service
        .initiate_push("0712345678", "10", "REF1", "desc")
        .await
        .unwrap_err();

    match err {
        AppError::PushError { message, provider_description } => {
            assert_eq!(message, "Unable to lock subscriber");
            assert_eq!(provider_description, "Unable to lock subscriber");
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn known_response_code_maps_even_when_description_omits_it() {
    let daraja = MockDaraja::start().await;
    let service = MpesaService::new(daraja.config(&[])).unwrap();
    *daraja.state.push_override.lock().unwrap() = Some((
        200,
        json!({"ResponseCode": "2001", "ResponseDescription": "The initiator information is invalid."}),
    ));

    let err = service
        .initiate_push("0712345678", "10", "REF1", "desc")
        .await
        .unwrap_err();

    match err {
        AppError::PushError { message, provider_description } => {
            assert_eq!(message, "Invalid phone number. Please check and try again.");
            assert_eq!(provider_description, "The initiator information is invalid.");
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn open_push_breaker_blocks_without_network_call() {
    let daraja = MockDaraja::start().await;
    let service = MpesaService::new(daraja.config(&[
        ("CIRCUIT_BREAKER_THRESHOLD", "2"),
        ("STK_PUSH_RETRIES", "0"),
    ]))
    .unwrap();
    daraja
        .state
        .push_failures
        .store(10, std::sync::atomic::Ordering::SeqCst);

    for _ in 0..2 {
        let err = service
            .initiate_push("0712345678", "10", "REF1", "desc")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PushError { .. }));
    }
    assert_eq!(daraja.push_calls(), 2);

    let err = service
        .initiate_push("0712345678", "10", "REF1", "desc")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::CircuitOpen("STK Push")));
    assert_eq!(daraja.push_calls(), 2);

    let health = service.health();
    assert!(health.stk_breaker.unwrap().open);

    service.reset_circuit_breakers();
    daraja
        .state
        .push_failures
        .store(0, std::sync::atomic::Ordering::SeqCst);
    service
        .initiate_push("0712345678", "10", "REF1", "desc")
        .await
        .unwrap();
}

#[tokio::test]
async fn token_failures_exhaust_retries_with_auth_error() {
    let daraja = MockDaraja::start().await;
    let service = MpesaService::new(daraja.config(&[("TOKEN_RETRIES", "2")])).unwrap();
    daraja
        .state
        .token_failures
        .store(10, std::sync::atomic::Ordering::SeqCst);

    let err = service.get_access_token().await.unwrap_err();

    assert!(matches!(err, AppError::AuthError(_)));
    assert_eq!(daraja.token_calls(), 3);
    assert!(!service.token_cache().is_present());
    assert_eq!(service.token_breaker().status().failures, 3);
}

#[tokio::test]
async fn token_recovers_within_retry_budget() {
    let daraja = MockDaraja::start().await;
    let service = MpesaService::new(daraja.config(&[("TOKEN_RETRIES", "3")])).unwrap();
    daraja
        .state
        .token_failures
        .store(2, std::sync::atomic::Ordering::SeqCst);

    let token = service.get_access_token().await.unwrap();

    assert_eq!(token, "token-1");
    assert_eq!(daraja.token_calls(), 3);
    assert_eq!(service.token_breaker().status().failures, 0);
}

#[tokio::test]
async fn query_completed_with_receipt() {
    let daraja = MockDaraja::start().await;
    let service = MpesaService::new(daraja.config(&[])).unwrap();
    daraja.set_query_mode(QueryMode::Result {
        code: "0".to_string(),
        receipt: Some("QEJ7Y6X2M1".to_string()),
    });

    let result = service.query_status("ws_CO_1").await.unwrap();

    assert_eq!(result.status, TransactionStatus::Completed);
    assert_eq!(result.receipt_number.as_deref(), Some("QEJ7Y6X2M1"));
    let body = daraja.state.last_query_body.lock().unwrap().clone().unwrap();
    assert_eq!(body["CheckoutRequestID"], json!("ws_CO_1"));
    assert_eq!(body["BusinessShortCode"], json!(SHORT_CODE));
    assert!(body["Password"].is_string());
}

#[tokio::test]
async fn query_cancelled_by_user() {
    let daraja = MockDaraja::start().await;
    let service = MpesaService::new(daraja.config(&[])).unwrap();
    daraja.set_query_mode(QueryMode::Result {
        code: "1032".to_string(),
        receipt: None,
    });

    let result = service.query_status("ws_CO_1").await.unwrap();
    assert_eq!(result.status, TransactionStatus::Cancelled);
    assert!(result.receipt_number.is_none());
}

#[tokio::test]
async fn ambiguous_and_throttled_queries_resolve_to_pending() {
    let daraja = MockDaraja::start().await;
    let service = MpesaService::new(daraja.config(&[])).unwrap();

    daraja.set_query_mode(QueryMode::Accepted);
    let result = service.query_status("ws_CO_1").await.unwrap();
    assert_eq!(result.status, TransactionStatus::Pending);
    assert!(!result.rate_limited);

    daraja.set_query_mode(QueryMode::StillProcessing);
    let result = service.query_status("ws_CO_1").await.unwrap();
    assert_eq!(result.status, TransactionStatus::Pending);

    daraja.set_query_mode(QueryMode::RateLimited);
    let result = service.query_status("ws_CO_1").await.unwrap();
    assert_eq!(result.status, TransactionStatus::Pending);
    assert!(result.rate_limited);
}

#[tokio::test]
async fn query_server_error_surfaces_as_query_error() {
    let daraja = MockDaraja::start().await;
    let service = MpesaService::new(daraja.config(&[])).unwrap();
    daraja.set_query_mode(QueryMode::ServerError);

    let err = service.query_status("ws_CO_1").await.unwrap_err();
    assert!(matches!(err, AppError::QueryError(_)));
}
