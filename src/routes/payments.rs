use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::{admin, payment_handlers};
use crate::state::AppState;

pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/initiate-push", post(payment_handlers::initiate_push))
        .route("/check-status/:checkout_request_id", get(payment_handlers::check_status))
        .route("/provider-callback", post(payment_handlers::provider_callback))
        // Callback URL registered with older deployments
        .route("/mpesa-callback", post(payment_handlers::provider_callback))
        .route("/mpesa-timeout", post(payment_handlers::timeout_notification))
        .route("/mpesa-result", post(payment_handlers::result_notification))
        .route("/transactions", get(payment_handlers::list_transactions))
}

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/reset-circuit-breakers", post(admin::reset_circuit_breakers))
        .route("/confirm-payment", post(admin::confirm_payment))
}
