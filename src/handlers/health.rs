use axum::{extract::State, Json};
use chrono::Utc;
use serde_json::{json, Value};

use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let gateway = state.gateway.health();
    let breaker_open = [&gateway.token_breaker, &gateway.stk_breaker]
        .into_iter()
        .flatten()
        .any(|breaker| breaker.open);

    let status = if breaker_open || !gateway.configured {
        "degraded"
    } else {
        "ok"
    };

    Json(json!({
        "status": status,
        "service": "loan-fee-api",
        "timestamp": Utc::now().to_rfc3339(),
        "gateway": gateway,
        "config": state.config.config_info(),
        "adminRoutes": state.config.enable_admin_routes,
    }))
}
