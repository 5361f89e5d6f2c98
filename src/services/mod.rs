pub mod callback;
pub mod circuit_breaker;
pub mod gateway;
pub mod mock_gateway;
pub mod mpesa_service;
pub mod retry;
pub mod token_cache;
pub mod validation;
