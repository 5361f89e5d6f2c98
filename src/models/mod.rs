pub mod mpesa;
pub mod transaction;
