pub mod cdc;
pub mod clients;
pub mod ehr;
pub mod extended_json;
pub mod metrics;
pub mod models;
pub mod retry;
