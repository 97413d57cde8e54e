pub mod config;
pub mod consumer;
pub mod context;
pub mod ehr;
pub mod error;
pub mod handlers;
pub mod migration;
pub mod registry;
pub mod scheduled;
pub mod supervisor;
