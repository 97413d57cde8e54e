//! Thin clients for the services the worker drives.
//!
//! Every client wraps a shared `RestClient`; none of them retries on its own,
//! retries are the business of the consumers.

pub mod clinic;
pub mod confirmation;
pub mod data;
pub mod ehr_gateway;
pub mod http;
pub mod mailer;
pub mod marketing;
pub mod profiles;
pub mod reports;
pub mod session;
pub mod sharing;
pub mod token;
pub mod users;

pub use clinic::ClinicClient;
pub use confirmation::ConfirmationClient;
pub use data::DataClient;
pub use ehr_gateway::{EhrGatewayClient, EhrGatewayConfig};
pub use http::{build_http_client, ClientError, RestClient};
pub use mailer::{EmailTemplateEvent, KafkaMailer, Mailer};
pub use marketing::MarketingClient;
pub use profiles::ProfileClient;
pub use reports::{ReportRequest, ReportsClient};
pub use session::ServerSession;
pub use sharing::SharingClient;
pub use token::{CachedToken, TokenCache, TokenError};
pub use users::UserClient;
