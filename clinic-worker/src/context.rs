use std::sync::Arc;

use clinic_common::clients::{
    build_http_client, ClinicClient, ConfirmationClient, DataClient, Mailer, MarketingClient,
    ProfileClient, ReportsClient, RestClient, ServerSession, SharingClient, UserClient,
};

use crate::config::Config;
use crate::error::WorkerError;

pub const USER_AGENT: &str = concat!("clinic-worker/", env!("CARGO_PKG_VERSION"));

/// The clients shared by every handler. Clients are cheap to clone and hold
/// no per-record state.
#[derive(Clone)]
pub struct AppContext {
    pub clinics: ClinicClient,
    pub users: UserClient,
    pub profiles: ProfileClient,
    pub data: DataClient,
    pub sharing: SharingClient,
    pub reports: ReportsClient,
    pub marketing: MarketingClient,
    pub confirmation: ConfirmationClient,
    pub mailer: Arc<dyn Mailer>,
}

impl AppContext {
    /// Every internal service is called with the server session token.
    pub fn new(config: &Config, mailer: Arc<dyn Mailer>) -> Result<Self, WorkerError> {
        let http = build_http_client(config.request_timeout.0, USER_AGENT)?;
        let session = ServerSession::new(
            http.clone(),
            &config.auth_service_url,
            &config.server_name,
            config.server_secret.as_str(),
        )?;
        let rest = |base_url: &str| -> Result<RestClient, WorkerError> {
            Ok(RestClient::new(http.clone(), base_url)?.with_session(session.clone()))
        };

        Ok(Self {
            clinics: ClinicClient::new(rest(&config.clinic_service_url)?),
            users: UserClient::new(rest(&config.auth_service_url)?),
            profiles: ProfileClient::new(rest(&config.metadata_service_url)?),
            data: DataClient::new(rest(&config.data_service_url)?),
            sharing: SharingClient::new(rest(&config.sharing_service_url)?),
            reports: ReportsClient::new(rest(&config.export_service_url)?),
            marketing: MarketingClient::new(
                rest(&config.marketing_service_url)?,
                config.marketing_enabled,
            ),
            confirmation: ConfirmationClient::new(rest(&config.confirmation_service_url)?),
            mailer,
        })
    }

    /// Every client pointed at the same mock server, without session.
    #[cfg(test)]
    pub(crate) fn with_base_url(base_url: &str, mailer: Arc<dyn Mailer>) -> Result<Self, WorkerError> {
        let http = build_http_client(std::time::Duration::from_secs(5), USER_AGENT)?;
        let rest = RestClient::new(http, base_url)?;

        Ok(Self {
            clinics: ClinicClient::new(rest.clone()),
            users: UserClient::new(rest.clone()),
            profiles: ProfileClient::new(rest.clone()),
            data: DataClient::new(rest.clone()),
            sharing: SharingClient::new(rest.clone()),
            reports: ReportsClient::new(rest.clone()),
            marketing: MarketingClient::new(rest.clone(), true),
            confirmation: ConfirmationClient::new(rest),
            mailer,
        })
    }
}
