//! Handlers of the clinic CDC streams and of the user events.

pub mod clinicians;
pub mod clinics;
pub mod data_sources;
pub mod merge_plans;
pub mod migrations;
pub mod patients;
pub mod summaries;
pub mod summary_export;
pub mod users;

pub use clinicians::CliniciansHandler;
pub use clinics::ClinicsHandler;
pub use data_sources::DataSourcesHandler;
pub use merge_plans::MergePlansHandler;
pub use migrations::MigrationsHandler;
pub use patients::PatientsHandler;
pub use summaries::SummariesHandler;
pub use users::UserEventsHandler;
