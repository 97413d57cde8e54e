//! Documents exchanged with the clinic API and the other backends, and the
//! full documents carried by the CDC topics.

pub mod clinic;
pub mod clinician;
pub mod data_source;
pub mod ehr;
pub mod merge_plan;
pub mod migration;
pub mod patient;
pub mod scheduled;
pub mod summary;
pub mod user;

pub use clinic::{BgUnits, Clinic, PatientTag};
pub use clinician::{Clinician, RolesUpdate};
pub use data_source::DataSource;
pub use ehr::{EhrMatchRequest, EhrMatchResponse, EhrSettings, MatchAction, MatchCriterion};
pub use merge_plan::{ClinicianAction, ClinicianMergePlan, MergePlan, PatientMergePlan};
pub use migration::Migration;
pub use patient::{Patient, Permissions};
pub use scheduled::{PrecedingDocument, ScheduledSummaryAndReport};
pub use summary::{PatientSummary, StoredSummary, SummaryDates, SummaryType};
pub use user::{DeleteUserEvent, User};
