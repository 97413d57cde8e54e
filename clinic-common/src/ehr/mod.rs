//! EHR integration documents.
//!
//! The gateway speaks PascalCase JSON, with a few upper case acronyms
//! (`ID`, `IDType`, `DOB`, `NPI`). Inbound orders are decoded leniently,
//! outbound documents omit every unset field.

mod common;
mod envelope;
mod flowsheet;
mod notes;
mod order;
mod results;

pub use common::{
    Demographics, Endpoint, Guarantor, Identifier, Location, Meta, Patient, Procedure, Provider,
    Visit,
};
pub use envelope::{EnvelopeMeta, MessageEnvelope};
pub use flowsheet::{Flowsheet, Observation, ValueType};
pub use notes::{
    ContentType, Note, Notes, OrderRef, REPORT_AVAILABILITY, REPORT_DOCUMENT_TYPE,
    REPORT_PROVIDER_ID,
};
pub use order::{ClinicalInfo, NewOrder, Order};
pub use results::{ResultItem, ResultOrder, Results};

pub const DATA_MODEL_ORDER: &str = "Order";
pub const DATA_MODEL_FLOWSHEET: &str = "Flowsheet";
pub const DATA_MODEL_NOTES: &str = "Notes";
pub const DATA_MODEL_RESULTS: &str = "Results";

pub const EVENT_TYPE_NEW: &str = "New";
pub const EVENT_TYPE_REPLACE: &str = "Replace";
