//! EHR integration: orders placed by providers enable or disable summary
//! reports and create patient accounts. Every order is answered with a
//! results document, and enrolled patients get a flowsheet of their glucose
//! statistics plus a PDF report as notes.

pub mod flowsheet;
pub mod handler;
pub mod notes;
pub mod processor;
pub mod results;
pub mod tags;
pub mod units;

use clinic_common::ehr::{Endpoint, Meta};

pub use handler::EhrOrdersHandler;
pub use processor::{OrderProcessor, ReportParameters};

/// Where an outbound document comes from and goes to.
#[derive(Debug, Clone, PartialEq)]
pub struct Addressing {
    pub source: Endpoint,
    pub destination: String,
    pub test: bool,
}

impl Addressing {
    pub fn meta(&self, data_model: &str, event_type: &str, event_date_time: &str) -> Meta {
        Meta {
            data_model: data_model.to_owned(),
            event_type: event_type.to_owned(),
            event_date_time: Some(event_date_time.to_owned()),
            test: self.test.then_some(true),
            source: Some(self.source.clone()),
            destinations: vec![Endpoint::with_id(self.destination.clone())],
        }
    }
}
