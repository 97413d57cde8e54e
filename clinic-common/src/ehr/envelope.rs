use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::order::NewOrder;
use super::{DATA_MODEL_ORDER, EVENT_TYPE_NEW};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnvelopeMeta {
    #[serde(alias = "DataModel")]
    pub data_model: String,
    #[serde(alias = "EventType")]
    pub event_type: String,
    #[serde(alias = "Source", skip_serializing_if = "Option::is_none")]
    pub source: Option<Value>,
    #[serde(alias = "Destinations", skip_serializing_if = "Vec::is_empty")]
    pub destinations: Vec<Value>,
}

impl EnvelopeMeta {
    pub fn is_valid(&self) -> bool {
        !self.data_model.is_empty() && !self.event_type.is_empty()
    }

    pub fn is_new_order(&self) -> bool {
        self.data_model == DATA_MODEL_ORDER && self.event_type == EVENT_TYPE_NEW
    }
}

/// An inbound EHR message as stored by the clinic service. `message` is the
/// raw gateway payload, typed on demand by data model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub meta: EnvelopeMeta,
    #[serde(default)]
    pub message: Value,
}

impl MessageEnvelope {
    pub fn decode_order(&self) -> Result<NewOrder, serde_json::Error> {
        NewOrder::deserialize(&self.message)
    }
}
