use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum BgUnits {
    #[default]
    #[serde(rename = "mg/dL", alias = "mg/dl")]
    MgdL,
    #[serde(rename = "mmol/L", alias = "mmol/l")]
    MmolL,
}

impl fmt::Display for BgUnits {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BgUnits::MgdL => write!(f, "mg/dL"),
            BgUnits::MmolL => write!(f, "mmol/L"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientTag {
    #[serde(alias = "_id")]
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Clinic {
    #[serde(alias = "_id", default)]
    pub id: Option<String>,
    pub name: Option<String>,
    #[serde(default)]
    pub admins: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_deleted_patient_tag: Option<String>,
    #[serde(default)]
    pub patient_tags: Vec<PatientTag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default)]
    pub preferred_bg_units: BgUnits,
}

impl Clinic {
    pub fn tag_id(&self, name: &str) -> Option<&str> {
        self.patient_tags
            .iter()
            .find(|tag| tag.name == name)
            .map(|tag| tag.id.as_str())
    }

    pub fn has_tag(&self, name: &str) -> bool {
        self.tag_id(name).is_some()
    }
}
