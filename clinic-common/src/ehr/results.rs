use serde::{Deserialize, Serialize};

use super::common::{Meta, Patient, Procedure, Provider, Visit};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResultItem {
    pub code: String,
    pub description: String,
    pub value: String,
    pub value_type: String,
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResultOrder {
    #[serde(rename = "ID")]
    pub id: String,
    pub transaction_date_time: String,
    pub completion_date_time: String,
    pub status: String,
    pub result_status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub procedure: Option<Procedure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<Provider>,
    #[serde(default)]
    pub results: Vec<ResultItem>,
}

/// Acknowledges an order back to the EHR.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Results {
    pub meta: Meta,
    pub patient: Patient,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visit: Option<Visit>,
    #[serde(default)]
    pub orders: Vec<ResultOrder>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ehr::{Endpoint, Identifier};
    use serde_json::json;

    #[test]
    fn serializes_with_gateway_casing() {
        let results = Results {
            meta: Meta {
                data_model: "Results".to_string(),
                event_type: "New".to_string(),
                destinations: vec![Endpoint::with_id("dest-results")],
                ..Default::default()
            },
            patient: Patient {
                identifiers: vec![Identifier {
                    id: "M456".to_string(),
                    id_type: "MRN".to_string(),
                }],
                demographics: None,
            },
            visit: Some(Visit {
                visit_number: Some("V1".to_string()),
                ..Default::default()
            }),
            orders: vec![ResultOrder {
                id: "o1".to_string(),
                status: "Resulted".to_string(),
                result_status: "Final".to_string(),
                results: vec![ResultItem {
                    code: "STATUS".to_string(),
                    description: "Status".to_string(),
                    value: "SUCCESS".to_string(),
                    value_type: "String".to_string(),
                    status: "Final".to_string(),
                }],
                ..Default::default()
            }],
        };

        let value = serde_json::to_value(&results).unwrap();
        assert_json_diff::assert_json_include!(
            actual: value.clone(),
            expected: json!({
                "Meta": {"DataModel": "Results", "EventType": "New", "Destinations": [{"ID": "dest-results"}]},
                "Patient": {"Identifiers": [{"ID": "M456", "IDType": "MRN"}]},
                "Visit": {"VisitNumber": "V1"},
                "Orders": [{"ID": "o1", "Results": [{"Code": "STATUS", "Value": "SUCCESS"}]}],
            })
        );

        let decoded: Results = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, results);
    }
}
