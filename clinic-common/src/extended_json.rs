//! Normalization of MongoDB extended JSON (canonical and relaxed modes).
//!
//! Change streams from the BSON based topics wrap scalar values in single key
//! objects such as `{"$oid": "..."}` or `{"$date": {"$numberLong": "..."}}`.
//! `normalize` rewrites those wrappers into plain JSON so the regular serde
//! models can be used for both JSON and BSON sourced topics:
//!
//! - `$oid` becomes the hex string,
//! - `$date` becomes an RFC 3339 string with millisecond precision,
//! - `$numberInt`, `$numberLong`, `$numberDouble` and `$numberDecimal` become numbers.
//!
//! Anything else (binary, timestamps, regular expressions) is left untouched.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Number, Value};

pub fn normalize(value: Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.into_iter().map(normalize).collect()),
        Value::Object(map) => normalize_object(map),
        other => other,
    }
}

fn normalize_object(map: Map<String, Value>) -> Value {
    if map.len() == 1 {
        if let Some(value) = map
            .iter()
            .next()
            .and_then(|(key, inner)| normalize_wrapper(key, inner))
        {
            return value;
        }
    }

    Value::Object(
        map.into_iter()
            .map(|(key, value)| (key, normalize(value)))
            .collect(),
    )
}

fn normalize_wrapper(key: &str, inner: &Value) -> Option<Value> {
    match (key, inner) {
        ("$oid", Value::String(id)) => Some(Value::String(id.clone())),
        ("$date", date) => normalize_date(date),
        ("$numberInt" | "$numberLong", Value::String(number)) => {
            number.parse::<i64>().ok().map(|n| Value::Number(n.into()))
        }
        ("$numberDouble" | "$numberDecimal", Value::String(number)) => Some(
            number
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                // NaN and infinities have no JSON representation
                .unwrap_or(Value::Null),
        ),
        _ => None,
    }
}

fn normalize_date(date: &Value) -> Option<Value> {
    let millis = match date {
        // Relaxed mode already carries an ISO-8601 string
        Value::String(iso) => return Some(Value::String(iso.clone())),
        Value::Number(number) => number.as_i64()?,
        Value::Object(wrapped) => wrapped
            .get("$numberLong")
            .and_then(Value::as_str)
            .and_then(|n| n.parse::<i64>().ok())?,
        _ => return None,
    };

    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|dt| Value::String(dt.to_rfc3339_opts(SecondsFormat::Millis, true)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unwraps_object_ids_and_numbers() {
        let value = json!({
            "_id": {"$oid": "65f1c0ffee0000000000beef"},
            "count": {"$numberInt": "7"},
            "big": {"$numberLong": "9007199254740993"},
            "ratio": {"$numberDouble": "0.25"},
            "nan": {"$numberDouble": "NaN"},
        });

        assert_eq!(
            normalize(value),
            json!({
                "_id": "65f1c0ffee0000000000beef",
                "count": 7,
                "big": 9007199254740993_i64,
                "ratio": 0.25,
                "nan": null,
            })
        );
    }

    #[test]
    fn dates_become_rfc3339_in_both_modes() {
        let value = json!({
            "canonical": {"$date": {"$numberLong": "1700000000000"}},
            "relaxed": {"$date": "2023-11-14T22:13:20Z"},
            "legacy": {"$date": 1700000000000_i64},
        });

        assert_eq!(
            normalize(value),
            json!({
                "canonical": "2023-11-14T22:13:20.000Z",
                "relaxed": "2023-11-14T22:13:20Z",
                "legacy": "2023-11-14T22:13:20.000Z",
            })
        );
    }

    #[test]
    fn nested_documents_and_arrays_are_walked() {
        let value = json!({
            "meta": {"destinations": [{"id": {"$oid": "aa"}}]},
            "tags": [{"$oid": "bb"}, "cc"],
            "untouched": {"$binary": {"base64": "AA==", "subType": "00"}},
        });

        assert_eq!(
            normalize(value),
            json!({
                "meta": {"destinations": [{"id": "aa"}]},
                "tags": ["bb", "cc"],
                "untouched": {"$binary": {"base64": "AA==", "subType": "00"}},
            })
        );
    }
}
