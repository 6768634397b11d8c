//! Meta Graph API surface: wire types, the insights client and the OAuth
//! token refresh utility.

pub mod client;
pub mod token;

use serde::Deserialize;

/// One insights entry: a single ad on a single day, with its action list.
/// Every field is optional on the wire; flattening decides what is required.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawAdRecord {
    pub date_start: Option<String>,
    pub campaign_id: Option<String>,
    pub account_id: Option<String>,
    pub campaign_name: Option<String>,
    pub objective: Option<String>,
    pub adset_id: Option<String>,
    pub adset_name: Option<String>,
    pub ad_id: Option<String>,
    pub ad_name: Option<String>,
    #[serde(default)]
    pub actions: Vec<ActionEntry>,
}

/// One conversion/engagement event type with its reported value. The API
/// sends `value` as a string most of the time, occasionally as a number.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionEntry {
    pub action_type: Option<String>,
    pub value: Option<serde_json::Value>,
}

/// Coerce an action value to an integer; non-numeric or missing reads as 0.
pub fn coerce_metric_value(value: Option<&serde_json::Value>) -> i64 {
    match value {
        Some(serde_json::Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Some(serde_json::Value::String(s)) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
                .unwrap_or(0)
        }
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::coerce_metric_value;
    use serde_json::json;

    #[test]
    fn coerces_string_and_number_values() {
        assert_eq!(coerce_metric_value(Some(&json!("12"))), 12);
        assert_eq!(coerce_metric_value(Some(&json!(7))), 7);
        assert_eq!(coerce_metric_value(Some(&json!("3.9"))), 3);
    }

    #[test]
    fn non_numeric_or_missing_reads_as_zero() {
        assert_eq!(coerce_metric_value(Some(&json!("n/a"))), 0);
        assert_eq!(coerce_metric_value(Some(&json!(null))), 0);
        assert_eq!(coerce_metric_value(Some(&json!({"nested": 1}))), 0);
        assert_eq!(coerce_metric_value(None), 0);
    }

    #[test]
    fn record_deserializes_with_missing_actions() {
        let record: super::RawAdRecord =
            serde_json::from_value(json!({"ad_id": "1", "date_start": "2024-01-01"})).unwrap();
        assert!(record.actions.is_empty());
        assert_eq!(record.ad_id.as_deref(), Some("1"));
    }
}
