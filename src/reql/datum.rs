//! Datum, the JSON-like value a query evaluates to.
//!
//! Every element of a response's `r` array is decoded into a `Datum`
//! before it reaches the caller. The conversion from `serde_json::Value`
//! is the single seam through which all result decoding flows; richer
//! handling of server pseudo-types (times, binary, grouped data) layers
//! on top of it without touching the connection machinery.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A value stored in or returned by the database.
///
/// JSON-compatible via serde; arrays keep server order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Datum {
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    Array(Vec<Datum>),
    Object(HashMap<String, Datum>),
}

impl Datum {
    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Datum::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Datum::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Datum::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Datum]> {
        match self {
            Datum::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&HashMap<String, Datum>> {
        match self {
            Datum::Object(fields) => Some(fields),
            _ => None,
        }
    }

    /// Look up a field on an object datum.
    pub fn get(&self, key: &str) -> Option<&Datum> {
        self.as_object().and_then(|fields| fields.get(key))
    }
}

/// Decode one batch of `r` elements, preserving order.
pub(crate) fn decode_batch(values: Vec<serde_json::Value>) -> Vec<Datum> {
    values.into_iter().map(Datum::from).collect()
}

impl From<bool> for Datum {
    fn from(b: bool) -> Self {
        Datum::Boolean(b)
    }
}

impl From<i64> for Datum {
    fn from(n: i64) -> Self {
        Datum::Number(n as f64)
    }
}

impl From<f64> for Datum {
    fn from(n: f64) -> Self {
        Datum::Number(n)
    }
}

impl From<&str> for Datum {
    fn from(s: &str) -> Self {
        Datum::String(s.to_string())
    }
}

impl From<String> for Datum {
    fn from(s: String) -> Self {
        Datum::String(s)
    }
}

impl From<Vec<Datum>> for Datum {
    fn from(items: Vec<Datum>) -> Self {
        Datum::Array(items)
    }
}

impl From<serde_json::Value> for Datum {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Datum::Null,
            serde_json::Value::Bool(b) => Datum::Boolean(b),
            serde_json::Value::Number(n) => Datum::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => Datum::String(s),
            serde_json::Value::Array(items) => {
                Datum::Array(items.into_iter().map(Datum::from).collect())
            }
            serde_json::Value::Object(fields) => Datum::Object(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, Datum::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<Datum> for serde_json::Value {
    fn from(datum: Datum) -> Self {
        match datum {
            Datum::Null => serde_json::Value::Null,
            Datum::Boolean(b) => serde_json::Value::Bool(b),
            Datum::Number(n) => serde_json::Number::from_f64(n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Datum::String(s) => serde_json::Value::String(s),
            Datum::Array(items) => {
                serde_json::Value::Array(items.into_iter().map(Into::into).collect())
            }
            Datum::Object(fields) => serde_json::Value::Object(
                fields.into_iter().map(|(k, v)| (k, v.into())).collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_json_value() {
        assert_eq!(Datum::from(json!(null)), Datum::Null);
        assert_eq!(Datum::from(json!(true)), Datum::Boolean(true));
        assert_eq!(Datum::from(json!(1.5)), Datum::Number(1.5));
        assert_eq!(Datum::from(json!("foo")), Datum::String("foo".into()));
        assert_eq!(
            Datum::from(json!([1, 2])),
            Datum::Array(vec![Datum::Number(1.0), Datum::Number(2.0)])
        );
    }

    #[test]
    fn batch_preserves_order() {
        let batch = decode_batch(vec![json!(1), json!(2), json!(3)]);
        assert_eq!(
            batch,
            vec![Datum::Number(1.0), Datum::Number(2.0), Datum::Number(3.0)]
        );
    }

    #[test]
    fn object_field_lookup() {
        let datum = Datum::from(json!({"name": "minerva", "rank": 3}));
        assert_eq!(datum.get("name").and_then(Datum::as_str), Some("minerva"));
        assert_eq!(datum.get("rank").and_then(Datum::as_number), Some(3.0));
        assert_eq!(datum.get("missing"), None);
    }

    #[test]
    fn accessors_reject_other_variants() {
        assert_eq!(Datum::Null.as_str(), None);
        assert_eq!(Datum::Boolean(true).as_number(), None);
        assert_eq!(Datum::Number(1.0).as_array(), None);
    }
}
