//! Flattening of OTLP attribute lists into column values.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use opentelemetry_proto::tonic::common::v1::any_value::Value as OtlpValue;
use opentelemetry_proto::tonic::common::v1::{AnyValue, KeyValue};
use serde_json::{Map, Number, Value};
use std::collections::btree_map;
use std::collections::BTreeMap;
use thiserror::Error;

/// A leaf attribute value.
#[derive(Clone, Debug, PartialEq)]
pub enum ScalarValue {
    /// The attribute had a key but no value.
    Empty,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point.
    Double(f64),
    /// UTF-8 string.
    String(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
}

/// An attribute value with its nesting preserved.
#[derive(Clone, Debug, PartialEq)]
pub enum AttributeValue {
    /// A single value.
    Scalar(ScalarValue),
    /// A key/value list.
    Nested(FlatAttributes),
    /// An array.
    Sequence(Vec<AttributeValue>),
}

/// Attributes keyed by name, in key order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FlatAttributes(BTreeMap<String, AttributeValue>);

/// Flattens an OTLP attribute list.
///
/// Every key of the input is kept. When a key repeats, the last value wins.
pub fn flatten(attributes: &[KeyValue]) -> FlatAttributes {
    attributes
        .iter()
        .map(|kv| {
            let value = kv
                .value
                .as_ref()
                .map(AttributeValue::from)
                .unwrap_or(AttributeValue::Scalar(ScalarValue::Empty));
            (kv.key.clone(), value)
        })
        .collect()
}

impl FlatAttributes {
    /// An empty attribute set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when there are no keys.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.0.get(key)
    }

    /// Iterate in key order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, AttributeValue> {
        self.0.iter()
    }

    /// Key and [`AttributeValue::column_text`] pairs, for `map<text, text>` columns.
    pub fn column_entries(&self) -> impl Iterator<Item = (&str, String)> + '_ {
        self.0.iter().map(|(k, v)| (k.as_str(), v.column_text()))
    }

    /// Collects [`FlatAttributes::column_entries`] into an owned map.
    pub fn to_text_map(&self) -> BTreeMap<String, String> {
        self.column_entries()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }
}

impl FromIterator<(String, AttributeValue)> for FlatAttributes {
    fn from_iter<I: IntoIterator<Item = (String, AttributeValue)>>(iter: I) -> Self {
        FlatAttributes(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a FlatAttributes {
    type Item = (&'a String, &'a AttributeValue);
    type IntoIter = btree_map::Iter<'a, String, AttributeValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl From<&AnyValue> for AttributeValue {
    fn from(value: &AnyValue) -> Self {
        match &value.value {
            None => AttributeValue::Scalar(ScalarValue::Empty),
            Some(OtlpValue::StringValue(s)) => AttributeValue::Scalar(ScalarValue::String(s.clone())),
            Some(OtlpValue::BoolValue(b)) => AttributeValue::Scalar(ScalarValue::Bool(*b)),
            Some(OtlpValue::IntValue(i)) => AttributeValue::Scalar(ScalarValue::Int(*i)),
            Some(OtlpValue::DoubleValue(d)) => AttributeValue::Scalar(ScalarValue::Double(*d)),
            Some(OtlpValue::BytesValue(b)) => AttributeValue::Scalar(ScalarValue::Bytes(b.clone())),
            Some(OtlpValue::ArrayValue(array)) => {
                AttributeValue::Sequence(array.values.iter().map(AttributeValue::from).collect())
            }
            Some(OtlpValue::KvlistValue(list)) => AttributeValue::Nested(flatten(&list.values)),
        }
    }
}

impl AttributeValue {
    /// Text stored in a `map<text, text>` column.
    ///
    /// Scalars are written as plain text. Nested values and sequences are written
    /// as JSON so no structure is lost.
    pub fn column_text(&self) -> String {
        match self {
            AttributeValue::Scalar(scalar) => scalar.to_text(),
            nested => match nested.as_json_value(NonFinite::Stringify) {
                Ok(json) => json.to_string(),
                Err(_) => String::new(),
            },
        }
    }
}

impl ScalarValue {
    fn to_text(&self) -> String {
        match self {
            ScalarValue::Empty => String::new(),
            ScalarValue::Bool(b) => b.to_string(),
            ScalarValue::Int(i) => i.to_string(),
            ScalarValue::Double(d) => match Number::from_f64(*d) {
                Some(n) => n.to_string(),
                None => d.to_string(),
            },
            ScalarValue::String(s) => s.clone(),
            ScalarValue::Bytes(b) => BASE64.encode(b),
        }
    }
}

/// A double that JSON cannot carry.
#[derive(Debug, Error, PartialEq)]
#[error("Double value {0} has no JSON representation")]
pub(crate) struct UnrepresentableValue(f64);

/// How NaN and infinities are handled when producing JSON.
#[derive(Clone, Copy, Debug)]
pub(crate) enum NonFinite {
    Reject,
    Stringify,
}

pub(crate) trait IntoJson {
    fn as_json_value(&self, non_finite: NonFinite) -> Result<Value, UnrepresentableValue>;
}

impl IntoJson for ScalarValue {
    fn as_json_value(&self, non_finite: NonFinite) -> Result<Value, UnrepresentableValue> {
        Ok(match self {
            ScalarValue::Empty => Value::Null,
            ScalarValue::Bool(b) => Value::Bool(*b),
            ScalarValue::Int(i) => Value::from(*i),
            ScalarValue::Double(d) => match (Number::from_f64(*d), non_finite) {
                (Some(n), _) => Value::Number(n),
                (None, NonFinite::Stringify) => Value::String(d.to_string()),
                (None, NonFinite::Reject) => return Err(UnrepresentableValue(*d)),
            },
            ScalarValue::String(s) => Value::String(s.clone()),
            ScalarValue::Bytes(b) => Value::String(BASE64.encode(b)),
        })
    }
}

impl IntoJson for AttributeValue {
    fn as_json_value(&self, non_finite: NonFinite) -> Result<Value, UnrepresentableValue> {
        match self {
            AttributeValue::Scalar(scalar) => scalar.as_json_value(non_finite),
            AttributeValue::Nested(map) => map.as_json_value(non_finite),
            AttributeValue::Sequence(values) => values.as_slice().as_json_value(non_finite),
        }
    }
}

impl IntoJson for FlatAttributes {
    fn as_json_value(&self, non_finite: NonFinite) -> Result<Value, UnrepresentableValue> {
        let mut object = Map::new();
        for (k, v) in &self.0 {
            object.insert(k.clone(), v.as_json_value(non_finite)?);
        }
        Ok(Value::Object(object))
    }
}

impl IntoJson for [AttributeValue] {
    fn as_json_value(&self, non_finite: NonFinite) -> Result<Value, UnrepresentableValue> {
        self.iter()
            .map(|v| v.as_json_value(non_finite))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array)
    }
}

/// Canonical JSON text of a log body. An absent body is `null`.
pub(crate) fn body_to_json(body: Option<&AnyValue>) -> Result<String, UnrepresentableValue> {
    match body {
        None => Ok(Value::Null.to_string()),
        Some(value) => AttributeValue::from(value)
            .as_json_value(NonFinite::Reject)
            .map(|json| json.to_string()),
    }
}
