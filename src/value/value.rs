use std::collections::BTreeMap;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde_json::{json, Value as JsonValue};

use crate::error::{invalid_argument, WatchResult};
use crate::model::Timestamp;

/// A decoded document field value.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldValue {
    kind: ValueKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ValueKind {
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    Timestamp(Timestamp),
    String(String),
    Bytes(Vec<u8>),
    Reference(String),
    GeoPoint { latitude: f64, longitude: f64 },
    Array(Vec<FieldValue>),
    Map(BTreeMap<String, FieldValue>),
}

impl FieldValue {
    pub fn null() -> Self {
        Self {
            kind: ValueKind::Null,
        }
    }

    pub fn from_bool(value: bool) -> Self {
        Self {
            kind: ValueKind::Boolean(value),
        }
    }

    pub fn from_integer(value: i64) -> Self {
        Self {
            kind: ValueKind::Integer(value),
        }
    }

    pub fn from_double(value: f64) -> Self {
        Self {
            kind: ValueKind::Double(value),
        }
    }

    pub fn from_timestamp(value: Timestamp) -> Self {
        Self {
            kind: ValueKind::Timestamp(value),
        }
    }

    pub fn from_string(value: impl Into<String>) -> Self {
        Self {
            kind: ValueKind::String(value.into()),
        }
    }

    pub fn from_bytes(value: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: ValueKind::Bytes(value.into()),
        }
    }

    pub fn from_reference(value: impl Into<String>) -> Self {
        Self {
            kind: ValueKind::Reference(value.into()),
        }
    }

    pub fn from_geo_point(latitude: f64, longitude: f64) -> Self {
        Self {
            kind: ValueKind::GeoPoint {
                latitude,
                longitude,
            },
        }
    }

    pub fn from_array(values: Vec<FieldValue>) -> Self {
        Self {
            kind: ValueKind::Array(values),
        }
    }

    pub fn from_map(fields: BTreeMap<String, FieldValue>) -> Self {
        Self {
            kind: ValueKind::Map(fields),
        }
    }

    pub fn kind(&self) -> &ValueKind {
        &self.kind
    }

    /// Decodes a proto-JSON value such as `{"integerValue": "42"}`.
    pub fn from_proto(value: &JsonValue) -> WatchResult<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| invalid_argument("Expected Firestore value object"))?;
        if object.contains_key("nullValue") {
            return Ok(FieldValue::null());
        }
        if let Some(bool_value) = object.get("booleanValue") {
            let value = bool_value
                .as_bool()
                .ok_or_else(|| invalid_argument("booleanValue must be bool"))?;
            return Ok(FieldValue::from_bool(value));
        }
        if let Some(integer_value) = object.get("integerValue") {
            let parsed = match integer_value {
                JsonValue::String(value) => i64::from_str(value)
                    .map_err(|err| invalid_argument(format!("Invalid integerValue: {err}")))?,
                JsonValue::Number(number) => number
                    .as_i64()
                    .ok_or_else(|| invalid_argument("Integer out of range"))?,
                _ => return Err(invalid_argument("integerValue must be a string or number")),
            };
            return Ok(FieldValue::from_integer(parsed));
        }
        if let Some(double_value) = object.get("doubleValue") {
            let parsed = match double_value {
                JsonValue::Number(number) => number
                    .as_f64()
                    .ok_or_else(|| invalid_argument("Invalid doubleValue"))?,
                JsonValue::String(value) => value
                    .parse::<f64>()
                    .map_err(|err| invalid_argument(format!("Invalid doubleValue: {err}")))?,
                _ => return Err(invalid_argument("doubleValue must be a number or string")),
            };
            return Ok(FieldValue::from_double(parsed));
        }
        if let Some(timestamp_value) = object.get("timestampValue") {
            let timestamp = timestamp_value
                .as_str()
                .ok_or_else(|| invalid_argument("timestampValue must be string"))?;
            return Ok(FieldValue::from_timestamp(Timestamp::from_rfc3339(
                timestamp,
            )?));
        }
        if let Some(string_value) = object.get("stringValue") {
            let value = string_value
                .as_str()
                .ok_or_else(|| invalid_argument("stringValue must be string"))?;
            return Ok(FieldValue::from_string(value));
        }
        if let Some(bytes_value) = object.get("bytesValue") {
            let encoded = bytes_value
                .as_str()
                .ok_or_else(|| invalid_argument("bytesValue must be base64 string"))?;
            let decoded = BASE64_STANDARD
                .decode(encoded)
                .map_err(|err| invalid_argument(format!("Invalid bytesValue: {err}")))?;
            return Ok(FieldValue::from_bytes(decoded));
        }
        if let Some(reference_value) = object.get("referenceValue") {
            let value = reference_value
                .as_str()
                .ok_or_else(|| invalid_argument("referenceValue must be string"))?;
            return Ok(FieldValue::from_reference(value));
        }
        if let Some(geo_point) = object.get("geoPointValue") {
            let latitude = geo_point
                .get("latitude")
                .and_then(JsonValue::as_f64)
                .unwrap_or(0.0);
            let longitude = geo_point
                .get("longitude")
                .and_then(JsonValue::as_f64)
                .unwrap_or(0.0);
            return Ok(FieldValue::from_geo_point(latitude, longitude));
        }
        if let Some(array_value) = object.get("arrayValue") {
            let values = match array_value.get("values").and_then(JsonValue::as_array) {
                Some(entries) => entries
                    .iter()
                    .map(FieldValue::from_proto)
                    .collect::<WatchResult<Vec<_>>>()?,
                None => Vec::new(),
            };
            return Ok(FieldValue::from_array(values));
        }
        if let Some(map_value) = object.get("mapValue") {
            let fields = match map_value.get("fields").and_then(JsonValue::as_object) {
                Some(fields) => decode_map_fields(fields)?,
                None => BTreeMap::new(),
            };
            return Ok(FieldValue::from_map(fields));
        }

        Err(invalid_argument("Unknown Firestore value type"))
    }

    /// Encodes the value back into its proto-JSON representation.
    pub fn to_proto(&self) -> JsonValue {
        match &self.kind {
            ValueKind::Null => json!({ "nullValue": JsonValue::Null }),
            ValueKind::Boolean(value) => json!({ "booleanValue": value }),
            ValueKind::Integer(value) => json!({ "integerValue": value.to_string() }),
            ValueKind::Double(value) if value.is_finite() => json!({ "doubleValue": value }),
            ValueKind::Double(value) if value.is_nan() => json!({ "doubleValue": "NaN" }),
            ValueKind::Double(value) if *value > 0.0 => json!({ "doubleValue": "Infinity" }),
            ValueKind::Double(_) => json!({ "doubleValue": "-Infinity" }),
            ValueKind::Timestamp(value) => json!({ "timestampValue": value.to_rfc3339() }),
            ValueKind::String(value) => json!({ "stringValue": value }),
            ValueKind::Bytes(value) => json!({ "bytesValue": BASE64_STANDARD.encode(value) }),
            ValueKind::Reference(value) => json!({ "referenceValue": value }),
            ValueKind::GeoPoint {
                latitude,
                longitude,
            } => json!({
                "geoPointValue": { "latitude": latitude, "longitude": longitude }
            }),
            ValueKind::Array(values) => {
                let values = values.iter().map(FieldValue::to_proto).collect::<Vec<_>>();
                json!({ "arrayValue": { "values": values } })
            }
            ValueKind::Map(fields) => json!({
                "mapValue": { "fields": encode_map_fields(fields) }
            }),
        }
    }

    /// Plain JSON rendering, suitable for handing to serde.
    pub fn to_json(&self) -> JsonValue {
        match &self.kind {
            ValueKind::Null => JsonValue::Null,
            ValueKind::Boolean(value) => json!(value),
            ValueKind::Integer(value) => json!(value),
            ValueKind::Double(value) => json!(value),
            ValueKind::Timestamp(value) => json!(value.to_rfc3339()),
            ValueKind::String(value) => json!(value),
            ValueKind::Bytes(value) => json!(BASE64_STANDARD.encode(value)),
            ValueKind::Reference(value) => json!(value),
            ValueKind::GeoPoint {
                latitude,
                longitude,
            } => json!({ "latitude": latitude, "longitude": longitude }),
            ValueKind::Array(values) => {
                JsonValue::Array(values.iter().map(FieldValue::to_json).collect())
            }
            ValueKind::Map(fields) => JsonValue::Object(
                fields
                    .iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
        }
    }
}

pub fn decode_map_fields(
    fields: &serde_json::Map<String, JsonValue>,
) -> WatchResult<BTreeMap<String, FieldValue>> {
    fields
        .iter()
        .map(|(key, value)| Ok((key.clone(), FieldValue::from_proto(value)?)))
        .collect()
}

pub fn encode_map_fields(fields: &BTreeMap<String, FieldValue>) -> JsonValue {
    JsonValue::Object(
        fields
            .iter()
            .map(|(key, value)| (key.clone(), value.to_proto()))
            .collect(),
    )
}
