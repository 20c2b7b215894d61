use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde_json::Value as JsonValue;

use crate::error::{invalid_argument, WatchResult};
use crate::model::{DatabaseId, DocumentKey, ResourcePath, Timestamp};

/// Maps between crate types and the JSON form of the listen protocol.
#[derive(Clone, Debug)]
pub struct JsonProtoSerializer {
    database_id: DatabaseId,
}

impl JsonProtoSerializer {
    pub fn new(database_id: DatabaseId) -> Self {
        Self { database_id }
    }

    pub fn database_id(&self) -> &DatabaseId {
        &self.database_id
    }

    pub fn database_name(&self) -> String {
        self.database_id.resource_name()
    }

    fn documents_root(&self) -> String {
        format!("{}/documents", self.database_name())
    }

    pub fn document_name(&self, key: &DocumentKey) -> String {
        format!(
            "{}/{}",
            self.documents_root(),
            key.path().canonical_string()
        )
    }

    /// Name of the resource a query runs under; the documents root for
    /// top-level collections.
    pub fn query_parent(&self, parent_path: &ResourcePath) -> String {
        if parent_path.is_empty() {
            self.documents_root()
        } else {
            format!(
                "{}/{}",
                self.documents_root(),
                parent_path.canonical_string()
            )
        }
    }

    /// Parses a fully qualified document name. Names from another database
    /// are rejected.
    pub fn document_key_from_name(&self, name: &str) -> WatchResult<DocumentKey> {
        let prefix = format!("{}/", self.documents_root());
        let relative = name.strip_prefix(&prefix).ok_or_else(|| {
            invalid_argument(format!(
                "Document name '{name}' does not belong to database {}",
                self.database_name()
            ))
        })?;
        DocumentKey::from_string(relative)
    }

    /// Accepts both the RFC 3339 string form and the `{seconds, nanos}`
    /// object form.
    pub fn decode_timestamp(&self, value: &JsonValue) -> WatchResult<Timestamp> {
        match value {
            JsonValue::String(text) => Timestamp::from_rfc3339(text),
            JsonValue::Object(map) => {
                let seconds = map.get("seconds").map(decode_i64).transpose()?.unwrap_or(0);
                let nanos = map.get("nanos").map(decode_i64).transpose()?.unwrap_or(0);
                Ok(Timestamp::new(seconds, nanos as i32))
            }
            other => Err(invalid_argument(format!("Invalid timestamp value: {other}"))),
        }
    }

    pub fn encode_timestamp(&self, timestamp: &Timestamp) -> JsonValue {
        JsonValue::String(timestamp.to_rfc3339())
    }

    pub fn encode_bytes(&self, bytes: &[u8]) -> String {
        BASE64_STANDARD.encode(bytes)
    }

    pub fn decode_bytes(&self, value: &str) -> WatchResult<Vec<u8>> {
        BASE64_STANDARD
            .decode(value)
            .map_err(|err| invalid_argument(format!("Invalid base64 payload: {err}")))
    }
}

/// Reads an integer that proto JSON may render either as a number or as a
/// decimal string.
pub(crate) fn decode_i64(value: &JsonValue) -> WatchResult<i64> {
    match value {
        JsonValue::Number(number) => number
            .as_i64()
            .ok_or_else(|| invalid_argument(format!("Expected an integer, got {number}"))),
        JsonValue::String(text) => text
            .parse::<i64>()
            .map_err(|err| invalid_argument(format!("Invalid integer '{text}': {err}"))),
        other => Err(invalid_argument(format!("Expected an integer, got {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn serializer() -> JsonProtoSerializer {
        JsonProtoSerializer::new(DatabaseId::default("demo"))
    }

    #[test]
    fn document_names_round_trip() {
        let serializer = serializer();
        let key = DocumentKey::from_string("rooms/eros/messages/1").unwrap();
        let name = serializer.document_name(&key);
        assert_eq!(
            name,
            "projects/demo/databases/(default)/documents/rooms/eros/messages/1"
        );
        assert_eq!(serializer.document_key_from_name(&name).unwrap(), key);
    }

    #[test]
    fn rejects_foreign_database_names() {
        let err = serializer()
            .document_key_from_name("projects/other/databases/(default)/documents/a/b")
            .unwrap_err();
        assert_eq!(err.code_str(), "watch/invalid-argument");
    }

    #[test]
    fn query_parent_for_root_and_nested_paths() {
        let serializer = serializer();
        assert_eq!(
            serializer.query_parent(&ResourcePath::root()),
            "projects/demo/databases/(default)/documents"
        );
        assert_eq!(
            serializer.query_parent(&ResourcePath::from_string("rooms/eros").unwrap()),
            "projects/demo/databases/(default)/documents/rooms/eros"
        );
    }

    #[test]
    fn decodes_both_timestamp_forms() {
        let serializer = serializer();
        let from_string = serializer
            .decode_timestamp(&json!("1970-01-01T00:00:05.000000100Z"))
            .unwrap();
        let from_object = serializer
            .decode_timestamp(&json!({ "seconds": "5", "nanos": 100 }))
            .unwrap();
        assert_eq!(from_string, Timestamp::new(5, 100));
        assert_eq!(from_object, from_string);
        assert!(serializer.decode_timestamp(&json!(true)).is_err());
    }
}
