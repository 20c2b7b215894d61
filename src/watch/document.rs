use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::error::{invalid_argument, WatchResult};
use crate::model::{DocumentKey, FieldPath, Timestamp};
use crate::value::{decode_map_fields, FieldValue};

/// A document as observed by a watch at a given read time.
///
/// Field values are kept in their wire encoding and decoded on access.
/// Snapshots are immutable and cheap to clone.
#[derive(Clone, Debug)]
pub struct DocumentSnapshot {
    inner: Arc<SnapshotInner>,
}

#[derive(Debug)]
struct SnapshotInner {
    key: DocumentKey,
    fields: JsonMap<String, JsonValue>,
    create_time: Option<Timestamp>,
    update_time: Option<Timestamp>,
    read_time: Option<Timestamp>,
}

impl DocumentSnapshot {
    pub fn key(&self) -> &DocumentKey {
        &self.inner.key
    }

    pub fn id(&self) -> &str {
        self.inner.key.id()
    }

    pub fn create_time(&self) -> Option<Timestamp> {
        self.inner.create_time
    }

    pub fn update_time(&self) -> Option<Timestamp> {
        self.inner.update_time
    }

    /// Read time of the snapshot that produced this document version.
    pub fn read_time(&self) -> Option<Timestamp> {
        self.inner.read_time
    }

    /// Raw proto-JSON fields as delivered by the backend.
    pub fn raw_fields(&self) -> &JsonMap<String, JsonValue> {
        &self.inner.fields
    }

    /// Decodes the value stored at `path`, or `None` when the field is absent.
    pub fn field(&self, path: &FieldPath) -> WatchResult<Option<FieldValue>> {
        let Some((first, rest)) = path.segments().split_first() else {
            return Ok(None);
        };
        let mut current = match self.inner.fields.get(first) {
            Some(value) => value,
            None => return Ok(None),
        };
        for segment in rest {
            let nested = current
                .get("mapValue")
                .and_then(|map| map.get("fields"))
                .and_then(|fields| fields.get(segment));
            current = match nested {
                Some(value) => value,
                None => return Ok(None),
            };
        }
        FieldValue::from_proto(current).map(Some)
    }

    /// Decodes every field of the document.
    pub fn data(&self) -> WatchResult<BTreeMap<String, FieldValue>> {
        decode_map_fields(&self.inner.fields)
    }

    /// Renders the document fields as plain JSON.
    pub fn to_json(&self) -> WatchResult<JsonValue> {
        let data = self.data()?;
        Ok(JsonValue::Object(
            data.into_iter()
                .map(|(key, value)| (key, value.to_json()))
                .collect(),
        ))
    }

    pub fn deserialize<T>(&self) -> WatchResult<T>
    where
        T: DeserializeOwned,
    {
        serde_json::from_value(self.to_json()?).map_err(|err| {
            invalid_argument(format!(
                "Failed to deserialize document {}: {err}",
                self.inner.key
            ))
        })
    }
}

/// Mutable precursor of a [`DocumentSnapshot`] collected between snapshots.
/// The read time is stamped when the snapshot that includes it is assembled.
#[derive(Clone, Debug)]
pub struct DocumentSnapshotBuilder {
    key: DocumentKey,
    fields: JsonMap<String, JsonValue>,
    create_time: Option<Timestamp>,
    update_time: Option<Timestamp>,
    read_time: Option<Timestamp>,
}

impl DocumentSnapshotBuilder {
    pub fn new(key: DocumentKey) -> Self {
        Self {
            key,
            fields: JsonMap::new(),
            create_time: None,
            update_time: None,
            read_time: None,
        }
    }

    pub fn fields(mut self, fields: JsonMap<String, JsonValue>) -> Self {
        self.fields = fields;
        self
    }

    pub fn create_time(mut self, time: Option<Timestamp>) -> Self {
        self.create_time = time;
        self
    }

    pub fn update_time(mut self, time: Option<Timestamp>) -> Self {
        self.update_time = time;
        self
    }

    pub fn set_read_time(&mut self, time: Timestamp) {
        self.read_time = Some(time);
    }

    pub fn key(&self) -> &DocumentKey {
        &self.key
    }

    pub fn build(self) -> DocumentSnapshot {
        DocumentSnapshot {
            inner: Arc::new(SnapshotInner {
                key: self.key,
                fields: self.fields,
                create_time: self.create_time,
                update_time: self.update_time,
                read_time: self.read_time,
            }),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentChangeType {
    Added,
    Removed,
    Modified,
}

/// One entry of the ordered change list delivered with a snapshot.
///
/// `old_index` is `None` for additions and `new_index` is `None` for removals.
#[derive(Clone, Debug)]
pub struct DocumentChange {
    change_type: DocumentChangeType,
    document: DocumentSnapshot,
    old_index: Option<usize>,
    new_index: Option<usize>,
}

impl DocumentChange {
    pub fn new(
        change_type: DocumentChangeType,
        document: DocumentSnapshot,
        old_index: Option<usize>,
        new_index: Option<usize>,
    ) -> Self {
        Self {
            change_type,
            document,
            old_index,
            new_index,
        }
    }

    pub fn change_type(&self) -> DocumentChangeType {
        self.change_type
    }

    pub fn document(&self) -> &DocumentSnapshot {
        &self.document
    }

    pub fn old_index(&self) -> Option<usize> {
        self.old_index
    }

    pub fn new_index(&self) -> Option<usize> {
        self.new_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    fn city() -> DocumentSnapshot {
        let fields = json!({
            "name": { "stringValue": "San Francisco" },
            "population": { "integerValue": "870000" },
            "location": {
                "mapValue": { "fields": { "state": { "stringValue": "CA" } } }
            }
        });
        let mut builder = DocumentSnapshotBuilder::new(DocumentKey::from_string("cities/sf").unwrap())
            .fields(fields.as_object().cloned().unwrap())
            .update_time(Some(Timestamp::new(2, 0)));
        builder.set_read_time(Timestamp::new(3, 0));
        builder.build()
    }

    #[test]
    fn looks_up_nested_fields_lazily() {
        let snapshot = city();
        let state = snapshot
            .field(&FieldPath::from_dot_separated("location.state").unwrap())
            .unwrap();
        assert_eq!(state, Some(FieldValue::from_string("CA")));
        let missing = snapshot
            .field(&FieldPath::from_dot_separated("location.zip").unwrap())
            .unwrap();
        assert!(missing.is_none());
        assert_eq!(snapshot.read_time(), Some(Timestamp::new(3, 0)));
        assert_eq!(snapshot.id(), "sf");
    }

    #[test]
    fn deserializes_into_typed_struct() {
        #[derive(Deserialize)]
        struct City {
            name: String,
            population: i64,
        }

        let city: City = city().deserialize().unwrap();
        assert_eq!(city.name, "San Francisco");
        assert_eq!(city.population, 870_000);
    }
}
