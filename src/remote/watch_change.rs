use serde::Deserialize;
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::error::{internal_error, invalid_argument, WatchError, WatchResult};
use crate::model::{DocumentKey, Timestamp};
use crate::remote::serializer::{decode_i64, JsonProtoSerializer};

/// One frame received on a listen stream.
#[derive(Clone, Debug)]
pub enum ListenResponse {
    TargetChange(ListenTargetChange),
    DocumentChange(ListenDocumentChange),
    DocumentDelete(DocumentDelete),
    DocumentRemove(DocumentRemove),
    Filter(ExistenceFilter),
    Unknown(JsonValue),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TargetChangeState {
    NoChange,
    Add,
    Remove,
    Current,
    Reset,
    Unrecognized(String),
}

impl TargetChangeState {
    fn from_wire(value: &str) -> Self {
        match value {
            "NO_CHANGE" => TargetChangeState::NoChange,
            "ADD" => TargetChangeState::Add,
            "REMOVE" => TargetChangeState::Remove,
            "CURRENT" => TargetChangeState::Current,
            "RESET" => TargetChangeState::Reset,
            other => TargetChangeState::Unrecognized(other.to_string()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ListenTargetChange {
    pub state: TargetChangeState,
    pub target_ids: Vec<i32>,
    pub resume_token: Option<Vec<u8>>,
    pub read_time: Option<Timestamp>,
    pub cause: Option<WatchError>,
}

impl ListenTargetChange {
    /// True when the change applies to `target_id`; an empty id list
    /// addresses every target on the stream.
    pub fn affects_target(&self, target_id: i32) -> bool {
        self.target_ids.is_empty() || self.target_ids.contains(&target_id)
    }
}

/// Document contents carried by a `documentChange` frame.
#[derive(Clone, Debug)]
pub struct WatchDocument {
    pub key: DocumentKey,
    pub fields: JsonMap<String, JsonValue>,
    pub create_time: Option<Timestamp>,
    pub update_time: Option<Timestamp>,
}

#[derive(Clone, Debug)]
pub struct ListenDocumentChange {
    pub target_ids: Vec<i32>,
    pub removed_target_ids: Vec<i32>,
    pub document: WatchDocument,
}

#[derive(Clone, Debug)]
pub struct DocumentDelete {
    pub key: DocumentKey,
    pub read_time: Option<Timestamp>,
    pub removed_target_ids: Vec<i32>,
}

#[derive(Clone, Debug)]
pub struct DocumentRemove {
    pub key: DocumentKey,
    pub read_time: Option<Timestamp>,
    pub removed_target_ids: Vec<i32>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExistenceFilter {
    pub target_id: i32,
    pub count: i32,
}

#[derive(Deserialize)]
struct StatusCause {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: Option<String>,
}

/// Decodes a proto-JSON listen response. Frames with no recognised payload
/// decode to [`ListenResponse::Unknown`].
pub fn decode_listen_response(
    serializer: &JsonProtoSerializer,
    value: &JsonValue,
) -> WatchResult<ListenResponse> {
    if let Some(target_change) = value.get("targetChange") {
        let state = target_change
            .get("targetChangeType")
            .and_then(JsonValue::as_str)
            .map(TargetChangeState::from_wire)
            .unwrap_or(TargetChangeState::NoChange);
        let resume_token = target_change
            .get("resumeToken")
            .and_then(JsonValue::as_str)
            .map(|token| serializer.decode_bytes(token))
            .transpose()?;
        let cause = target_change
            .get("cause")
            .map(|cause| serde_json::from_value::<StatusCause>(cause.clone()))
            .transpose()
            .map_err(|err| internal_error(format!("Failed to decode listen cause: {err}")))?
            .map(|cause| {
                WatchError::from_status(cause.code, cause.message.unwrap_or_default())
            });
        return Ok(ListenResponse::TargetChange(ListenTargetChange {
            state,
            target_ids: decode_target_ids(target_change.get("targetIds"))?,
            resume_token,
            read_time: decode_read_time(serializer, target_change)?,
            cause,
        }));
    }

    if let Some(document_change) = value.get("documentChange") {
        let document = document_change
            .get("document")
            .ok_or_else(|| invalid_argument("documentChange missing document"))?;
        return Ok(ListenResponse::DocumentChange(ListenDocumentChange {
            target_ids: decode_target_ids(document_change.get("targetIds"))?,
            removed_target_ids: decode_target_ids(document_change.get("removedTargetIds"))?,
            document: decode_document(serializer, document)?,
        }));
    }

    if let Some(document_delete) = value.get("documentDelete") {
        return Ok(ListenResponse::DocumentDelete(DocumentDelete {
            key: decode_document_key(serializer, document_delete, "documentDelete")?,
            read_time: decode_read_time(serializer, document_delete)?,
            removed_target_ids: decode_target_ids(document_delete.get("removedTargetIds"))?,
        }));
    }

    if let Some(document_remove) = value.get("documentRemove") {
        return Ok(ListenResponse::DocumentRemove(DocumentRemove {
            key: decode_document_key(serializer, document_remove, "documentRemove")?,
            read_time: decode_read_time(serializer, document_remove)?,
            removed_target_ids: decode_target_ids(document_remove.get("removedTargetIds"))?,
        }));
    }

    if let Some(filter) = value.get("filter") {
        let target_id = filter
            .get("targetId")
            .map(decode_i32)
            .transpose()?
            .unwrap_or(0);
        let count = filter
            .get("count")
            .map(decode_i32)
            .transpose()?
            .unwrap_or(0);
        return Ok(ListenResponse::Filter(ExistenceFilter { target_id, count }));
    }

    Ok(ListenResponse::Unknown(value.clone()))
}

fn decode_target_ids(value: Option<&JsonValue>) -> WatchResult<Vec<i32>> {
    match value {
        None | Some(JsonValue::Null) => Ok(Vec::new()),
        Some(JsonValue::Array(values)) => values
            .iter()
            .map(decode_i32)
            .collect(),
        Some(other) => Err(invalid_argument(format!(
            "Expected a list of target ids, got {other}"
        ))),
    }
}

fn decode_i32(value: &JsonValue) -> WatchResult<i32> {
    let wide = decode_i64(value)?;
    i32::try_from(wide).map_err(|_| invalid_argument(format!("Integer {wide} is out of range")))
}

fn decode_read_time(
    serializer: &JsonProtoSerializer,
    value: &JsonValue,
) -> WatchResult<Option<Timestamp>> {
    value
        .get("readTime")
        .map(|time| serializer.decode_timestamp(time))
        .transpose()
}

fn decode_document_key(
    serializer: &JsonProtoSerializer,
    value: &JsonValue,
    frame: &str,
) -> WatchResult<DocumentKey> {
    let name = value
        .get("document")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| invalid_argument(format!("{frame} missing document field")))?;
    serializer.document_key_from_name(name)
}

fn decode_document(
    serializer: &JsonProtoSerializer,
    document: &JsonValue,
) -> WatchResult<WatchDocument> {
    let name = document
        .get("name")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| invalid_argument("document missing name"))?;
    let fields = match document.get("fields") {
        None | Some(JsonValue::Null) => JsonMap::new(),
        Some(JsonValue::Object(fields)) => fields.clone(),
        Some(other) => {
            return Err(invalid_argument(format!(
                "document fields must be an object, got {other}"
            )))
        }
    };
    let create_time = document
        .get("createTime")
        .map(|time| serializer.decode_timestamp(time))
        .transpose()?;
    let update_time = document
        .get("updateTime")
        .map(|time| serializer.decode_timestamp(time))
        .transpose()?;
    Ok(WatchDocument {
        key: serializer.document_key_from_name(name)?,
        fields,
        create_time,
        update_time,
    })
}
