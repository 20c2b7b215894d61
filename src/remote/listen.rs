use serde_json::{json, Map as JsonMap, Value as JsonValue};

use crate::remote::serializer::JsonProtoSerializer;

/// One target registered on a listen stream.
#[derive(Clone, Debug, PartialEq)]
pub struct ListenTarget {
    target_id: i32,
    payload: TargetPayload,
    resume_token: Option<Vec<u8>>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TargetPayload {
    Query {
        parent: String,
        structured_query: JsonValue,
    },
    Documents {
        documents: Vec<String>,
    },
}

impl ListenTarget {
    pub fn new(target_id: i32, payload: TargetPayload) -> Self {
        Self {
            target_id,
            payload,
            resume_token: None,
        }
    }

    pub fn target_id(&self) -> i32 {
        self.target_id
    }

    pub fn payload(&self) -> &TargetPayload {
        &self.payload
    }

    pub fn resume_token(&self) -> Option<&[u8]> {
        self.resume_token.as_deref()
    }

    pub fn with_resume_token(mut self, token: Option<Vec<u8>>) -> Self {
        self.resume_token = token;
        self
    }
}

/// The single request sent when a listen stream opens.
#[derive(Clone, Debug, PartialEq)]
pub struct ListenRequest {
    database: String,
    add_target: ListenTarget,
}

impl ListenRequest {
    pub fn new(database: impl Into<String>, add_target: ListenTarget) -> Self {
        Self {
            database: database.into(),
            add_target,
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn target(&self) -> &ListenTarget {
        &self.add_target
    }

    pub fn to_json(&self, serializer: &JsonProtoSerializer) -> JsonValue {
        let target = &self.add_target;
        let mut add_target = JsonMap::new();
        add_target.insert("targetId".to_string(), json!(target.target_id));
        if let Some(token) = target.resume_token() {
            add_target.insert(
                "resumeToken".to_string(),
                json!(serializer.encode_bytes(token)),
            );
        }
        match target.payload() {
            TargetPayload::Query {
                parent,
                structured_query,
            } => {
                add_target.insert(
                    "query".to_string(),
                    json!({ "parent": parent, "structuredQuery": structured_query }),
                );
            }
            TargetPayload::Documents { documents } => {
                add_target.insert("documents".to_string(), json!({ "documents": documents }));
            }
        }

        json!({
            "database": self.database,
            "addTarget": JsonValue::Object(add_target),
        })
    }
}
