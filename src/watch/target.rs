use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use serde_json::{json, Map as JsonMap, Value as JsonValue};

use crate::constants::WATCH_TARGET_ID;
use crate::error::{invalid_argument, WatchResult};
use crate::model::{DocumentKey, FieldPath, IntoFieldPath, ResourcePath};
use crate::remote::listen::{ListenTarget, TargetPayload};
use crate::remote::serializer::JsonProtoSerializer;
use crate::value::{compare_values, FieldValue, ValueKind};
use crate::watch::document::DocumentSnapshot;
use crate::watch::sorted_tree::Comparator;

pub type DocumentComparator = Comparator<DocumentSnapshot>;

/// Orders documents by key.
pub fn key_comparator() -> DocumentComparator {
    Arc::new(|left: &DocumentSnapshot, right: &DocumentSnapshot| left.key().cmp(right.key()))
}

/// What a watch listens to: how to describe it to the backend and how to
/// order the documents it yields.
pub trait WatchTarget: Send + Sync + 'static {
    fn comparator(&self) -> DocumentComparator;

    fn listen_target(
        &self,
        serializer: &JsonProtoSerializer,
        resume_token: Option<&[u8]>,
    ) -> WatchResult<ListenTarget>;

    /// Short description used in log lines.
    fn describe(&self) -> String;
}

/// Watches a single document.
#[derive(Clone, Debug)]
pub struct DocumentTarget {
    key: DocumentKey,
}

impl DocumentTarget {
    pub fn new(key: DocumentKey) -> Self {
        Self { key }
    }

    pub fn key(&self) -> &DocumentKey {
        &self.key
    }
}

impl WatchTarget for DocumentTarget {
    // At most one document ever matches.
    fn comparator(&self) -> DocumentComparator {
        Arc::new(|_: &DocumentSnapshot, _: &DocumentSnapshot| Ordering::Equal)
    }

    fn listen_target(
        &self,
        serializer: &JsonProtoSerializer,
        resume_token: Option<&[u8]>,
    ) -> WatchResult<ListenTarget> {
        let payload = TargetPayload::Documents {
            documents: vec![serializer.document_name(&self.key)],
        };
        Ok(ListenTarget::new(WATCH_TARGET_ID, payload)
            .with_resume_token(resume_token.map(<[u8]>::to_vec)))
    }

    fn describe(&self) -> String {
        format!("document {}", self.key)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterOperator {
    LessThan,
    LessThanOrEqual,
    Equal,
    NotEqual,
    GreaterThanOrEqual,
    GreaterThan,
    ArrayContains,
    ArrayContainsAny,
    In,
    NotIn,
}

impl FilterOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::LessThan => "LESS_THAN",
            FilterOperator::LessThanOrEqual => "LESS_THAN_OR_EQUAL",
            FilterOperator::Equal => "EQUAL",
            FilterOperator::NotEqual => "NOT_EQUAL",
            FilterOperator::GreaterThanOrEqual => "GREATER_THAN_OR_EQUAL",
            FilterOperator::GreaterThan => "GREATER_THAN",
            FilterOperator::ArrayContains => "ARRAY_CONTAINS",
            FilterOperator::ArrayContainsAny => "ARRAY_CONTAINS_ANY",
            FilterOperator::In => "IN",
            FilterOperator::NotIn => "NOT_IN",
        }
    }

    fn expects_array(&self) -> bool {
        matches!(
            self,
            FilterOperator::ArrayContainsAny | FilterOperator::In | FilterOperator::NotIn
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldFilter {
    field: FieldPath,
    operator: FilterOperator,
    value: FieldValue,
}

impl FieldFilter {
    pub fn field(&self) -> &FieldPath {
        &self.field
    }

    pub fn operator(&self) -> FilterOperator {
        self.operator
    }

    pub fn value(&self) -> &FieldValue {
        &self.value
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OrderDirection {
    #[default]
    Ascending,
    Descending,
}

impl OrderDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderDirection::Ascending => "ASCENDING",
            OrderDirection::Descending => "DESCENDING",
        }
    }

    fn apply(&self, ordering: Ordering) -> Ordering {
        match self {
            OrderDirection::Ascending => ordering,
            OrderDirection::Descending => ordering.reverse(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrderBy {
    field: FieldPath,
    direction: OrderDirection,
}

impl OrderBy {
    pub fn field(&self) -> &FieldPath {
        &self.field
    }

    pub fn direction(&self) -> OrderDirection {
        self.direction
    }
}

/// A collection or collection-group query.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryDefinition {
    parent_path: ResourcePath,
    collection_id: String,
    all_descendants: bool,
    filters: Vec<FieldFilter>,
    order_by: Vec<OrderBy>,
    limit: Option<i32>,
}

impl QueryDefinition {
    /// Query over the collection at `path`, e.g. `"rooms/eros/messages"`.
    pub fn collection(path: &str) -> WatchResult<Self> {
        let path = ResourcePath::from_string(path)?;
        if path.len() % 2 == 0 {
            return Err(invalid_argument(format!(
                "Invalid collection path '{path}': collection paths have an odd number of segments"
            )));
        }
        let collection_id = path.last_segment().unwrap_or_default().to_string();
        Ok(Self {
            parent_path: path.without_last(),
            collection_id,
            all_descendants: false,
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        })
    }

    /// Query over every collection named `collection_id` in the database.
    pub fn collection_group(collection_id: &str) -> WatchResult<Self> {
        if collection_id.is_empty() || collection_id.contains('/') {
            return Err(invalid_argument(format!(
                "Invalid collection id '{collection_id}'"
            )));
        }
        Ok(Self {
            parent_path: ResourcePath::root(),
            collection_id: collection_id.to_string(),
            all_descendants: true,
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        })
    }

    pub fn filter(
        mut self,
        field: impl IntoFieldPath,
        operator: FilterOperator,
        value: FieldValue,
    ) -> WatchResult<Self> {
        if operator.expects_array() && !matches!(value.kind(), ValueKind::Array(_)) {
            return Err(invalid_argument(format!(
                "Filter operator {} requires an array value",
                operator.as_str()
            )));
        }
        self.filters.push(FieldFilter {
            field: field.into_field_path()?,
            operator,
            value,
        });
        Ok(self)
    }

    pub fn order_by(mut self, field: impl IntoFieldPath, direction: OrderDirection) -> WatchResult<Self> {
        self.order_by.push(OrderBy {
            field: field.into_field_path()?,
            direction,
        });
        Ok(self)
    }

    pub fn limit(mut self, limit: i32) -> WatchResult<Self> {
        if limit <= 0 {
            return Err(invalid_argument(format!(
                "Query limit must be positive, got {limit}"
            )));
        }
        self.limit = Some(limit);
        Ok(self)
    }

    pub fn parent_path(&self) -> &ResourcePath {
        &self.parent_path
    }

    pub fn collection_id(&self) -> &str {
        &self.collection_id
    }

    pub fn all_descendants(&self) -> bool {
        self.all_descendants
    }

    pub fn filters(&self) -> &[FieldFilter] {
        &self.filters
    }

    pub fn order_by_clauses(&self) -> &[OrderBy] {
        &self.order_by
    }

    pub fn query_limit(&self) -> Option<i32> {
        self.limit
    }

    /// Orders documents by the `orderBy` clauses, then by key in the
    /// direction of the last clause. Documents missing an ordered field sort
    /// before documents that have it.
    pub fn comparator(&self) -> DocumentComparator {
        let order_by = self.order_by.clone();
        let key_direction = order_by
            .last()
            .map(OrderBy::direction)
            .unwrap_or_default();
        Arc::new(move |left: &DocumentSnapshot, right: &DocumentSnapshot| {
            for order in &order_by {
                let ordering = if order.field.is_document_id() {
                    left.key().cmp(right.key())
                } else {
                    compare_fields(left, right, &order.field)
                };
                let ordering = order.direction.apply(ordering);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            key_direction.apply(left.key().cmp(right.key()))
        })
    }

    pub fn encode_structured_query(&self) -> JsonValue {
        let mut structured = JsonMap::new();
        structured.insert(
            "from".to_string(),
            json!([{
                "collectionId": self.collection_id,
                "allDescendants": self.all_descendants,
            }]),
        );

        if !self.filters.is_empty() {
            structured.insert("where".to_string(), encode_filters(&self.filters));
        }

        if !self.order_by.is_empty() {
            let orders: Vec<_> = self
                .order_by
                .iter()
                .map(|order| {
                    json!({
                        "field": { "fieldPath": order.field.canonical_string() },
                        "direction": order.direction.as_str(),
                    })
                })
                .collect();
            structured.insert("orderBy".to_string(), JsonValue::Array(orders));
        }

        if let Some(limit) = self.limit {
            structured.insert("limit".to_string(), json!(limit));
        }

        JsonValue::Object(structured)
    }
}

impl fmt::Display for QueryDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.all_descendants {
            write!(f, "collection group {}", self.collection_id)
        } else if self.parent_path.is_empty() {
            write!(f, "collection {}", self.collection_id)
        } else {
            write!(f, "collection {}/{}", self.parent_path, self.collection_id)
        }
    }
}

fn compare_fields(left: &DocumentSnapshot, right: &DocumentSnapshot, field: &FieldPath) -> Ordering {
    let left = ordering_value(left, field);
    let right = ordering_value(right, field);
    match (left, right) {
        (Some(left), Some(right)) => compare_values(&left, &right),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Malformed values order like missing ones.
fn ordering_value(document: &DocumentSnapshot, field: &FieldPath) -> Option<FieldValue> {
    match document.field(field) {
        Ok(value) => value,
        Err(err) => {
            log::debug!(
                "ordering {} as if {} were missing: {err}",
                document.key(),
                field.canonical_string()
            );
            None
        }
    }
}

fn encode_filters(filters: &[FieldFilter]) -> JsonValue {
    if filters.len() == 1 {
        return encode_field_filter(&filters[0]);
    }

    let nested: Vec<_> = filters
        .iter()
        .map(encode_field_filter)
        .collect();

    json!({
        "compositeFilter": {
            "op": "AND",
            "filters": nested
        }
    })
}

fn encode_field_filter(filter: &FieldFilter) -> JsonValue {
    json!({
        "fieldFilter": {
            "field": { "fieldPath": filter.field.canonical_string() },
            "op": filter.operator.as_str(),
            "value": filter.value.to_proto(),
        }
    })
}

/// Watches the results of a query.
#[derive(Clone, Debug)]
pub struct QueryTarget {
    definition: QueryDefinition,
}

impl QueryTarget {
    pub fn new(definition: QueryDefinition) -> Self {
        Self { definition }
    }

    pub fn definition(&self) -> &QueryDefinition {
        &self.definition
    }
}

impl WatchTarget for QueryTarget {
    fn comparator(&self) -> DocumentComparator {
        self.definition.comparator()
    }

    fn listen_target(
        &self,
        serializer: &JsonProtoSerializer,
        resume_token: Option<&[u8]>,
    ) -> WatchResult<ListenTarget> {
        let payload = TargetPayload::Query {
            parent: serializer.query_parent(self.definition.parent_path()),
            structured_query: self.definition.encode_structured_query(),
        };
        Ok(ListenTarget::new(WATCH_TARGET_ID, payload)
            .with_resume_token(resume_token.map(<[u8]>::to_vec)))
    }

    fn describe(&self) -> String {
        self.definition.to_string()
    }
}
