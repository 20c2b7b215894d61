use crate::error::{invalid_argument, WatchResult};

const DOCUMENT_ID_FIELD: &str = "__name__";

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    pub fn new<S, I>(segments: I) -> WatchResult<Self>
    where
        S: Into<String>,
        I: IntoIterator<Item = S>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() {
            return Err(invalid_argument(
                "FieldPath must contain at least one segment",
            ));
        }
        if segments.iter().any(String::is_empty) {
            return Err(invalid_argument("FieldPath segments cannot be empty"));
        }
        Ok(Self { segments })
    }

    pub fn from_dot_separated(path: &str) -> WatchResult<Self> {
        if path.trim().is_empty() {
            return Err(invalid_argument("FieldPath string cannot be empty"));
        }
        FieldPath::new(path.split('.'))
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn canonical_string(&self) -> String {
        self.segments.join(".")
    }

    /// Sentinel path that addresses the document key rather than a field.
    pub fn document_id() -> Self {
        Self {
            segments: vec![DOCUMENT_ID_FIELD.to_string()],
        }
    }

    pub fn is_document_id(&self) -> bool {
        self.segments.len() == 1 && self.segments[0] == DOCUMENT_ID_FIELD
    }
}

/// Converts common user inputs into a validated [`FieldPath`].
pub trait IntoFieldPath {
    fn into_field_path(self) -> WatchResult<FieldPath>;
}

impl IntoFieldPath for FieldPath {
    fn into_field_path(self) -> WatchResult<FieldPath> {
        Ok(self)
    }
}

impl IntoFieldPath for &FieldPath {
    fn into_field_path(self) -> WatchResult<FieldPath> {
        Ok(self.clone())
    }
}

impl IntoFieldPath for &str {
    fn into_field_path(self) -> WatchResult<FieldPath> {
        FieldPath::from_dot_separated(self)
    }
}

impl IntoFieldPath for String {
    fn into_field_path(self) -> WatchResult<FieldPath> {
        FieldPath::from_dot_separated(&self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dotted_paths() {
        let path = FieldPath::from_dot_separated("address.city").unwrap();
        assert_eq!(path.segments(), &["address".to_string(), "city".to_string()]);
        assert_eq!(path.canonical_string(), "address.city");
    }

    #[test]
    fn rejects_empty_segments() {
        assert!(FieldPath::from_dot_separated("a..b").is_err());
        assert!(FieldPath::from_dot_separated(" ").is_err());
    }

    #[test]
    fn recognizes_document_id() {
        assert!(FieldPath::document_id().is_document_id());
        assert!("__name__".into_field_path().unwrap().is_document_id());
        assert!(!"name".into_field_path().unwrap().is_document_id());
    }
}
