use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use evalspan_types::{Metadata, SpanType};

/// The fixed set of attribute keys the engine writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AttrKey {
    InputJson,
    OutputJson,
    Expected,
    SpanAttributes,
    Scores,
    Tags,
    Metadata,
    Parent,
}

impl AttrKey {
    pub const ALL: [AttrKey; 8] = [
        AttrKey::InputJson,
        AttrKey::OutputJson,
        AttrKey::Expected,
        AttrKey::SpanAttributes,
        AttrKey::Scores,
        AttrKey::Tags,
        AttrKey::Metadata,
        AttrKey::Parent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AttrKey::InputJson => "input_json",
            AttrKey::OutputJson => "output_json",
            AttrKey::Expected => "expected",
            AttrKey::SpanAttributes => "span_attributes",
            AttrKey::Scores => "scores",
            AttrKey::Tags => "tags",
            AttrKey::Metadata => "metadata",
            AttrKey::Parent => "parent",
        }
    }

    pub fn parse(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == key)
    }
}

impl fmt::Display for AttrKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("failed to encode `{key}` attribute: {source}")]
pub struct AttributeError {
    pub key: AttrKey,
    #[source]
    pub source: serde_json::Error,
}

/// Typed builder for span attributes. Every value except `parent` is stored
/// JSON-encoded; a value that fails to encode is skipped and its error kept
/// for [`SpanAttributes::take_errors`].
#[derive(Debug, Default)]
pub struct SpanAttributes {
    values: BTreeMap<AttrKey, String>,
    errors: Vec<AttributeError>,
}

impl SpanAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn span_type(self, ty: SpanType) -> Self {
        self.json(AttrKey::SpanAttributes, &serde_json::json!({ "type": ty }))
    }

    pub fn input<T: Serialize + ?Sized>(self, input: &T) -> Self {
        self.json(AttrKey::InputJson, input)
    }

    pub fn output<T: Serialize + ?Sized>(self, output: &T) -> Self {
        self.json(AttrKey::OutputJson, output)
    }

    pub fn expected<T: Serialize + ?Sized>(self, expected: &T) -> Self {
        self.json(AttrKey::Expected, expected)
    }

    pub fn scores(self, scores: &BTreeMap<String, f64>) -> Self {
        self.json(AttrKey::Scores, scores)
    }

    pub fn tags(self, tags: &[String]) -> Self {
        self.json(AttrKey::Tags, tags)
    }

    pub fn metadata(self, metadata: &Metadata) -> Self {
        self.json(AttrKey::Metadata, metadata)
    }

    pub fn parent(mut self, parent: impl fmt::Display) -> Self {
        self.values.insert(AttrKey::Parent, parent.to_string());
        self
    }

    fn json<T: Serialize + ?Sized>(mut self, key: AttrKey, value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(encoded) => {
                self.values.insert(key, encoded);
            }
            Err(source) => self.errors.push(AttributeError { key, source }),
        }
        self
    }

    /// Later values overwrite earlier ones; errors accumulate.
    pub fn merge(&mut self, other: SpanAttributes) {
        self.values.extend(other.values);
        self.errors.extend(other.errors);
    }

    pub fn get(&self, key: AttrKey) -> Option<&str> {
        self.values.get(&key).map(String::as_str)
    }

    /// Decoded value of a JSON-encoded attribute.
    pub fn get_json(&self, key: AttrKey) -> Option<Value> {
        self.get(key).and_then(|raw| serde_json::from_str(raw).ok())
    }

    pub fn into_values(self) -> BTreeMap<AttrKey, String> {
        self.values
    }

    pub fn iter(&self) -> impl Iterator<Item = (AttrKey, &str)> {
        self.values.iter().map(|(k, v)| (*k, v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn take_errors(&mut self) -> Vec<AttributeError> {
        std::mem::take(&mut self.errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::ser::Error as _;
    use serde_json::json;

    struct Unencodable;

    impl Serialize for Unencodable {
        fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(S::Error::custom("not serializable"))
        }
    }

    #[test]
    fn values_are_json_encoded_under_fixed_keys() {
        let attrs = SpanAttributes::new()
            .span_type(SpanType::Task)
            .input(&json!({"q": "hi"}))
            .expected("hello")
            .tags(&["a".to_string()]);
        assert_eq!(attrs.get(AttrKey::SpanAttributes), Some(r#"{"type":"task"}"#));
        assert_eq!(attrs.get(AttrKey::Expected), Some(r#""hello""#));
        assert_eq!(attrs.get_json(AttrKey::InputJson), Some(json!({"q": "hi"})));
        assert_eq!(attrs.get_json(AttrKey::Tags), Some(json!(["a"])));
        assert!(attrs.get(AttrKey::OutputJson).is_none());
    }

    #[test]
    fn encoding_failures_are_collected_not_fatal() {
        let mut attrs = SpanAttributes::new().input(&1).output(&Unencodable);
        assert!(attrs.has_errors());
        assert_eq!(attrs.get(AttrKey::InputJson), Some("1"));
        assert!(attrs.get(AttrKey::OutputJson).is_none());
        let errors = attrs.take_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].key, AttrKey::OutputJson);
        assert!(!attrs.has_errors());
    }

    #[test]
    fn merge_overwrites_and_keys_round_trip() {
        let mut attrs = SpanAttributes::new().output(&1);
        attrs.merge(SpanAttributes::new().output(&2).parent("experiment_id:x"));
        assert_eq!(attrs.get(AttrKey::OutputJson), Some("2"));
        assert_eq!(attrs.get(AttrKey::Parent), Some("experiment_id:x"));
        for key in AttrKey::ALL {
            assert_eq!(AttrKey::parse(key.as_str()), Some(key));
        }
    }
}
