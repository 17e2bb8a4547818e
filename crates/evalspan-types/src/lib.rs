use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Free-form case metadata, recorded verbatim on the `eval` span.
pub type Metadata = Map<String, Value>;

/// One test example: an input, the value the task is expected to produce,
/// and the tags/metadata that travel with it into the recorded spans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Case<I, R> {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub id: Option<String>,
	pub input: I,
	pub expected: R,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub tags: Vec<String>,
	#[serde(default, skip_serializing_if = "Map::is_empty")]
	pub metadata: Metadata,
}

impl<I, R> Case<I, R> {
	pub fn new(input: I, expected: R) -> Self {
		Self {
			id: None,
			input,
			expected,
			tags: Vec::new(),
			metadata: Metadata::new(),
		}
	}

	pub fn with_id(id: impl Into<String>, input: I, expected: R) -> Self {
		Self {
			id: Some(id.into()),
			..Self::new(input, expected)
		}
	}

	pub fn tag(mut self, tag: impl Into<String>) -> Self {
		self.tags.push(tag.into());
		self
	}

	pub fn meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
		self.metadata.insert(key.into(), value.into());
		self
	}
}

/// A single named score. An empty name is replaced by the owning scorer's
/// name before the score is aggregated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
	#[serde(default)]
	pub name: String,
	pub score: f64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub metadata: Option<Value>,
}

impl Score {
	pub fn new(name: impl Into<String>, score: f64) -> Self {
		Self {
			name: name.into(),
			score,
			metadata: None,
		}
	}

	/// A score whose name is filled in from the scorer that produced it.
	pub fn unnamed(score: f64) -> Self {
		Self::new(String::new(), score)
	}

	pub fn with_metadata(mut self, metadata: Value) -> Self {
		self.metadata = Some(metadata);
		self
	}
}

/// Identifies where the results of a run are recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
	pub experiment_id: String,
	pub name: String,
	pub project_id: String,
	pub project_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
	pub id: String,
	pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Experiment {
	pub id: String,
	pub name: String,
	pub project_id: String,
}

/// Value of the `span_attributes` attribute: `{"type": "eval"|"task"|"score"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanType {
	Eval,
	Task,
	Score,
}

impl SpanType {
	pub fn as_str(&self) -> &'static str {
		match self {
			SpanType::Eval => "eval",
			SpanType::Task => "task",
			SpanType::Score => "score",
		}
	}
}

impl fmt::Display for SpanType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn case_deserializes_without_optional_fields() {
		let case: Case<Value, Value> =
			serde_json::from_value(json!({"input": 1, "expected": 2})).unwrap();
		assert_eq!(case.input, json!(1));
		assert!(case.tags.is_empty());
		assert!(case.metadata.is_empty());
		assert!(case.id.is_none());
	}

	#[test]
	fn case_builder_collects_tags_and_metadata() {
		let case = Case::with_id("c1", "in", "out").tag("smoke").meta("lang", "en");
		assert_eq!(case.id.as_deref(), Some("c1"));
		assert_eq!(case.tags, vec!["smoke".to_string()]);
		assert_eq!(case.metadata.get("lang"), Some(&json!("en")));
	}

	#[test]
	fn span_type_serializes_lowercase() {
		assert_eq!(serde_json::to_value(SpanType::Score).unwrap(), json!("score"));
		assert_eq!(SpanType::Eval.to_string(), "eval");
	}
}
