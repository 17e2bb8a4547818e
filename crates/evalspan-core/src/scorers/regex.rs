use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;

use super::levenshtein::stringify;
use crate::context::Context;
use crate::scorer::Scorer;
use crate::task::EvalData;
use crate::types::{Metadata, Score};

/// Checks if the result matches a regex pattern.
pub struct RegexScorer {
	pattern: Regex,
}

impl RegexScorer {
	/// Creates a regex scorer with the given pattern.
	pub fn new(pattern: &str) -> Result<Self> {
		Ok(Self {
			pattern: Regex::new(pattern)?,
		})
	}
}

#[async_trait]
impl<I, R> Scorer<I, R> for RegexScorer
where
	I: EvalData,
	R: EvalData,
{
	fn name(&self) -> &str {
		"regex"
	}

	async fn run(
		&self,
		_cx: &Context,
		_input: &I,
		_expected: &R,
		result: &R,
		_metadata: &Metadata,
	) -> Result<Vec<Score>> {
		let output = stringify(&serde_json::to_value(result)?);
		let captures: Option<Vec<String>> = self.pattern.captures(&output).map(|caps| {
			caps.iter()
				.flatten()
				.map(|m| m.as_str().to_string())
				.collect()
		});
		let value = if captures.is_some() { 1.0 } else { 0.0 };
		Ok(vec![Score::new("regex", value).with_metadata(serde_json::json!({
			"pattern": self.pattern.as_str(),
			"captures": captures,
		}))])
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[tokio::test]
	async fn matches_and_reports_captures() {
		let scorer = RegexScorer::new(r"(\d{3})-(\d{4})").unwrap();
		let scores = Scorer::<(), String>::run(
			&scorer,
			&Context::new(),
			&(),
			&String::new(),
			&"call 555-1234".to_string(),
			&Metadata::new(),
		)
		.await
		.unwrap();
		assert_eq!(scores[0].score, 1.0);
		assert_eq!(
			scores[0].metadata.as_ref().unwrap()["captures"],
			json!(["555-1234", "555", "1234"])
		);
	}

	#[tokio::test]
	async fn no_match_scores_zero() {
		let scorer = RegexScorer::new(r"^\d+$").unwrap();
		let scores = Scorer::<(), String>::run(
			&scorer,
			&Context::new(),
			&(),
			&String::new(),
			&"abc".to_string(),
			&Metadata::new(),
		)
		.await
		.unwrap();
		assert_eq!(scores[0].score, 0.0);
	}

	#[test]
	fn invalid_pattern_is_rejected() {
		assert!(RegexScorer::new("(").is_err());
	}
}
