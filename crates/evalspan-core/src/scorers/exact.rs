use anyhow::Result;
use async_trait::async_trait;

use crate::context::Context;
use crate::scorer::Scorer;
use crate::task::EvalData;
use crate::types::{Metadata, Score};

/// 1.0 when the result equals the expected value, else 0.0.
pub struct ExactMatchScorer;

#[async_trait]
impl<I, R> Scorer<I, R> for ExactMatchScorer
where
	I: EvalData,
	R: EvalData + PartialEq,
{
	fn name(&self) -> &str {
		"exact_match"
	}

	async fn run(
		&self,
		_cx: &Context,
		_input: &I,
		expected: &R,
		result: &R,
		_metadata: &Metadata,
	) -> Result<Vec<Score>> {
		let value = if expected == result { 1.0 } else { 0.0 };
		Ok(vec![Score::new("exact_match", value)])
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn scores_equality() {
		let cx = Context::new();
		let meta = Metadata::new();
		let hit = Scorer::<(), String>::run(&ExactMatchScorer, &cx, &(), &"a".into(), &"a".into(), &meta)
			.await
			.unwrap();
		let miss = Scorer::<(), String>::run(&ExactMatchScorer, &cx, &(), &"a".into(), &"b".into(), &meta)
			.await
			.unwrap();
		assert_eq!(hit[0].score, 1.0);
		assert_eq!(miss[0].score, 0.0);
	}
}
