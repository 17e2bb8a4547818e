use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use strsim::levenshtein;

use crate::context::Context;
use crate::scorer::Scorer;
use crate::task::EvalData;
use crate::types::{Metadata, Score};

/// Normalized edit similarity between the stringified result and expected
/// values. Metadata records whether `min_similarity` was met.
pub struct LevenshteinScorer {
    pub min_similarity: f64,
}

impl LevenshteinScorer {
    pub fn new(min_similarity: f64) -> Self {
        Self { min_similarity }
    }
}

#[async_trait]
impl<I, R> Scorer<I, R> for LevenshteinScorer
where
    I: EvalData,
    R: EvalData,
{
    fn name(&self) -> &str {
        "levenshtein"
    }

    async fn run(
        &self,
        _cx: &Context,
        _input: &I,
        expected: &R,
        result: &R,
        _metadata: &Metadata,
    ) -> Result<Vec<Score>> {
        let e = stringify(&serde_json::to_value(expected)?);
        let o = stringify(&serde_json::to_value(result)?);
        let max_len = e.chars().count().max(o.chars().count()).max(1) as f64;
        let similarity = 1.0 - (levenshtein(&e, &o) as f64 / max_len);
        Ok(vec![Score::new("levenshtein", similarity).with_metadata(json!({
            "min_similarity": self.min_similarity,
            "passed": similarity >= self.min_similarity,
        }))])
    }
}

pub(crate) fn stringify(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        _ => v.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn similarity_is_normalized() {
        let scorer = LevenshteinScorer::new(0.5);
        let scores = Scorer::<Value, Value>::run(
            &scorer,
            &Context::new(),
            &Value::Null,
            &json!("kitten"),
            &json!("sitten"),
            &Metadata::new(),
        )
        .await
        .unwrap();
        let s = &scores[0];
        assert!((s.score - (1.0 - 1.0 / 6.0)).abs() < 1e-9);
        assert_eq!(s.metadata.as_ref().unwrap()["passed"], json!(true));
    }

    #[tokio::test]
    async fn empty_values_are_identical() {
        let scorer = LevenshteinScorer::new(1.0);
        let scores = Scorer::<Value, Value>::run(
            &scorer,
            &Context::new(),
            &Value::Null,
            &Value::Null,
            &json!(""),
            &Metadata::new(),
        )
        .await
        .unwrap();
        assert_eq!(scores[0].score, 1.0);
    }
}
