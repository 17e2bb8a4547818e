use anyhow::Result;
use async_trait::async_trait;

use super::levenshtein::stringify;
use crate::context::Context;
use crate::scorer::Scorer;
use crate::task::EvalData;
use crate::types::{Metadata, Score};

/// Checks if the result contains a substring.
pub struct ContainsScorer {
    substring: String,
    case_sensitive: bool,
}

impl ContainsScorer {
    /// Creates a case-sensitive contains scorer.
    pub fn new(substring: impl Into<String>) -> Self {
        Self {
            substring: substring.into(),
            case_sensitive: true,
        }
    }

    /// Creates a case-insensitive contains scorer.
    pub fn case_insensitive(substring: impl Into<String>) -> Self {
        Self {
            substring: substring.into(),
            case_sensitive: false,
        }
    }

    fn check(&self, haystack: &str) -> bool {
        if self.case_sensitive {
            haystack.contains(&self.substring)
        } else {
            haystack
                .to_lowercase()
                .contains(&self.substring.to_lowercase())
        }
    }
}

#[async_trait]
impl<I, R> Scorer<I, R> for ContainsScorer
where
    I: EvalData,
    R: EvalData,
{
    fn name(&self) -> &str {
        "contains"
    }

    async fn run(
        &self,
        _cx: &Context,
        _input: &I,
        _expected: &R,
        result: &R,
        _metadata: &Metadata,
    ) -> Result<Vec<Score>> {
        let found = self.check(&stringify(&serde_json::to_value(result)?));
        Ok(vec![Score::new("contains", if found { 1.0 } else { 0.0 }).with_metadata(
            serde_json::json!({
                "substring": self.substring,
                "case_sensitive": self.case_sensitive,
            }),
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    async fn score(scorer: &ContainsScorer, output: Value) -> f64 {
        let scores = Scorer::<Value, Value>::run(
            scorer,
            &Context::new(),
            &Value::Null,
            &json!(""),
            &output,
            &Metadata::new(),
        )
        .await
        .unwrap();
        scores[0].score
    }

    #[tokio::test]
    async fn test_contains_found() {
        let scorer = ContainsScorer::new("Paris");
        assert_eq!(score(&scorer, json!("The capital of France is Paris")).await, 1.0);
    }

    #[tokio::test]
    async fn test_contains_not_found() {
        let scorer = ContainsScorer::new("London");
        assert_eq!(score(&scorer, json!("The capital of France is Paris")).await, 0.0);
    }

    #[tokio::test]
    async fn test_contains_case_insensitive() {
        let scorer = ContainsScorer::case_insensitive("PARIS");
        assert_eq!(score(&scorer, json!("The capital of France is paris")).await, 1.0);
    }

    #[tokio::test]
    async fn test_contains_searches_structured_output() {
        let scorer = ContainsScorer::new("Paris");
        assert_eq!(score(&scorer, json!({"city": "Paris"})).await, 1.0);
    }
}
