use crate::eval::EvalResult;
use anyhow::Result;

/// Helper to assert a run finished without any per-case error.
///
/// Use this in your `#[tokio::test]` functions.
///
/// # Example
/// ```ignore
/// #[tokio::test]
/// async fn test_my_agent() -> Result<()> {
///     let result = Eval::builder()
///         .key(key)
///         .case_list(cases)
///         .task(task)
///         .scorers(scorers)
///         .build()?
///         .run()
///         .await;
///
///     assert_no_errors(&result)?;
///     assert_mean_score(&result, "exact_match", 0.8)?;
///
///     Ok(())
/// }
/// ```
pub fn assert_no_errors(result: &EvalResult) -> Result<()> {
    if let Some(err) = &result.error {
        anyhow::bail!(
            "Evaluation failed: {} error(s)\n{}\n{}",
            err.len(),
            err,
            result.summary_table()
        );
    }
    Ok(())
}

/// Helper to assert the mean of one score meets a threshold.
pub fn assert_mean_score(result: &EvalResult, score: &str, min_mean: f64) -> Result<()> {
    let Some(mean) = result.summary.mean(score) else {
        anyhow::bail!("Evaluation failed: no `{}` scores recorded\n{}", score, result.summary_table());
    };
    if mean < min_mean {
        anyhow::bail!(
            "Evaluation failed: mean `{}` {:.3} is below threshold {:.3}\n{}",
            score,
            mean,
            min_mean,
            result.summary_table()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::{json, Value};

    use crate::eval::Eval;
    use crate::scorers::exact::ExactMatchScorer;
    use crate::task::task_fn;
    use crate::tracer::NoopTracer;
    use crate::types::{Case, Key};

    async fn run_echo(cases: Vec<Case<Value, Value>>) -> EvalResult {
        Eval::builder()
            .key(Key {
                experiment_id: "e".into(),
                ..Key::default()
            })
            .case_list(cases)
            .task(task_fn(|_cx, input: Value| async move {
                let s = input.as_str().unwrap_or_default().to_string();
                Ok(json!(format!("{s} World!")))
            }))
            .add_scorer(Arc::new(ExactMatchScorer))
            .tracer(Arc::new(NoopTracer))
            .quiet(true)
            .build()
            .unwrap()
            .run()
            .await
    }

    #[tokio::test]
    async fn passing_run_satisfies_helpers() {
        let result = run_echo(vec![
            Case::with_id("0", json!("Hello"), json!("Hello World!")),
            Case::with_id("1", json!("Hi"), json!("Hi World!")),
        ])
        .await;
        assert_no_errors(&result).unwrap();
        assert_mean_score(&result, "exact_match", 1.0).unwrap();
    }

    #[tokio::test]
    async fn low_mean_is_reported() {
        let result = run_echo(vec![
            Case::with_id("0", json!("Hello"), json!("Hello World!")),
            Case::with_id("1", json!("fail"), json!("Wrong")),
        ])
        .await;
        assert_no_errors(&result).unwrap();
        let err = assert_mean_score(&result, "exact_match", 0.8).unwrap_err();
        assert!(err.to_string().contains("below threshold"));
        assert!(assert_mean_score(&result, "missing", 0.0).is_err());
    }
}
