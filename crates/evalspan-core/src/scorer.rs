use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::context::Context;
use crate::task::EvalData;
use crate::types::{Metadata, Score};

#[async_trait]
pub trait Scorer<I, R>: Send + Sync
where
    I: EvalData,
    R: EvalData,
{
    fn name(&self) -> &str;

    /// Scores one task result. Returned scores with an empty name are
    /// attributed to [`Scorer::name`].
    async fn run(
        &self,
        cx: &Context,
        input: &I,
        expected: &R,
        result: &R,
        metadata: &Metadata,
    ) -> Result<Vec<Score>>;
}

/// Owned arguments handed to a closure scorer.
#[derive(Debug, Clone)]
pub struct ScoreArgs<I, R> {
    pub cx: Context,
    pub input: I,
    pub expected: R,
    pub result: R,
    pub metadata: Metadata,
}

/// A scorer made of a name and an async function.
pub struct FnScorer<F> {
    name: String,
    f: F,
}

/// Wrap an async closure as a named `Scorer`.
pub fn scorer_fn<I, R, F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn Scorer<I, R>>
where
    I: EvalData,
    R: EvalData,
    F: Fn(ScoreArgs<I, R>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<Score>>> + Send + 'static,
{
    Arc::new(FnScorer {
        name: name.into(),
        f,
    })
}

#[async_trait]
impl<I, R, F, Fut> Scorer<I, R> for FnScorer<F>
where
    I: EvalData,
    R: EvalData,
    F: Fn(ScoreArgs<I, R>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<Score>>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(
        &self,
        cx: &Context,
        input: &I,
        expected: &R,
        result: &R,
        metadata: &Metadata,
    ) -> Result<Vec<Score>> {
        (self.f)(ScoreArgs {
            cx: cx.clone(),
            input: input.clone(),
            expected: expected.clone(),
            result: result.clone(),
            metadata: metadata.clone(),
        })
        .await
    }
}

/// Fills empty score names with the scorer's own name.
pub fn attribute_scores(scorer_name: &str, scores: Vec<Score>) -> Vec<Score> {
    scores
        .into_iter()
        .map(|mut s| {
            if s.name.is_empty() {
                s.name = scorer_name.to_string();
            }
            s
        })
        .collect()
}
