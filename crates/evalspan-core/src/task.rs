use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::context::Context;

/// Bounds every case input and task result must meet to cross worker
/// boundaries and land in span attributes.
pub trait EvalData: Serialize + Clone + Send + Sync + 'static {}

impl<T> EvalData for T where T: Serialize + Clone + Send + Sync + 'static {}

/// The unit of work under evaluation.
#[async_trait]
pub trait Task<I, R>: Send + Sync
where
	I: EvalData,
	R: EvalData,
{
	async fn run(&self, cx: &Context, input: &I) -> Result<R>;
}

/// Wrap an async closure as a `Task`. The closure receives its own copy of
/// the context and the case input.
pub fn task_fn<I, R, F, Fut>(f: F) -> Arc<dyn Task<I, R>>
where
	I: EvalData,
	R: EvalData,
	F: Fn(Context, I) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Result<R>> + Send + 'static,
{
	struct ClosureTask<F> {
		f: F,
	}

	#[async_trait]
	impl<I, R, F, Fut> Task<I, R> for ClosureTask<F>
	where
		I: EvalData,
		R: EvalData,
		F: Fn(Context, I) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<R>> + Send + 'static,
	{
		async fn run(&self, cx: &Context, input: &I) -> Result<R> {
			(self.f)(cx.clone(), input.clone()).await
		}
	}

	Arc::new(ClosureTask { f })
}
