use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, warn};

use crate::context::Context;
use crate::error::{ErrorAggregator, EvalError, EvalErrors};
use crate::scorer::{attribute_scores, Scorer};
use crate::task::{EvalData, Task};
use crate::tracer::{Span, SpanAttributes, SpanEvent, SpanStatus, Tracer};
use crate::types::{Case, SpanType, SummaryCollector};

/// Runs one case end to end: task, scorers, and the `eval`/`task`/`score`
/// spans around them. Shared by every worker of a run.
pub(crate) struct CaseRunner<I, R> {
	pub(crate) task: Arc<dyn Task<I, R>>,
	pub(crate) scorers: Vec<Arc<dyn Scorer<I, R>>>,
	pub(crate) tracer: Arc<dyn Tracer>,
	pub(crate) errors: Arc<ErrorAggregator>,
	pub(crate) summary: Arc<SummaryCollector>,
}

/// Applies `attrs` to `span`, turning encoding failures into warnings and
/// `attribute_error` events instead of failing the case.
fn set_checked(span: &mut dyn Span, mut attrs: SpanAttributes) {
	for err in attrs.take_errors() {
		warn!(error = %err, "dropping span attribute");
		span.add_event(SpanEvent::new("attribute_error").attr("message", err.to_string()));
	}
	span.set_attributes(attrs);
}

impl<I, R> CaseRunner<I, R>
where
	I: EvalData,
	R: EvalData,
{
	/// Processes one queue slot. Failures go to the aggregator; nothing here
	/// aborts the run.
	pub(crate) async fn run_case(&self, cx: &Context, item: Result<Case<I, R>>) {
		let (eval_cx, mut eval_span) =
			self.tracer
				.start(cx, "eval", SpanAttributes::new().span_type(SpanType::Eval));

		let case = match item {
			Ok(case) => case,
			Err(cause) => {
				let err = EvalError::iteration(cause);
				warn!(error = %err, "skipping case");
				eval_span.record_error(&err);
				eval_span.end();
				self.summary.record_case(true, &BTreeMap::new());
				self.errors.append(err);
				return;
			}
		};

		set_checked(
			eval_span.as_mut(),
			SpanAttributes::new()
				.input(&case.input)
				.expected(&case.expected)
				.tags(&case.tags)
				.metadata(&case.metadata),
		);

		let output = match self.run_task(&eval_cx, &case).await {
			Ok(output) => output,
			Err(err) => {
				debug!(case = ?case.id, error = %err, "task failed");
				eval_span.record_error(&err);
				eval_span.end();
				self.summary.record_case(true, &BTreeMap::new());
				self.errors.append(err);
				return;
			}
		};
		set_checked(eval_span.as_mut(), SpanAttributes::new().output(&output));

		let (scores, failures) = self.run_scorers(&eval_cx, &case, &output).await;
		self.summary.record_case(!failures.is_empty(), &scores);
		match EvalErrors::join(failures) {
			Some(joined) => {
				debug!(case = ?case.id, failures = joined.len(), "scoring failed");
				eval_span.record_error(&joined);
				eval_span.end();
				for err in joined {
					self.errors.append(err);
				}
			}
			None => {
				debug!(case = ?case.id, scores = scores.len(), "case finished");
				eval_span.end();
			}
		}
	}

	async fn run_task(&self, cx: &Context, case: &Case<I, R>) -> Result<R, EvalError> {
		let mut attrs = SpanAttributes::new()
			.span_type(SpanType::Task)
			.input(&case.input)
			.expected(&case.expected);
		let encode_errors = attrs.take_errors();
		let (task_cx, mut span) = self.tracer.start(cx, "task", attrs);
		for err in encode_errors {
			warn!(error = %err, "dropping span attribute");
			span.add_event(SpanEvent::new("attribute_error").attr("message", err.to_string()));
		}

		match self.task.run(&task_cx, &case.input).await {
			Ok(output) => {
				set_checked(span.as_mut(), SpanAttributes::new().output(&output));
				span.end();
				Ok(output)
			}
			Err(cause) => {
				let err = EvalError::task(cause);
				span.record_error(&err);
				span.end();
				Err(err)
			}
		}
	}

	/// Runs every scorer in order. A failing scorer is recorded and skipped;
	/// the scores of the others are still returned.
	async fn run_scorers(
		&self,
		cx: &Context,
		case: &Case<I, R>,
		output: &R,
	) -> (BTreeMap<String, f64>, Vec<EvalError>) {
		let (score_cx, mut span) =
			self.tracer
				.start(cx, "score", SpanAttributes::new().span_type(SpanType::Score));

		let mut scores = BTreeMap::new();
		let mut failures = Vec::new();
		for scorer in &self.scorers {
			let name = scorer.name().to_string();
			match scorer
				.run(&score_cx, &case.input, &case.expected, output, &case.metadata)
				.await
			{
				Ok(produced) => {
					for score in attribute_scores(&name, produced) {
						scores.insert(score.name, score.score);
					}
				}
				Err(cause) => {
					let err = EvalError::scorer(cause.context(format!("scorer `{name}` failed")));
					span.add_event(SpanEvent::exception(&err).attr("scorer", name));
					failures.push(err);
				}
			}
		}

		set_checked(span.as_mut(), SpanAttributes::new().scores(&scores));
		if !failures.is_empty() {
			span.set_status(SpanStatus::error(format!("{} of {} scorers failed", failures.len(), self.scorers.len())));
		}
		span.end();
		(scores, failures)
	}
}
