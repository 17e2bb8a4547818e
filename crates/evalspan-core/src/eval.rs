use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::context::{Context, Parent};
use crate::datasource::{CaseIterator, DatasetPager, PaginatedCases, VecCases};
use crate::error::{ErrorAggregator, ErrorKind, EvalError, EvalErrors};
use crate::experiment::permalink;
use crate::runner::CaseRunner;
use crate::scheduler::Scheduler;
use crate::scorer::Scorer;
use crate::task::{EvalData, Task};
use crate::tracer::{LogTracer, Tracer};
use crate::types::{Case, EvalSummary, Key, SummaryCollector};

/// Outcome of one run. Always produced, even when cases failed, so partial
/// results stay inspectable.
#[derive(Debug, Clone)]
pub struct EvalResult {
	pub key: Key,
	pub error: Option<EvalErrors>,
	pub elapsed: Duration,
	pub permalink: Option<String>,
	pub summary: EvalSummary,
}

impl EvalResult {
	pub fn is_ok(&self) -> bool {
		self.error.is_none()
	}

	pub fn has_error(&self, kind: ErrorKind) -> bool {
		self.error.as_ref().map(|e| e.is(kind)).unwrap_or(false)
	}

	/// Splits off the joined error, for callers that want `?`.
	pub fn into_result(mut self) -> Result<Self, EvalErrors> {
		match self.error.take() {
			Some(err) => Err(err),
			None => Ok(self),
		}
	}

	pub fn summary_table(&self) -> String {
		let mut out = format!("Experiment: {} ({})\n", self.key.name, self.key.experiment_id);
		if let Some(link) = &self.permalink {
			out.push_str(&format!("Link: {link}\n"));
		}
		out.push_str(&format!("Elapsed: {:.2}s\n\n", self.elapsed.as_secs_f64()));
		out.push_str(&self.summary.table());
		out
	}
}

pub struct EvalBuilder<I, R> {
	key: Key,
	sources: Vec<Box<dyn CaseIterator<I, R>>>,
	task: Option<Arc<dyn Task<I, R>>>,
	scorers: Vec<Arc<dyn Scorer<I, R>>>,
	tracer: Option<Arc<dyn Tracer>>,
	parallelism: usize,
	quiet: bool,
	app_url: String,
	org_name: String,
	iteration_error_limit: Option<usize>,
	cancel: CancellationToken,
}

impl<I, R> Default for EvalBuilder<I, R>
where
	I: EvalData,
	R: EvalData,
{
	fn default() -> Self {
		Self::new()
	}
}

impl<I, R> EvalBuilder<I, R>
where
	I: EvalData,
	R: EvalData,
{
	pub fn new() -> Self {
		Self {
			key: Key::default(),
			sources: Vec::new(),
			task: None,
			scorers: Vec::new(),
			tracer: None,
			parallelism: 1,
			quiet: false,
			app_url: String::new(),
			org_name: String::new(),
			iteration_error_limit: None,
			cancel: CancellationToken::new(),
		}
	}

	pub fn key(mut self, key: Key) -> Self {
		self.key = key;
		self
	}

	/// Adds a case source. Exactly one source may be configured.
	pub fn cases(mut self, cases: impl CaseIterator<I, R> + 'static) -> Self {
		self.sources.push(Box::new(cases));
		self
	}

	pub fn case_list(self, cases: Vec<Case<I, R>>) -> Self {
		self.cases(VecCases::new(cases))
	}

	pub fn task(mut self, task: Arc<dyn Task<I, R>>) -> Self {
		self.task = Some(task);
		self
	}

	pub fn scorers<S>(mut self, scorers: S) -> Self
	where
		S: IntoIterator<Item = Arc<dyn Scorer<I, R>>>,
	{
		self.scorers = scorers.into_iter().collect();
		self
	}

	pub fn add_scorer(mut self, scorer: Arc<dyn Scorer<I, R>>) -> Self {
		self.scorers.push(scorer);
		self
	}

	pub fn tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
		self.tracer = Some(tracer);
		self
	}

	pub fn parallelism(mut self, n: usize) -> Self {
		self.parallelism = n.max(1);
		self
	}

	pub fn quiet(mut self, quiet: bool) -> Self {
		self.quiet = quiet;
		self
	}

	/// Base URL and organization used to build the result permalink.
	pub fn links(mut self, app_url: impl Into<String>, org_name: impl Into<String>) -> Self {
		self.app_url = app_url.into();
		self.org_name = org_name.into();
		self
	}

	pub fn iteration_error_limit(mut self, limit: usize) -> Self {
		self.iteration_error_limit = Some(limit.max(1));
		self
	}

	/// Token observed by tasks, scorers and the case producer.
	pub fn cancellation(mut self, token: CancellationToken) -> Self {
		self.cancel = token;
		self
	}

	pub fn build(self) -> Result<Eval<I, R>, EvalError> {
		if self.key.experiment_id.is_empty() {
			return Err(EvalError::validation("experiment id must be set"));
		}
		let task = self
			.task
			.ok_or_else(|| EvalError::validation("task must be set"))?;
		if self.scorers.is_empty() {
			return Err(EvalError::validation("at least one scorer must be set"));
		}
		let mut sources = self.sources;
		if sources.len() != 1 {
			return Err(EvalError::validation(format!(
				"exactly one case source must be set, got {}",
				sources.len()
			)));
		}
		let cases = sources.remove(0);

		Ok(Eval {
			key: self.key,
			cases,
			task,
			scorers: self.scorers,
			tracer: self.tracer.unwrap_or_else(|| Arc::new(LogTracer)),
			parallelism: self.parallelism,
			quiet: self.quiet,
			app_url: self.app_url,
			org_name: self.org_name,
			iteration_error_limit: self.iteration_error_limit,
			cancel: self.cancel,
		})
	}
}

impl<I, R> EvalBuilder<I, R>
where
	I: EvalData + DeserializeOwned,
	R: EvalData + DeserializeOwned,
{
	/// Pulls cases from a paginated dataset, stopping after `max_records`.
	pub fn dataset(self, pager: Arc<dyn DatasetPager>, max_records: Option<usize>) -> Self {
		let paged = PaginatedCases::new(pager);
		match max_records {
			Some(limit) => self.cases(paged.max_records(limit)),
			None => self.cases(paged),
		}
	}
}

/// A configured run. Consumed by [`Eval::run`].
pub struct Eval<I, R> {
	key: Key,
	cases: Box<dyn CaseIterator<I, R>>,
	task: Arc<dyn Task<I, R>>,
	scorers: Vec<Arc<dyn Scorer<I, R>>>,
	tracer: Arc<dyn Tracer>,
	parallelism: usize,
	quiet: bool,
	app_url: String,
	org_name: String,
	iteration_error_limit: Option<usize>,
	cancel: CancellationToken,
}

impl<I, R> Eval<I, R>
where
	I: EvalData,
	R: EvalData,
{
	pub fn builder() -> EvalBuilder<I, R> {
		EvalBuilder::new()
	}

	pub fn key(&self) -> &Key {
		&self.key
	}

	/// Runs every case and waits for all workers before returning.
	pub async fn run(self) -> EvalResult {
		let started = Instant::now();
		info!(
			experiment = %self.key.name,
			experiment_id = %self.key.experiment_id,
			parallelism = self.parallelism,
			scorers = self.scorers.len(),
			"starting eval"
		);

		let cx = Context::new()
			.with_cancellation(self.cancel.clone())
			.with_parent(Parent::Experiment(self.key.experiment_id.clone()));
		let errors = Arc::new(ErrorAggregator::new());
		let summary = Arc::new(SummaryCollector::default());
		let runner = Arc::new(CaseRunner {
			task: self.task,
			scorers: self.scorers,
			tracer: self.tracer,
			errors: errors.clone(),
			summary: summary.clone(),
		});

		let scheduler = Scheduler {
			parallelism: self.parallelism,
			iteration_error_limit: self.iteration_error_limit,
		};
		scheduler.run(cx, self.cases, runner).await;

		let result = EvalResult {
			permalink: permalink(&self.app_url, &self.org_name, &self.key.experiment_id),
			key: self.key,
			error: errors.join(),
			elapsed: started.elapsed(),
			summary: summary.snapshot(),
		};

		let failed = result.error.as_ref().map(EvalErrors::len).unwrap_or(0);
		if self.quiet {
			debug!(cases = result.summary.cases, failed, elapsed = ?result.elapsed, "eval finished");
		} else {
			info!(
				cases = result.summary.cases,
				failed,
				elapsed = ?result.elapsed,
				permalink = result.permalink.as_deref().unwrap_or("-"),
				"eval finished"
			);
		}
		result
	}
}
