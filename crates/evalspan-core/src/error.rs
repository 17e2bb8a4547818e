use std::error::Error as StdError;
use std::fmt;
use std::sync::{Arc, Mutex};

use thiserror::Error;

type Cause = Arc<dyn StdError + Send + Sync + 'static>;

/// The closed set of failure kinds an evaluation run can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
	/// Missing task, scorers or experiment identity, or a bad case-source setup.
	Validation,
	/// A non-terminal failure pulling the next case.
	Iteration,
	/// The task failed for a case; scoring was skipped.
	Task,
	/// One scorer failed for a case; the other scorers still ran.
	Scorer,
}

impl ErrorKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			ErrorKind::Validation => "validation error",
			ErrorKind::Iteration => "iteration error",
			ErrorKind::Task => "task error",
			ErrorKind::Scorer => "scorer error",
		}
	}
}

impl fmt::Display for ErrorKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A kind-tagged error. Compare with [`EvalError::kind`], never by message.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {source}")]
pub struct EvalError {
	kind: ErrorKind,
	#[source]
	source: Cause,
}

impl EvalError {
	pub fn new(kind: ErrorKind, cause: anyhow::Error) -> Self {
		let boxed: Box<dyn StdError + Send + Sync + 'static> = cause.into();
		Self {
			kind,
			source: Arc::from(boxed),
		}
	}

	pub fn validation(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::Validation, anyhow::anyhow!(message.into()))
	}

	pub fn iteration(cause: anyhow::Error) -> Self {
		Self::new(ErrorKind::Iteration, cause)
	}

	pub fn task(cause: anyhow::Error) -> Self {
		Self::new(ErrorKind::Task, cause)
	}

	pub fn scorer(cause: anyhow::Error) -> Self {
		Self::new(ErrorKind::Scorer, cause)
	}

	pub fn kind(&self) -> ErrorKind {
		self.kind
	}

	pub fn is(&self, kind: ErrorKind) -> bool {
		self.kind == kind
	}

	/// The wrapped failure, without the kind prefix.
	pub fn cause(&self) -> &(dyn StdError + Send + Sync + 'static) {
		self.source.as_ref()
	}
}

/// Every per-case failure of a run, joined. Ordering follows completion
/// order and is not deterministic when more than one worker ran.
#[derive(Debug, Clone)]
pub struct EvalErrors {
	errors: Vec<EvalError>,
}

impl EvalErrors {
	/// Joins `errors` into one; `None` when there is nothing to join.
	pub fn join(errors: Vec<EvalError>) -> Option<Self> {
		if errors.is_empty() {
			None
		} else {
			Some(Self { errors })
		}
	}

	pub fn is(&self, kind: ErrorKind) -> bool {
		self.errors.iter().any(|e| e.is(kind))
	}

	pub fn count(&self, kind: ErrorKind) -> usize {
		self.errors.iter().filter(|e| e.is(kind)).count()
	}

	pub fn len(&self) -> usize {
		self.errors.len()
	}

	pub fn is_empty(&self) -> bool {
		self.errors.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = &EvalError> {
		self.errors.iter()
	}
}

impl fmt::Display for EvalErrors {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		for (idx, err) in self.errors.iter().enumerate() {
			if idx > 0 {
				f.write_str("\n")?;
			}
			write!(f, "{err}")?;
		}
		Ok(())
	}
}

impl StdError for EvalErrors {}

impl IntoIterator for EvalErrors {
	type Item = EvalError;
	type IntoIter = std::vec::IntoIter<EvalError>;

	fn into_iter(self) -> Self::IntoIter {
		self.errors.into_iter()
	}
}

/// Collects per-case errors from every worker.
#[derive(Debug, Default)]
pub struct ErrorAggregator {
	errors: Mutex<Vec<EvalError>>,
}

impl ErrorAggregator {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn append(&self, err: EvalError) {
		self.errors
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
			.push(err);
	}

	/// Snapshot of everything appended so far.
	pub fn get(&self) -> Vec<EvalError> {
		self.errors
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
			.clone()
	}

	pub fn join(&self) -> Option<EvalErrors> {
		EvalErrors::join(self.get())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;

	#[test]
	fn kind_is_preserved_through_wrapping() {
		let err = EvalError::task(anyhow::anyhow!("boom"));
		assert!(err.is(ErrorKind::Task));
		assert!(!err.is(ErrorKind::Scorer));
		assert_eq!(err.to_string(), "task error: boom");
		assert_eq!(err.cause().to_string(), "boom");
		assert!(StdError::source(&err).is_some());
	}

	#[test]
	fn empty_join_is_none() {
		assert!(EvalErrors::join(Vec::new()).is_none());
		assert!(ErrorAggregator::new().join().is_none());
	}

	#[test]
	fn joined_errors_support_kind_membership() {
		let joined = EvalErrors::join(vec![
			EvalError::task(anyhow::anyhow!("a")),
			EvalError::scorer(anyhow::anyhow!("b")),
			EvalError::scorer(anyhow::anyhow!("c")),
		])
		.unwrap();
		assert!(joined.is(ErrorKind::Task));
		assert!(joined.is(ErrorKind::Scorer));
		assert!(!joined.is(ErrorKind::Iteration));
		assert_eq!(joined.count(ErrorKind::Scorer), 2);
		assert_eq!(joined.to_string(), "task error: a\nscorer error: b\nscorer error: c");
	}

	#[test]
	fn aggregator_collects_from_many_threads() {
		let agg = Arc::new(ErrorAggregator::new());
		let handles: Vec<_> = (0..8)
			.map(|i| {
				let agg = agg.clone();
				std::thread::spawn(move || agg.append(EvalError::task(anyhow::anyhow!("case {i}"))))
			})
			.collect();
		for h in handles {
			h.join().unwrap();
		}
		let joined = agg.join().unwrap();
		assert_eq!(joined.len(), 8);
		assert_eq!(joined.count(ErrorKind::Task), 8);
	}
}
