//! One producer feeding a fixed pool of workers through a bounded queue.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::Result;
use futures::future::join_all;
use futures::FutureExt;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, warn};

use crate::context::Context;
use crate::datasource::CaseIterator;
use crate::error::EvalError;
use crate::runner::CaseRunner;
use crate::task::EvalData;
use crate::types::Case;

/// Queue slots never exceed this, whatever the parallelism.
pub const MAX_QUEUE_CAPACITY: usize = 100;

pub fn queue_capacity(parallelism: usize) -> usize {
	(2 * parallelism.max(1)).min(MAX_QUEUE_CAPACITY)
}

pub(crate) struct Scheduler {
	pub(crate) parallelism: usize,
	/// Stop pulling after this many iteration errors in a row.
	pub(crate) iteration_error_limit: Option<usize>,
}

impl Scheduler {
	/// Drains `cases` through `runner` and returns once every worker is done.
	pub(crate) async fn run<I, R>(
		&self,
		cx: Context,
		mut cases: Box<dyn CaseIterator<I, R>>,
		runner: Arc<CaseRunner<I, R>>,
	) where
		I: EvalData,
		R: EvalData,
	{
		let parallelism = self.parallelism.max(1);
		let (tx, rx) = mpsc::channel::<Result<Case<I, R>>>(queue_capacity(parallelism));
		let rx = Arc::new(Mutex::new(rx));

		let mut workers = Vec::with_capacity(parallelism);
		for worker in 0..parallelism {
			let rx = rx.clone();
			let runner = runner.clone();
			let cx = cx.clone();
			workers.push(tokio::spawn(async move {
				let mut processed = 0usize;
				loop {
					let item = rx.lock().await.recv().await;
					let Some(item) = item else { break };
					if let Err(panic) = AssertUnwindSafe(runner.run_case(&cx, item)).catch_unwind().await {
						let message = panic_message(panic.as_ref());
						error!(worker, panic = %message, "case panicked");
						runner.summary.record_case(true, &BTreeMap::new());
						runner.errors.append(EvalError::task(anyhow::anyhow!("task panicked: {message}")));
					}
					processed += 1;
				}
				debug!(worker, processed, "worker finished");
			}));
		}
		// the queue closes once every worker is gone
		drop(rx);

		let error_limit = self.iteration_error_limit;
		let producer_cx = cx.clone();
		let producer = tokio::spawn(async move {
			let mut consecutive_errors = 0usize;
			let mut queued = 0usize;
			loop {
				if producer_cx.is_cancelled() {
					warn!(queued, "run cancelled, no further cases will be queued");
					break;
				}
				let Some(item) = cases.next().await else { break };
				if item.is_err() {
					consecutive_errors += 1;
				} else {
					consecutive_errors = 0;
				}
				if tx.send(item).await.is_err() {
					break;
				}
				queued += 1;
				if let Some(limit) = error_limit {
					if consecutive_errors >= limit {
						warn!(consecutive_errors, "case source keeps failing, no further cases will be queued");
						break;
					}
				}
			}
			debug!(queued, "producer finished");
			// dropping `tx` closes the queue
		});

		if let Err(err) = producer.await {
			error!(error = %err, "case producer panicked");
			runner.errors.append(EvalError::iteration(anyhow::anyhow!("case producer panicked: {err}")));
		}
		for joined in join_all(workers).await {
			if let Err(err) = joined {
				error!(error = %err, "worker panicked");
				runner.errors.append(EvalError::task(anyhow::anyhow!("worker panicked: {err}")));
			}
		}
	}
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
	if let Some(s) = panic.downcast_ref::<&str>() {
		s.to_string()
	} else if let Some(s) = panic.downcast_ref::<String>() {
		s.clone()
	} else {
		"unknown panic".to_string()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn queue_capacity_is_twice_parallelism_capped() {
		assert_eq!(queue_capacity(0), 2);
		assert_eq!(queue_capacity(1), 2);
		assert_eq!(queue_capacity(8), 16);
		assert_eq!(queue_capacity(50), 100);
		assert_eq!(queue_capacity(500), 100);
	}

	#[test]
	fn panic_payloads_become_messages() {
		assert_eq!(panic_message(&"boom"), "boom");
		assert_eq!(panic_message(&String::from("bad case")), "bad case");
		assert_eq!(panic_message(&42u8), "unknown panic");
	}
}
