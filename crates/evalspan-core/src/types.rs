use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tabled::{Table, Tabled};

pub use evalspan_types::{Case, Experiment, Key, Metadata, Project, Score, SpanType};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreStats {
	pub count: usize,
	pub sum: f64,
	pub min: f64,
	pub max: f64,
}

impl ScoreStats {
	pub fn mean(&self) -> f64 {
		if self.count == 0 {
			0.0
		} else {
			self.sum / self.count as f64
		}
	}

	fn record(&mut self, value: f64) {
		if self.count == 0 {
			self.min = value;
			self.max = value;
		} else {
			self.min = self.min.min(value);
			self.max = self.max.max(value);
		}
		self.count += 1;
		self.sum += value;
	}
}

/// Per-run roll-up of case outcomes and score values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvalSummary {
	pub cases: usize,
	pub failed: usize,
	pub scores: BTreeMap<String, ScoreStats>,
}

impl EvalSummary {
	pub fn mean(&self, score: &str) -> Option<f64> {
		self.scores.get(score).map(ScoreStats::mean)
	}

	pub fn table(&self) -> String {
		let rows: Vec<ScoreRow> = self
			.scores
			.iter()
			.map(|(name, stats)| ScoreRow {
				score: name.clone(),
				count: stats.count,
				mean: format!("{:.3}", stats.mean()),
				min: format!("{:.3}", stats.min),
				max: format!("{:.3}", stats.max),
			})
			.collect();

		let summary_text = format!("Cases: {}  Failed: {}", self.cases, self.failed);
		if rows.is_empty() {
			return format!("{}\n", summary_text);
		}
		format!("{}\n\n{}\n", Table::new(rows), summary_text)
	}
}

#[derive(Debug, Clone, Tabled)]
struct ScoreRow {
	score: String,
	count: usize,
	mean: String,
	min: String,
	max: String,
}

/// Worker-shared accumulator behind [`EvalSummary`].
#[derive(Debug, Default)]
pub(crate) struct SummaryCollector {
	inner: Mutex<EvalSummary>,
}

impl SummaryCollector {
	pub(crate) fn record_case(&self, failed: bool, scores: &BTreeMap<String, f64>) {
		let mut summary = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
		summary.cases += 1;
		if failed {
			summary.failed += 1;
		}
		for (name, value) in scores {
			summary.scores.entry(name.clone()).or_default().record(*value);
		}
	}

	pub(crate) fn snapshot(&self) -> EvalSummary {
		self.inner
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
			.clone()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn collector_rolls_up_scores() {
		let collector = SummaryCollector::default();
		collector.record_case(false, &BTreeMap::from([("acc".to_string(), 1.0)]));
		collector.record_case(false, &BTreeMap::from([("acc".to_string(), 0.0)]));
		collector.record_case(true, &BTreeMap::new());

		let summary = collector.snapshot();
		assert_eq!(summary.cases, 3);
		assert_eq!(summary.failed, 1);
		assert_eq!(summary.mean("acc"), Some(0.5));
		assert_eq!(summary.scores["acc"].min, 0.0);
		assert_eq!(summary.scores["acc"].max, 1.0);
		assert!(summary.mean("missing").is_none());

		let table = summary.table();
		assert!(table.contains("acc"));
		assert!(table.contains("Cases: 3  Failed: 1"));
	}
}
