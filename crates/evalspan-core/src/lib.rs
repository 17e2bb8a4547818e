//! evalspan-core: concurrent evaluation engine.
//! Pull cases from a source, run a task and scorers on a bounded worker
//! pool, and record every case as `eval`/`task`/`score` spans through an
//! injected tracer. See `examples/simple.rs` for a quickstart.

pub mod config;
pub mod context;
pub mod datasource;
pub mod error;
pub mod eval;
pub mod experiment;
mod runner;
pub mod scheduler;
pub mod scorer;
pub mod task;
pub mod testing;
pub mod tracer;
pub mod types;

pub mod scorers {
    pub mod contains;
    pub mod exact;
    pub mod levenshtein;
    pub mod regex;
}

pub use config::EvalConfig;
pub use context::{Context, Parent, SpanContext};
pub use datasource::{CaseIterator, DatasetPager, JsonlCases, Page, PaginatedCases, VecCases, VecPager};
pub use error::{ErrorAggregator, ErrorKind, EvalError, EvalErrors};
pub use eval::{Eval, EvalBuilder, EvalResult};
pub use experiment::{
    permalink, resolve_experiment, resolve_key, resolve_project_id, ExperimentOptions,
    ExperimentTarget, MemoryResolver, ProjectRef, Resolver,
};
pub use scorer::{scorer_fn, ScoreArgs, Scorer};
pub use scorers::{
    contains::ContainsScorer, exact::ExactMatchScorer, levenshtein::LevenshteinScorer,
    regex::RegexScorer,
};
pub use task::{task_fn, EvalData, Task};
pub use testing::{assert_mean_score, assert_no_errors};
pub use tracer::{
    AttrKey, FinishedSpan, LogTracer, MemoryTracer, NoopTracer, Span, SpanAttributes, SpanEvent,
    SpanStatus, Tracer,
};
pub use types::{Case, EvalSummary, Experiment, Key, Metadata, Project, Score, ScoreStats, SpanType};
