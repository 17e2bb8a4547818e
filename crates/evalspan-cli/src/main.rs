mod telemetry;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{ArgAction, Parser, Subcommand};
use evalspan_core::config::{DataConfig, LinkConfig, ScorerConfig, TaskConfig};
use evalspan_core::{
	resolve_key, task_fn, AttrKey, Eval, EvalConfig, EvalResult, JsonlCases, Metadata, Task,
};
use evalspan_store::{SqliteStore, StoredSpan};
use serde_json::{json, Value};
use tabled::{Table, Tabled};
use tracing::{info, Level};

#[derive(Debug, Parser)]
#[command(name = "evalspan", about = "Run evaluations and inspect their recorded spans")]
struct Cli {
	/// Emit logs as newline-delimited JSON
	#[arg(long, global = true, action = ArgAction::SetTrue)]
	log_json: bool,

	/// Log at debug level unless RUST_LOG says otherwise
	#[arg(short, long, global = true, action = ArgAction::SetTrue)]
	verbose: bool,

	#[command(subcommand)]
	command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
	/// Run an evaluation and record its spans in the store
	Run(RunArgs),
	/// Manage stored datasets
	#[command(subcommand)]
	Dataset(DatasetCommands),
	/// List the spans recorded for an experiment
	Spans(SpansArgs),
}

#[derive(Debug, Subcommand)]
enum DatasetCommands {
	/// Import a JSONL file as a dataset (appends when it already exists)
	Import(ImportArgs),
}

#[derive(Debug, Clone, Parser)]
struct RunArgs {
	/// YAML eval config; the flags below are ignored when set
	#[arg(long)]
	config: Option<PathBuf>,

	/// SQLite store holding projects, experiments, datasets and spans
	#[arg(long, default_value = "evalspan.db")]
	db: PathBuf,

	#[arg(long, default_value = "default")]
	project: String,

	#[arg(long, default_value = "experiment")]
	experiment: String,

	/// Reuse an experiment with the exact name instead of creating a new one
	#[arg(long, action = ArgAction::SetTrue)]
	update: bool,

	/// Tag recorded on the experiment (repeatable)
	#[arg(long = "tag")]
	tags: Vec<String>,

	/// JSONL file containing lines with fields: { "id"?: string, "input": any, "expected": any }
	#[arg(long, conflicts_with = "dataset")]
	data: Option<PathBuf>,

	/// Stored dataset to read cases from
	#[arg(long)]
	dataset: Option<String>,

	/// Maximum records pulled from --dataset
	#[arg(long, requires = "dataset")]
	limit: Option<usize>,

	/// Cases in flight
	#[arg(long)]
	parallelism: Option<usize>,

	/// Log the run at debug instead of info
	#[arg(long, action = ArgAction::SetTrue)]
	quiet: bool,

	/// Use exact-match scorer
	#[arg(long, action = ArgAction::SetTrue)]
	exact: bool,

	/// Use Levenshtein scorer with given min similarity (0.0..=1.0)
	#[arg(long)]
	levenshtein: Option<f64>,

	/// Check if output contains substring (case-sensitive)
	#[arg(long)]
	contains: Option<String>,

	/// Check if output contains substring (case-insensitive)
	#[arg(long)]
	contains_i: Option<String>,

	/// Validate output matches regex pattern
	#[arg(long)]
	regex: Option<String>,

	/// HTTP task endpoint (POST by default). Sends { "input": <value> } and expects JSON response.
	#[arg(long)]
	http_url: Option<String>,

	/// HTTP method for --http-url (GET or POST)
	#[arg(long, default_value = "POST")]
	http_method: String,

	/// Base URL of the results UI, used to print a permalink
	#[arg(long)]
	app_url: Option<String>,

	#[arg(long)]
	org: Option<String>,

	/// Output JSON result to a file
	#[arg(long)]
	json_out: Option<PathBuf>,
}

#[derive(Debug, Clone, Parser)]
struct ImportArgs {
	#[arg(long, default_value = "evalspan.db")]
	db: PathBuf,

	#[arg(long)]
	name: String,

	/// JSONL file, one row per line
	#[arg(long)]
	file: PathBuf,
}

#[derive(Debug, Clone, Parser)]
struct SpansArgs {
	#[arg(long, default_value = "evalspan.db")]
	db: PathBuf,

	/// Experiment id
	#[arg(long)]
	experiment: String,

	/// Print raw span rows as JSON instead of a table
	#[arg(long, action = ArgAction::SetTrue)]
	json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();
	let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
	telemetry::init_tracing(cli.log_json, level);

	match cli.command {
		Commands::Run(args) => run(args).await?,
		Commands::Dataset(DatasetCommands::Import(args)) => import(args).await?,
		Commands::Spans(args) => spans(args)?,
	}
	Ok(())
}

impl RunArgs {
	fn into_config(self) -> Result<EvalConfig> {
		let data = match (self.data, self.dataset) {
			(Some(path), _) => DataConfig::Jsonl { path },
			(None, Some(name)) => DataConfig::Dataset {
				name,
				limit: self.limit,
			},
			(None, None) => anyhow::bail!("one of --config, --data or --dataset is required"),
		};

		let task = match self.http_url {
			Some(url) => TaskConfig::Http {
				url,
				method: self.http_method,
			},
			None => TaskConfig::Echo,
		};

		let mut scorers = Vec::new();
		if self.exact {
			scorers.push(ScorerConfig::Exact);
		}
		if let Some(threshold) = self.levenshtein {
			scorers.push(ScorerConfig::Levenshtein { threshold });
		}
		if let Some(substring) = self.contains {
			scorers.push(ScorerConfig::Contains {
				substring,
				case_sensitive: true,
			});
		}
		if let Some(substring) = self.contains_i {
			scorers.push(ScorerConfig::Contains {
				substring,
				case_sensitive: false,
			});
		}
		if let Some(pattern) = self.regex {
			scorers.push(ScorerConfig::Regex { pattern });
		}

		Ok(EvalConfig {
			project: self.project,
			experiment: self.experiment,
			update: self.update,
			tags: self.tags,
			metadata: Metadata::new(),
			data,
			task,
			scorers,
			parallelism: self.parallelism.unwrap_or(1).max(1),
			quiet: self.quiet,
			links: LinkConfig {
				app_url: self.app_url.unwrap_or_default(),
				org_name: self.org.unwrap_or_default(),
			},
		})
	}
}

fn build_task(config: &TaskConfig) -> Arc<dyn Task<Value, Value>> {
	match config {
		TaskConfig::Http { url, method } => {
			let url = url.clone();
			let method = method.to_uppercase();
			let client = reqwest::Client::new();
			task_fn(move |_cx, input: Value| {
				let url = url.clone();
				let method = method.clone();
				let client = client.clone();
				async move {
					let resp = match method.as_str() {
						"GET" => {
							// Encode input as query ?input=<json>
							let q = [("input", input.to_string())];
							client.get(&url).query(&q).send().await?
						}
						_ => client.post(&url).json(&json!({ "input": input })).send().await?,
					};
					let status = resp.status();
					let v = resp.json::<Value>().await?;
					if !status.is_success() {
						anyhow::bail!("HTTP {}: {}", status.as_u16(), v);
					}
					Ok(v)
				}
			})
		}
		// Default "echo" task: append " World!" to string inputs
		TaskConfig::Echo => task_fn(|_cx, input: Value| async move {
			let s = input.as_str().unwrap_or_default().to_string();
			Ok(json!(format!("{s} World!")))
		}),
	}
}

async fn run(args: RunArgs) -> Result<()> {
	let db = args.db.clone();
	let json_out = args.json_out.clone();
	let config = match args.config.clone() {
		Some(path) => EvalConfig::from_yaml_file(path)?,
		None => args.into_config()?,
	};

	let store = SqliteStore::open(&db).with_context(|| format!("Failed to open store {:?}", db))?;
	let key = resolve_key(&store, &config.target()).await?;
	info!(experiment = %key.name, id = %key.experiment_id, project = %key.project_name, "resolved experiment");

	let builder = Eval::<Value, Value>::builder()
		.key(key)
		.task(build_task(&config.task))
		.scorers(config.build_scorers()?)
		.tracer(Arc::new(store.tracer()))
		.parallelism(config.parallelism)
		.quiet(config.quiet)
		.links(config.links.app_url.clone(), config.links.org_name.clone());
	let builder = match &config.data {
		DataConfig::Jsonl { path } => builder.cases(JsonlCases::<Value, Value>::new(path.clone())),
		DataConfig::Dataset { name, limit } => builder.dataset(store.pager(name)?, *limit),
	};

	let result = builder.build()?.run().await;
	println!("{}", result.summary_table());
	if let Some(link) = &result.permalink {
		println!("View results: {link}");
	}

	if let Some(path) = json_out {
		let json = serde_json::to_string_pretty(&result_json(&result))?;
		tokio::fs::write(path, json).await?;
	}

	if let Some(err) = result.error {
		eprintln!("{err}");
		anyhow::bail!("{} case error(s) in experiment `{}`", err.len(), result.key.name);
	}
	Ok(())
}

fn result_json(result: &EvalResult) -> Value {
	let errors: Vec<String> = result
		.error
		.iter()
		.flat_map(|errs| errs.iter().map(|e| e.to_string()))
		.collect();
	json!({
		"key": result.key,
		"elapsed_ms": result.elapsed.as_millis() as u64,
		"permalink": result.permalink,
		"summary": result.summary,
		"errors": errors,
	})
}

fn parse_rows(raw: &str, path: &Path) -> Result<Vec<Value>> {
	raw.lines()
		.enumerate()
		.filter(|(_, line)| !line.trim().is_empty())
		.map(|(idx, line)| {
			serde_json::from_str(line)
				.with_context(|| format!("Invalid JSON on line {} of {:?}", idx + 1, path))
		})
		.collect()
}

async fn import(args: ImportArgs) -> Result<()> {
	let raw = tokio::fs::read_to_string(&args.file)
		.await
		.with_context(|| format!("Failed to read {:?}", args.file))?;
	let rows = parse_rows(&raw, &args.file)?;

	let store = SqliteStore::open(&args.db)?;
	let dataset_id = store.create_dataset(&args.name)?;
	let inserted = store.insert_rows(&dataset_id, &rows)?;
	info!(dataset = %args.name, rows = inserted, total = store.row_count(&dataset_id)?, "imported dataset rows");
	println!("Imported {inserted} rows into dataset `{}`", args.name);
	Ok(())
}

#[derive(Debug, Clone, Tabled)]
struct SpanRow {
	span: String,
	id: String,
	parent: String,
	status: String,
	duration_ms: i64,
	scores: String,
}

fn short_id(id: &str) -> String {
	id.get(..8).unwrap_or(id).to_string()
}

fn span_table(spans: &[StoredSpan]) -> String {
	let rows: Vec<SpanRow> = spans
		.iter()
		.map(|s| SpanRow {
			span: s.name.clone(),
			id: short_id(&s.span_id),
			parent: s.parent_span_id.as_deref().map(short_id).unwrap_or_else(|| "-".to_string()),
			status: match &s.error {
				Some(error) => format!("{}: {}", s.status, error),
				None => s.status.clone(),
			},
			duration_ms: (s.ended_at - s.started_at).num_milliseconds(),
			scores: s.attr(AttrKey::Scores).unwrap_or("").to_string(),
		})
		.collect();
	Table::new(rows).to_string()
}

fn spans(args: SpansArgs) -> Result<()> {
	let store = SqliteStore::open(&args.db)?;
	let spans = store.spans_for_experiment(&args.experiment)?;
	if args.json {
		println!("{}", serde_json::to_string_pretty(&spans)?);
		return Ok(());
	}
	if spans.is_empty() {
		println!("No spans recorded for experiment {}", args.experiment);
		return Ok(());
	}
	println!("{}", span_table(&spans));
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	fn run_args(extra: &[&str]) -> RunArgs {
		let mut argv = vec!["evalspan", "run"];
		argv.extend_from_slice(extra);
		match Cli::parse_from(argv).command {
			Commands::Run(args) => args,
			other => panic!("unexpected command {other:?}"),
		}
	}

	#[test]
	fn flags_become_config() {
		let config = run_args(&[
			"--dataset",
			"golden",
			"--limit",
			"10",
			"--exact",
			"--contains-i",
			"paris",
			"--tag",
			"ci",
			"--parallelism",
			"0",
		])
		.into_config()
		.unwrap();
		assert!(matches!(config.data, DataConfig::Dataset { ref name, limit: Some(10) } if name == "golden"));
		assert!(matches!(config.task, TaskConfig::Echo));
		assert_eq!(config.scorers.len(), 2);
		assert_eq!(config.parallelism, 1);
		assert_eq!(config.tags, vec!["ci".to_string()]);
		assert_eq!(config.target().experiment, "experiment");
	}

	#[test]
	fn flag_parallelism_defaults_like_yaml_config() {
		let flags = run_args(&["--data", "cases.jsonl"]).into_config().unwrap();
		let yaml = EvalConfig::from_yaml_str("project: p\nexperiment: e\ndata:\n  type: jsonl\n  path: cases.jsonl\n").unwrap();
		assert_eq!(flags.parallelism, 1);
		assert_eq!(flags.parallelism, yaml.parallelism);
	}

	#[test]
	fn run_requires_a_source() {
		assert!(run_args(&[]).into_config().is_err());
	}

	#[test]
	fn import_rows_skip_blank_lines_and_report_bad_ones() {
		let path = Path::new("cases.jsonl");
		let rows = parse_rows("{\"input\":1,\"expected\":1}\n\n{\"input\":2,\"expected\":2}\n", path).unwrap();
		assert_eq!(rows.len(), 2);

		let err = parse_rows("{\"input\":1}\nnot json\n", path).unwrap_err();
		assert!(err.to_string().contains("line 2"));
	}

	#[tokio::test]
	async fn run_records_spans_in_store() {
		let dir = tempfile::tempdir().unwrap();
		let db = dir.path().join("evalspan.db");
		let data = dir.path().join("cases.jsonl");
		std::fs::write(&data, "{\"input\":\"Hi\",\"expected\":\"Hi World!\"}\n").unwrap();

		let mut args = run_args(&["--exact", "--quiet"]);
		args.db = db.clone();
		args.data = Some(data);
		run(args).await.unwrap();

		let store = SqliteStore::open(&db).unwrap();
		let project = evalspan_core::Resolver::register_project(&store, "default").await.unwrap();
		let experiments = store.experiments(&project.id).unwrap();
		assert_eq!(experiments.len(), 1);
		let spans = store.spans_for_experiment(&experiments[0].id).unwrap();
		assert_eq!(spans.len(), 3);
		assert!(span_table(&spans).contains("exact_match"));
	}
}
