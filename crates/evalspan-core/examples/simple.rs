use std::sync::Arc;

use evalspan_core::{
    resolve_key, task_fn, Case, Eval, ExactMatchScorer, ExperimentOptions, ExperimentTarget,
    JsonlCases, LevenshteinScorer, MemoryResolver, MemoryTracer, ProjectRef, Scorer,
};
use serde_json::{json, Value};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let resolver = MemoryResolver::new();
    let key = resolve_key(
        &resolver,
        &ExperimentTarget {
            project: ProjectRef::Name("quickstart".into()),
            experiment: "hello-world".into(),
            options: ExperimentOptions::default(),
        },
    )
    .await?;

    // Example 1: Inline cases
    let cases = vec![
        Case::with_id("0", json!("Hello"), json!("Hello World!")),
        Case::with_id("1", json!("Hi"), json!("Hi World!")).tag("short"),
    ];

    // Task: append " World!" to any string input
    let task = task_fn(|_cx, input: Value| async move {
        let s = input.as_str().unwrap_or_default().to_string();
        Ok(json!(format!("{s} World!")))
    });

    let scorers: Vec<Arc<dyn Scorer<Value, Value>>> = vec![
        Arc::new(ExactMatchScorer),
        Arc::new(LevenshteinScorer::new(0.9)),
    ];

    let tracer = MemoryTracer::new();
    let result = Eval::builder()
        .key(key.clone())
        .case_list(cases)
        .task(task.clone())
        .scorers(scorers)
        .tracer(Arc::new(tracer.clone()))
        .parallelism(8)
        .build()?
        .run()
        .await;
    println!("{}", result.summary_table());
    println!("{} spans recorded", tracer.len());

    // Example 2: Load from JSONL file if provided
    if let Some(path) = std::env::args().nth(1) {
        let result = Eval::builder()
            .key(key)
            .cases(JsonlCases::<Value, Value>::new(path))
            .task(task)
            .add_scorer(Arc::new(ExactMatchScorer))
            .build()?
            .run()
            .await;
        println!("{}", result.summary_table());
        if let Some(err) = result.error {
            eprintln!("{err}");
        }
    }

    Ok(())
}
