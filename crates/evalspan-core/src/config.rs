use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::experiment::{ExperimentOptions, ExperimentTarget, ProjectRef};
use crate::scorer::Scorer;
use crate::scorers::{
    contains::ContainsScorer, exact::ExactMatchScorer, levenshtein::LevenshteinScorer,
    regex::RegexScorer,
};
use crate::types::Metadata;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalConfig {
    pub project: String,
    pub experiment: String,
    #[serde(default)]
    pub update: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: Metadata,
    pub data: DataConfig,
    #[serde(default)]
    pub task: TaskConfig,
    #[serde(default)]
    pub scorers: Vec<ScorerConfig>,
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    #[serde(default)]
    pub quiet: bool,
    #[serde(default)]
    pub links: LinkConfig,
}

fn default_parallelism() -> usize {
    1
}

impl EvalConfig {
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let mut config: EvalConfig = serde_yaml::from_str(raw).context("Invalid eval config")?;
        config.parallelism = config.parallelism.max(1);
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {:?}", path))?;
        Self::from_yaml_str(&raw)
    }

    pub fn target(&self) -> ExperimentTarget {
        ExperimentTarget {
            project: ProjectRef::Name(self.project.clone()),
            experiment: self.experiment.clone(),
            options: ExperimentOptions {
                tags: self.tags.clone(),
                metadata: self.metadata.clone(),
                update: self.update,
            },
        }
    }

    /// Configured scorers, or exact match when none are listed.
    pub fn build_scorers(&self) -> Result<Vec<Arc<dyn Scorer<Value, Value>>>> {
        if self.scorers.is_empty() {
            return Ok(vec![Arc::new(ExactMatchScorer)]);
        }
        self.scorers.iter().map(ScorerConfig::build).collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkConfig {
    #[serde(default)]
    pub app_url: String,
    #[serde(default)]
    pub org_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum DataConfig {
    Jsonl {
        path: PathBuf,
    },
    Dataset {
        name: String,
        #[serde(default)]
        limit: Option<usize>,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum TaskConfig {
    #[default]
    Echo,
    Http {
        url: String,
        #[serde(default = "default_http_method")]
        method: String,
    },
}

fn default_http_method() -> String {
    "POST".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum ScorerConfig {
    Exact,
    Levenshtein {
        threshold: f64,
    },
    Contains {
        substring: String,
        #[serde(default = "default_case_sensitive")]
        case_sensitive: bool,
    },
    Regex {
        pattern: String,
    },
}

fn default_case_sensitive() -> bool {
    true
}

impl ScorerConfig {
    pub fn build(&self) -> Result<Arc<dyn Scorer<Value, Value>>> {
        Ok(match self {
            ScorerConfig::Exact => Arc::new(ExactMatchScorer),
            ScorerConfig::Levenshtein { threshold } => Arc::new(LevenshteinScorer::new(*threshold)),
            ScorerConfig::Contains {
                substring,
                case_sensitive: true,
            } => Arc::new(ContainsScorer::new(substring.clone())),
            ScorerConfig::Contains { substring, .. } => {
                Arc::new(ContainsScorer::case_insensitive(substring.clone()))
            }
            ScorerConfig::Regex { pattern } => Arc::new(
                RegexScorer::new(pattern).with_context(|| format!("Invalid regex scorer pattern {pattern:?}"))?,
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
project: demo
experiment: nightly
update: true
tags: [ci]
data:
  type: dataset
  name: golden
  limit: 50
task:
  type: http
  url: http://localhost:8080/agent
scorers:
  - type: exact
  - type: levenshtein
    threshold: 0.8
  - type: contains
    substring: paris
    case_sensitive: false
parallelism: 0
links:
  app_url: https://app.example.com
  org_name: acme
"#;

    #[test]
    fn parses_full_config() {
        let config = EvalConfig::from_yaml_str(CONFIG).unwrap();
        assert_eq!(config.parallelism, 1);
        assert!(config.update);
        assert!(matches!(config.data, DataConfig::Dataset { ref name, limit: Some(50) } if name == "golden"));
        assert!(matches!(config.task, TaskConfig::Http { ref method, .. } if method == "POST"));
        assert_eq!(config.build_scorers().unwrap().len(), 3);

        let target = config.target();
        assert_eq!(target.project, ProjectRef::Name("demo".into()));
        assert_eq!(target.options.tags, vec!["ci".to_string()]);
        assert!(target.options.update);
    }

    #[test]
    fn defaults_to_echo_task_and_exact_scorer() {
        let config = EvalConfig::from_yaml_str(
            "project: p\nexperiment: e\ndata:\n  type: jsonl\n  path: cases.jsonl\n",
        )
        .unwrap();
        assert!(matches!(config.task, TaskConfig::Echo));
        let scorers = config.build_scorers().unwrap();
        assert_eq!(scorers.len(), 1);
        assert_eq!(scorers[0].name(), "exact_match");
        assert!(!config.quiet);
    }

    #[test]
    fn invalid_regex_is_reported() {
        let scorer = ScorerConfig::Regex {
            pattern: "(".into(),
        };
        assert!(scorer.build().is_err());
    }
}
