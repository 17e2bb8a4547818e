//! Project and experiment resolution. The engine only consumes a
//! [`Resolver`]; where projects and experiments actually live is up to the
//! implementation.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::types::{Experiment, Key, Metadata, Project};

const RESOLVE_ATTEMPTS: u32 = 3;
const RESOLVE_BACKOFF: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Default)]
pub struct ExperimentOptions {
    pub tags: Vec<String>,
    pub metadata: Metadata,
    /// Reuse an existing experiment with the exact name instead of creating
    /// a new one.
    pub update: bool,
}

#[async_trait]
pub trait Resolver: Send + Sync {
    /// Returns the project with `name`, creating it when missing.
    async fn register_project(&self, name: &str) -> Result<Project>;

    /// With `update`, returns the experiment named `name` if one exists.
    /// Otherwise creates a new experiment, possibly under a disambiguated name.
    async fn register_experiment(
        &self,
        name: &str,
        project_id: &str,
        opts: &ExperimentOptions,
    ) -> Result<Experiment>;
}

/// Identifies a project either by id or by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectRef {
    Id(String),
    Name(String),
}

/// Everything needed to resolve a [`Key`].
#[derive(Debug, Clone)]
pub struct ExperimentTarget {
    pub project: ProjectRef,
    pub experiment: String,
    pub options: ExperimentOptions,
}

async fn with_retry<T, F, Fut>(what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(err) if attempt < RESOLVE_ATTEMPTS => {
                warn!(attempt, error = %err, "{what} failed, retrying");
                tokio::time::sleep(RESOLVE_BACKOFF * attempt).await;
                attempt += 1;
            }
            Err(err) => return Err(err.context(format!("{what} failed after {attempt} attempts"))),
        }
    }
}

/// Resolves `project` to its id and name, registering it by name if needed.
pub async fn resolve_project(resolver: &dyn Resolver, project: &ProjectRef) -> Result<Project> {
    match project {
        ProjectRef::Id(id) if id.is_empty() => bail!("project id must not be empty"),
        ProjectRef::Id(id) => Ok(Project {
            id: id.clone(),
            name: String::new(),
        }),
        ProjectRef::Name(name) if name.is_empty() => bail!("project name must not be empty"),
        ProjectRef::Name(name) => with_retry("register project", || resolver.register_project(name)).await,
    }
}

pub async fn resolve_project_id(resolver: &dyn Resolver, project: &ProjectRef) -> Result<String> {
    Ok(resolve_project(resolver, project).await?.id)
}

/// Returns `(experiment_id, resolved_name)`.
pub async fn resolve_experiment(
    resolver: &dyn Resolver,
    name: &str,
    project_id: &str,
    tags: &[String],
    metadata: &Metadata,
    update: bool,
) -> Result<(String, String)> {
    if name.is_empty() {
        bail!("experiment name must not be empty");
    }
    let opts = ExperimentOptions {
        tags: tags.to_vec(),
        metadata: metadata.clone(),
        update,
    };
    let experiment = with_retry("register experiment", || {
        resolver.register_experiment(name, project_id, &opts)
    })
    .await?;
    debug!(experiment_id = %experiment.id, name = %experiment.name, update, "resolved experiment");
    Ok((experiment.id, experiment.name))
}

/// Resolves the full [`Key`] for a run.
pub async fn resolve_key(resolver: &dyn Resolver, target: &ExperimentTarget) -> Result<Key> {
    let project = resolve_project(resolver, &target.project).await?;
    let (experiment_id, name) = resolve_experiment(
        resolver,
        &target.experiment,
        &project.id,
        &target.options.tags,
        &target.options.metadata,
        target.options.update,
    )
    .await?;
    Ok(Key {
        experiment_id,
        name,
        project_id: project.id,
        project_name: project.name,
    })
}

/// First of `name`, `name-1`, `name-2`, … that `taken` rejects.
pub fn unique_name(name: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(name) {
        return name.to_string();
    }
    (1..)
        .map(|n| format!("{name}-{n}"))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| name.to_string())
}

/// Link to an experiment's results in the platform UI.
pub fn permalink(app_url: &str, org_name: &str, experiment_id: &str) -> Option<String> {
    if app_url.is_empty() || org_name.is_empty() || experiment_id.is_empty() {
        return None;
    }
    Some(format!(
        "{}/app/{}/object?object_type=experiment&object_id={}",
        app_url.trim_end_matches('/'),
        org_name,
        experiment_id
    ))
}

#[derive(Debug, Default)]
struct Registry {
    projects: HashMap<String, Project>,
    experiments: Vec<Experiment>,
}

/// In-process [`Resolver`] with the same naming rules as a remote registry.
#[derive(Debug, Default)]
pub struct MemoryResolver {
    registry: Mutex<Registry>,
}

impl MemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn experiments(&self) -> Vec<Experiment> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .experiments
            .clone()
    }
}

#[async_trait]
impl Resolver for MemoryResolver {
    async fn register_project(&self, name: &str) -> Result<Project> {
        let mut registry = self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let project = registry
            .projects
            .entry(name.to_string())
            .or_insert_with(|| Project {
                id: uuid::Uuid::new_v4().to_string(),
                name: name.to_string(),
            });
        Ok(project.clone())
    }

    async fn register_experiment(
        &self,
        name: &str,
        project_id: &str,
        opts: &ExperimentOptions,
    ) -> Result<Experiment> {
        let mut registry = self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let existing = |candidate: &str| {
            registry
                .experiments
                .iter()
                .find(|e| e.project_id == project_id && e.name == candidate)
                .cloned()
        };
        if opts.update {
            if let Some(found) = existing(name) {
                return Ok(found);
            }
        }
        let resolved = unique_name(name, |candidate| existing(candidate).is_some());
        let experiment = Experiment {
            id: uuid::Uuid::new_v4().to_string(),
            name: resolved,
            project_id: project_id.to_string(),
        };
        registry.experiments.push(experiment.clone());
        Ok(experiment)
    }
}
