//! SQLite persistence for evalspan: project/experiment registry, stored
//! datasets served page by page, and a tracer that writes finished spans.

mod tracer;

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use evalspan_core::experiment::unique_name;
use evalspan_core::{DatasetPager, ExperimentOptions, Page, Resolver};
use evalspan_types::{Experiment, Project};

pub use tracer::{SqliteTracer, StoredSpan};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("invalid stored json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("store connection lock poisoned")]
    Poisoned,
    #[error("unknown dataset `{0}`")]
    UnknownDataset(String),
    #[error("invalid cursor `{0}`")]
    InvalidCursor(String),
}

#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

pub(crate) fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, StoreError> {
    conn.lock().map_err(|_| StoreError::Poisoned)
}

impl SqliteStore {
    /// Open a new store at the given path (e.g., "evalspan.db")
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = lock(&self.conn)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS projects (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS experiments (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                name TEXT NOT NULL,
                tags TEXT NOT NULL,
                metadata TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(project_id, name),
                FOREIGN KEY(project_id) REFERENCES projects(id)
            );
            CREATE TABLE IF NOT EXISTS datasets (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS dataset_rows (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                dataset_id TEXT NOT NULL,
                body TEXT NOT NULL,
                FOREIGN KEY(dataset_id) REFERENCES datasets(id)
            );
            CREATE TABLE IF NOT EXISTS spans (
                id INTEGER PRIMARY KEY,
                experiment_id TEXT,
                trace_id TEXT NOT NULL,
                span_id TEXT NOT NULL,
                parent_span_id TEXT,
                name TEXT NOT NULL,
                status TEXT NOT NULL,
                error TEXT,
                attributes TEXT NOT NULL,
                events TEXT NOT NULL,
                started_at TEXT NOT NULL,
                ended_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS spans_by_experiment ON spans(experiment_id);",
        )?;
        Ok(())
    }

    /// Id of the dataset called `name`, creating an empty one when missing.
    pub fn create_dataset(&self, name: &str) -> Result<String, StoreError> {
        if let Some(id) = self.dataset_id(name)? {
            return Ok(id);
        }
        let conn = lock(&self.conn)?;
        let id = uuid::Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO datasets (id, name, created_at) VALUES (?1, ?2, ?3)",
            params![id, name, Utc::now()],
        )?;
        debug!(dataset = %name, id = %id, "created dataset");
        Ok(id)
    }

    pub fn dataset_id(&self, name: &str) -> Result<Option<String>, StoreError> {
        let conn = lock(&self.conn)?;
        let id = conn
            .query_row("SELECT id FROM datasets WHERE name = ?1", params![name], |row| row.get(0))
            .optional()?;
        Ok(id)
    }

    /// Appends `rows` to the dataset in one transaction.
    pub fn insert_rows(&self, dataset_id: &str, rows: &[Value]) -> Result<usize, StoreError> {
        let mut conn = lock(&self.conn)?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare("INSERT INTO dataset_rows (dataset_id, body) VALUES (?1, ?2)")?;
            for row in rows {
                stmt.execute(params![dataset_id, serde_json::to_string(row)?])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    pub fn row_count(&self, dataset_id: &str) -> Result<usize, StoreError> {
        let conn = lock(&self.conn)?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM dataset_rows WHERE dataset_id = ?1",
            params![dataset_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// A [`DatasetPager`] over the dataset called `name`.
    pub fn pager(&self, name: &str) -> Result<Arc<dyn DatasetPager>, StoreError> {
        let dataset_id = self
            .dataset_id(name)?
            .ok_or_else(|| StoreError::UnknownDataset(name.to_string()))?;
        Ok(Arc::new(DatasetRows {
            conn: self.conn.clone(),
            dataset_id,
        }))
    }

    /// A tracer writing into this store's `spans` table.
    pub fn tracer(&self) -> SqliteTracer {
        SqliteTracer::new(self.conn.clone())
    }

    /// Every span recorded for the experiment, in the order they ended.
    pub fn spans_for_experiment(&self, experiment_id: &str) -> Result<Vec<StoredSpan>, StoreError> {
        tracer::spans_for_experiment(&self.conn, experiment_id)
    }

    pub fn experiments(&self, project_id: &str) -> Result<Vec<Experiment>, StoreError> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT id, name, project_id FROM experiments WHERE project_id = ?1 ORDER BY created_at, name",
        )?;
        let rows = stmt.query_map(params![project_id], |row| {
            Ok(Experiment {
                id: row.get(0)?,
                name: row.get(1)?,
                project_id: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn find_experiment(
        conn: &Connection,
        project_id: &str,
        name: &str,
    ) -> Result<Option<Experiment>, StoreError> {
        let found = conn
            .query_row(
                "SELECT id, name, project_id FROM experiments WHERE project_id = ?1 AND name = ?2",
                params![project_id, name],
                |row| {
                    Ok(Experiment {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        project_id: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(found)
    }
}

#[async_trait]
impl Resolver for SqliteStore {
    async fn register_project(&self, name: &str) -> Result<Project> {
        let conn = lock(&self.conn)?;
        conn.execute(
            "INSERT OR IGNORE INTO projects (id, name, created_at) VALUES (?1, ?2, ?3)",
            params![uuid::Uuid::new_v4().to_string(), name, Utc::now()],
        )?;
        let project = conn.query_row(
            "SELECT id, name FROM projects WHERE name = ?1",
            params![name],
            |row| {
                Ok(Project {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            },
        )?;
        Ok(project)
    }

    async fn register_experiment(
        &self,
        name: &str,
        project_id: &str,
        opts: &ExperimentOptions,
    ) -> Result<Experiment> {
        let mut conn = lock(&self.conn)?;
        let tx = conn.transaction()?;
        if opts.update {
            if let Some(found) = Self::find_experiment(&tx, project_id, name)? {
                debug!(experiment = %found.name, id = %found.id, "reusing experiment");
                return Ok(found);
            }
        }
        let taken: HashSet<String> = {
            let mut stmt = tx.prepare("SELECT name FROM experiments WHERE project_id = ?1")?;
            let names = stmt.query_map(params![project_id], |row| row.get::<_, String>(0))?;
            names.collect::<Result<_, _>>()?
        };
        let experiment = Experiment {
            id: uuid::Uuid::new_v4().to_string(),
            name: unique_name(name, |candidate| taken.contains(candidate)),
            project_id: project_id.to_string(),
        };
        tx.execute(
            "INSERT INTO experiments (id, project_id, name, tags, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                experiment.id,
                experiment.project_id,
                experiment.name,
                serde_json::to_string(&opts.tags)?,
                serde_json::to_string(&opts.metadata)?,
                Utc::now()
            ],
        )?;
        tx.commit()?;
        debug!(experiment = %experiment.name, id = %experiment.id, "created experiment");
        Ok(experiment)
    }
}

/// Rows of one stored dataset. The cursor is the last row id served.
struct DatasetRows {
    conn: Arc<Mutex<Connection>>,
    dataset_id: String,
}

#[async_trait]
impl DatasetPager for DatasetRows {
    async fn fetch(&self, cursor: Option<&str>, limit: usize) -> Result<Page> {
        let after: i64 = match cursor {
            Some(raw) => raw
                .parse()
                .map_err(|_| StoreError::InvalidCursor(raw.to_string()))?,
            None => 0,
        };
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT id, body FROM dataset_rows WHERE dataset_id = ?1 AND id > ?2 ORDER BY id LIMIT ?3",
        )?;
        let raw = stmt
            .query_map(params![self.dataset_id, after, limit as i64], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let last_id = raw.last().map(|(id, _)| *id);
        let rows = raw
            .into_iter()
            .map(|(_, body)| serde_json::from_str(&body))
            .collect::<Result<Vec<Value>, _>>()?;
        let cursor = match last_id {
            Some(id) if rows.len() == limit => Some(id.to_string()),
            _ => None,
        };
        Ok(Page { rows, cursor })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evalspan_core::PaginatedCases;
    use evalspan_core::{resolve_key, CaseIterator, ExperimentTarget, ProjectRef};
    use serde_json::json;

    #[tokio::test]
    async fn registry_reuses_on_update_and_disambiguates_otherwise() {
        let store = SqliteStore::open_in_memory().unwrap();
        let project = store.register_project("demo").await.unwrap();
        assert_eq!(store.register_project("demo").await.unwrap(), project);

        let create = ExperimentOptions::default();
        let first = store.register_experiment("nightly", &project.id, &create).await.unwrap();
        let second = store.register_experiment("nightly", &project.id, &create).await.unwrap();
        let third = store.register_experiment("nightly", &project.id, &create).await.unwrap();
        assert_eq!(first.name, "nightly");
        assert_eq!(second.name, "nightly-1");
        assert_eq!(third.name, "nightly-2");

        let update = ExperimentOptions {
            update: true,
            ..ExperimentOptions::default()
        };
        let reused = store.register_experiment("nightly", &project.id, &update).await.unwrap();
        assert_eq!(reused, first);
        assert_eq!(store.experiments(&project.id).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn resolve_key_against_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("evalspan.db")).unwrap();
        let target = ExperimentTarget {
            project: ProjectRef::Name("demo".into()),
            experiment: "baseline".into(),
            options: ExperimentOptions::default(),
        };
        let key = resolve_key(&store, &target).await.unwrap();
        assert_eq!(key.name, "baseline");
        assert_eq!(key.project_name, "demo");
        assert!(!key.experiment_id.is_empty());

        let reopened = SqliteStore::open(dir.path().join("evalspan.db")).unwrap();
        let again = resolve_key(&reopened, &target).await.unwrap();
        assert_eq!(again.name, "baseline-1");
        assert_eq!(again.project_id, key.project_id);
    }

    #[tokio::test]
    async fn pager_walks_rows_by_id_cursor() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store.create_dataset("golden").unwrap();
        assert_eq!(store.create_dataset("golden").unwrap(), id);
        let rows: Vec<Value> = (0..5).map(|n| json!({"input": n, "expected": n * 2})).collect();
        assert_eq!(store.insert_rows(&id, &rows).unwrap(), 5);
        assert_eq!(store.row_count(&id).unwrap(), 5);

        let pager = store.pager("golden").unwrap();
        let first = pager.fetch(None, 2).await.unwrap();
        assert_eq!(first.rows, rows[..2].to_vec());
        let cursor = first.cursor.unwrap();
        let second = pager.fetch(Some(&cursor), 2).await.unwrap();
        assert_eq!(second.rows, rows[2..4].to_vec());
        let last = pager.fetch(second.cursor.as_deref(), 2).await.unwrap();
        assert_eq!(last.rows, rows[4..].to_vec());
        assert!(last.cursor.is_none());

        assert!(pager.fetch(Some("nope"), 2).await.is_err());
        assert!(matches!(store.pager("missing"), Err(StoreError::UnknownDataset(_))));
    }

    #[tokio::test]
    async fn stored_dataset_feeds_paginated_cases() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store.create_dataset("golden").unwrap();
        let rows: Vec<Value> = (0..7).map(|n| json!({"input": n, "expected": n})).collect();
        store.insert_rows(&id, &rows).unwrap();

        let mut cases = PaginatedCases::<i64, i64>::new(store.pager("golden").unwrap())
            .page_size(3)
            .max_records(5);
        let mut inputs = Vec::new();
        while let Some(item) = cases.next().await {
            inputs.push(item.unwrap().input);
        }
        assert_eq!(inputs, vec![0, 1, 2, 3, 4]);
    }
}
