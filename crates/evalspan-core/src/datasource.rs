use std::collections::VecDeque;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context as _, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::types::Case;

/// Upper bound on rows requested per page.
pub const MAX_PAGE_SIZE: usize = 100;

/// Pull-based, single-consumer source of cases.
///
/// `None` marks the end of the sequence and must be returned by every call
/// after it. `Some(Err(_))` is a non-terminal failure for one slot; callers
/// may keep pulling afterwards.
#[async_trait]
pub trait CaseIterator<I, R>: Send {
    async fn next(&mut self) -> Option<Result<Case<I, R>>>;
}

pub struct VecCases<I, R> {
    cases: std::vec::IntoIter<Case<I, R>>,
}

impl<I, R> VecCases<I, R> {
    pub fn new(cases: Vec<Case<I, R>>) -> Self {
        Self {
            cases: cases.into_iter(),
        }
    }
}

#[async_trait]
impl<I: Send, R: Send> CaseIterator<I, R> for VecCases<I, R> {
    async fn next(&mut self) -> Option<Result<Case<I, R>>> {
        self.cases.next().map(Ok)
    }
}

/// Read JSONL where each line is
/// `{"id"?: string, "input": any, "expected": any, "tags"?: [string], "metadata"?: object}`.
///
/// The file is read on the first pull. A malformed line fails only its own
/// slot; an unreadable file fails one slot and ends the sequence.
pub struct JsonlCases<I, R> {
    path: PathBuf,
    lines: Option<std::vec::IntoIter<(usize, String)>>,
    _marker: PhantomData<fn() -> (I, R)>,
}

impl<I, R> JsonlCases<I, R> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lines: None,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<I, R> CaseIterator<I, R> for JsonlCases<I, R>
where
    I: DeserializeOwned + Send,
    R: DeserializeOwned + Send,
{
    async fn next(&mut self) -> Option<Result<Case<I, R>>> {
        if self.lines.is_none() {
            match tokio_fs_read_to_string(&self.path).await {
                Ok(content) => {
                    let lines: Vec<(usize, String)> = content
                        .lines()
                        .enumerate()
                        .map(|(idx, line)| (idx + 1, line.trim().to_string()))
                        .filter(|(_, line)| !line.is_empty())
                        .collect();
                    debug!(path = ?self.path, cases = lines.len(), "loaded jsonl cases");
                    self.lines = Some(lines.into_iter());
                }
                Err(err) => {
                    self.lines = Some(Vec::new().into_iter());
                    return Some(Err(err));
                }
            }
        }
        let (line_no, line) = self.lines.as_mut()?.next()?;
        Some(parse_line(line_no, &line))
    }
}

fn parse_line<I: DeserializeOwned, R: DeserializeOwned>(line_no: usize, line: &str) -> Result<Case<I, R>> {
    let value: Value =
        serde_json::from_str(line).with_context(|| format!("Invalid JSON on line {line_no}"))?;
    if !value.is_object() {
        return Err(anyhow!("Line {line_no}: expected object"));
    }
    decode_row(value).with_context(|| format!("Line {line_no}: not a case"))
}

fn decode_row<I: DeserializeOwned, R: DeserializeOwned>(row: Value) -> Result<Case<I, R>> {
    Ok(serde_json::from_value(row)?)
}

/// One batch of raw dataset rows.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub rows: Vec<Value>,
    /// Opaque token for the following page; `None` or empty when there is none.
    pub cursor: Option<String>,
}

/// A remote, cursor-paginated row source.
#[async_trait]
pub trait DatasetPager: Send + Sync {
    async fn fetch(&self, cursor: Option<&str>, limit: usize) -> Result<Page>;
}

/// Cases pulled page by page from a [`DatasetPager`].
///
/// A failed fetch surfaces as one `Err` item; the next pull retries the same
/// cursor. Rows that do not decode into a case fail only their own slot.
pub struct PaginatedCases<I, R> {
    pager: Arc<dyn DatasetPager>,
    buffer: VecDeque<Value>,
    cursor: Option<String>,
    page_size: usize,
    max_records: Option<usize>,
    fetched: usize,
    exhausted: bool,
    _marker: PhantomData<fn() -> (I, R)>,
}

impl<I, R> PaginatedCases<I, R> {
    pub fn new(pager: Arc<dyn DatasetPager>) -> Self {
        Self {
            pager,
            buffer: VecDeque::new(),
            cursor: None,
            page_size: MAX_PAGE_SIZE,
            max_records: None,
            fetched: 0,
            exhausted: false,
            _marker: PhantomData,
        }
    }

    /// Stop after `limit` records, however many the source holds.
    pub fn max_records(mut self, limit: usize) -> Self {
        self.max_records = Some(limit);
        self
    }

    /// Rows per fetch, clamped to `1..=MAX_PAGE_SIZE`.
    pub fn page_size(mut self, size: usize) -> Self {
        self.page_size = size.clamp(1, MAX_PAGE_SIZE);
        self
    }

    fn remaining(&self) -> Option<usize> {
        self.max_records.map(|max| max.saturating_sub(self.fetched))
    }

    async fn fill(&mut self) -> Result<()> {
        let limit = match self.remaining() {
            Some(0) => {
                self.exhausted = true;
                return Ok(());
            }
            Some(remaining) => remaining.min(self.page_size),
            None => self.page_size,
        };
        let page = self
            .pager
            .fetch(self.cursor.as_deref(), limit)
            .await
            .context("failed to fetch dataset page")?;
        debug!(rows = page.rows.len(), cursor = ?page.cursor, "fetched dataset page");

        if page.rows.is_empty() {
            self.exhausted = true;
            return Ok(());
        }
        let mut rows = page.rows;
        rows.truncate(limit);
        self.fetched += rows.len();
        self.buffer.extend(rows);

        match page.cursor {
            Some(cursor) if !cursor.is_empty() => self.cursor = Some(cursor),
            _ => self.exhausted = true,
        }
        if self.remaining() == Some(0) {
            self.exhausted = true;
        }
        Ok(())
    }
}

#[async_trait]
impl<I, R> CaseIterator<I, R> for PaginatedCases<I, R>
where
    I: DeserializeOwned + Send,
    R: DeserializeOwned + Send,
{
    async fn next(&mut self) -> Option<Result<Case<I, R>>> {
        loop {
            if let Some(row) = self.buffer.pop_front() {
                return Some(decode_row(row));
            }
            if self.exhausted {
                return None;
            }
            if let Err(err) = self.fill().await {
                return Some(Err(err));
            }
        }
    }
}

/// In-memory [`DatasetPager`]; the cursor is the offset of the next row.
#[derive(Debug, Default)]
pub struct VecPager {
    rows: Vec<Value>,
    requests: Mutex<Vec<usize>>,
}

impl VecPager {
    pub fn new(rows: Vec<Value>) -> Self {
        Self {
            rows,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// The `limit` of every fetch served so far.
    pub fn requested_limits(&self) -> Vec<usize> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl DatasetPager for VecPager {
    async fn fetch(&self, cursor: Option<&str>, limit: usize) -> Result<Page> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(limit);
        let start = match cursor {
            Some(c) => c.parse::<usize>().context("invalid cursor")?,
            None => 0,
        };
        let end = (start + limit).min(self.rows.len());
        let rows = self.rows.get(start..end).unwrap_or_default().to_vec();
        let cursor = (end < self.rows.len()).then(|| end.to_string());
        Ok(Page { rows, cursor })
    }
}

#[cfg(not(feature = "sync-fs"))]
async fn tokio_fs_read_to_string(path: &PathBuf) -> Result<String> {
    use tokio::fs;
    fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {:?}", path))
}

#[cfg(feature = "sync-fs")]
async fn tokio_fs_read_to_string(path: &PathBuf) -> Result<String> {
    use std::fs;
    use tokio::task;
    let path_clone = path.clone();
    let content = task::spawn_blocking(move || {
        fs::read_to_string(&path_clone).with_context(|| format!("Failed to read {:?}", path_clone))
    })
    .await
    .map_err(|e| anyhow!(e))??;
    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn rows(n: usize) -> Vec<Value> {
        (0..n).map(|i| json!({"input": i, "expected": i * 2})).collect()
    }

    async fn drain<I, R>(it: &mut dyn CaseIterator<I, R>) -> Vec<Result<Case<I, R>>> {
        let mut out = Vec::new();
        while let Some(item) = it.next().await {
            out.push(item);
        }
        out
    }

    #[tokio::test]
    async fn vec_cases_exhaustion_is_idempotent() {
        let mut it = VecCases::new(vec![Case::new(1, 2)]);
        assert!(matches!(it.next().await, Some(Ok(_))));
        assert!(it.next().await.is_none());
        assert!(it.next().await.is_none());
    }

    #[tokio::test]
    async fn jsonl_bad_line_fails_only_its_slot() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"id": "a", "input": "x", "expected": "y", "tags": ["t"]}}"#).unwrap();
        writeln!(file, "not json").unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"input": "z", "expected": "w", "metadata": {{"k": 1}}}}"#).unwrap();

        let mut it = JsonlCases::<String, String>::new(file.path());
        let items = drain::<String, String>(&mut it).await;
        assert_eq!(items.len(), 3);
        let first = items[0].as_ref().unwrap();
        assert_eq!(first.id.as_deref(), Some("a"));
        assert_eq!(first.tags, vec!["t".to_string()]);
        assert!(items[1].as_ref().unwrap_err().to_string().contains("line 2"));
        assert_eq!(items[2].as_ref().unwrap().metadata.get("k"), Some(&json!(1)));
        assert!(it.next().await.is_none());
    }

    #[tokio::test]
    async fn jsonl_missing_file_fails_once_then_ends() {
        let mut it = JsonlCases::<Value, Value>::new("/nonexistent/cases.jsonl");
        assert!(matches!(it.next().await, Some(Err(_))));
        assert!(it.next().await.is_none());
    }

    #[tokio::test]
    async fn paginated_cases_respect_record_limit() {
        let pager = Arc::new(VecPager::new(rows(250)));
        let mut it = PaginatedCases::<u64, u64>::new(pager.clone()).max_records(130);
        let items = drain::<u64, u64>(&mut it).await;
        assert_eq!(items.len(), 130);
        assert!(items.iter().all(|c| c.is_ok()));
        assert_eq!(pager.requested_limits(), vec![100, 30]);
        assert!(it.next().await.is_none());
    }

    #[tokio::test]
    async fn paginated_cases_limit_is_independent_of_page_size() {
        for page_size in [1, 3, 7, 100] {
            let pager = Arc::new(VecPager::new(rows(20)));
            let mut it = PaginatedCases::<u64, u64>::new(pager).page_size(page_size).max_records(11);
            assert_eq!(drain::<u64, u64>(&mut it).await.len(), 11, "page size {page_size}");
        }
    }

    #[tokio::test]
    async fn paginated_cases_drain_whole_source_without_limit() {
        let pager = Arc::new(VecPager::new(rows(205)));
        let mut it = PaginatedCases::<u64, u64>::new(pager.clone());
        let items = drain::<u64, u64>(&mut it).await;
        assert_eq!(items.len(), 205);
        assert_eq!(items[204].as_ref().unwrap().expected, 408);
        assert_eq!(pager.requested_limits(), vec![100, 100, 100]);
    }

    struct FlakyPager {
        inner: VecPager,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DatasetPager for FlakyPager {
        async fn fetch(&self, cursor: Option<&str>, limit: usize) -> Result<Page> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 1 {
                return Err(anyhow!("503 from dataset service"));
            }
            self.inner.fetch(cursor, limit).await
        }
    }

    #[tokio::test]
    async fn paginated_fetch_failure_is_retried_with_same_cursor() {
        let pager = Arc::new(FlakyPager {
            inner: VecPager::new(rows(4)),
            calls: AtomicUsize::new(0),
        });
        let mut it = PaginatedCases::<u64, u64>::new(pager).page_size(2);
        let items = drain::<u64, u64>(&mut it).await;
        let inputs: Vec<_> = items.iter().filter_map(|r| r.as_ref().ok()).map(|c| c.input).collect();
        assert_eq!(inputs, vec![0, 1, 2, 3]);
        assert_eq!(items.iter().filter(|r| r.is_err()).count(), 1);
    }

    #[tokio::test]
    async fn undecodable_row_fails_its_slot() {
        let pager = Arc::new(VecPager::new(vec![json!({"input": 1}), json!({"input": 2, "expected": 3})]));
        let mut it = PaginatedCases::<u64, u64>::new(pager);
        let items = drain::<u64, u64>(&mut it).await;
        assert!(items[0].is_err());
        assert_eq!(items[1].as_ref().unwrap().expected, 3);
    }
}
