use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use evalspan_core::tracer::{child_span_context, with_root_parent};
use evalspan_core::{AttrKey, Context, Parent, Span, SpanAttributes, SpanContext, SpanEvent, SpanStatus, Tracer};

use crate::{lock, StoreError};

/// A span row read back from the `spans` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSpan {
    pub experiment_id: Option<String>,
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub name: String,
    pub status: String,
    pub error: Option<String>,
    pub attributes: BTreeMap<String, String>,
    pub events: Vec<Value>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl StoredSpan {
    pub fn attr(&self, key: AttrKey) -> Option<&str> {
        self.attributes.get(key.as_str()).map(String::as_str)
    }

    pub fn is_error(&self) -> bool {
        self.status == "error"
    }
}

/// Writes every finished span as one row of the store's `spans` table.
///
/// Write failures are logged and dropped; a run never fails because its
/// spans could not be persisted.
#[derive(Debug, Clone)]
pub struct SqliteTracer {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTracer {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }
}

struct SqliteSpan {
    conn: Arc<Mutex<Connection>>,
    experiment_id: Option<String>,
    name: String,
    context: SpanContext,
    parent_span_id: Option<String>,
    attributes: SpanAttributes,
    status: SpanStatus,
    events: Vec<SpanEvent>,
    start: DateTime<Utc>,
}

impl SqliteSpan {
    fn write(&self, end: DateTime<Utc>) -> Result<(), StoreError> {
        let (status, error) = match &self.status {
            SpanStatus::Unset => ("unset", None),
            SpanStatus::Ok => ("ok", None),
            SpanStatus::Error(message) => ("error", Some(message.as_str())),
        };
        let attributes: BTreeMap<&str, &str> =
            self.attributes.iter().map(|(key, value)| (key.as_str(), value)).collect();
        let events: Vec<Value> = self
            .events
            .iter()
            .map(|event| {
                json!({
                    "name": event.name,
                    "attributes": event.attributes.iter().cloned().collect::<BTreeMap<_, _>>(),
                    "at": event.at,
                })
            })
            .collect();

        let conn = lock(&self.conn)?;
        conn.execute(
            "INSERT INTO spans (experiment_id, trace_id, span_id, parent_span_id, name, status, error,
                                attributes, events, started_at, ended_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                self.experiment_id,
                self.context.trace_id,
                self.context.span_id,
                self.parent_span_id,
                self.name,
                status,
                error,
                serde_json::to_string(&attributes)?,
                serde_json::to_string(&events)?,
                self.start,
                end
            ],
        )?;
        Ok(())
    }
}

impl Span for SqliteSpan {
    fn context(&self) -> &SpanContext {
        &self.context
    }

    fn set_attributes(&mut self, attrs: SpanAttributes) {
        self.attributes.merge(attrs);
    }

    fn set_status(&mut self, status: SpanStatus) {
        self.status = status;
    }

    fn add_event(&mut self, event: SpanEvent) {
        self.events.push(event);
    }

    fn end(self: Box<Self>) {
        if let Err(err) = self.write(Utc::now()) {
            warn!(
                span = %self.name,
                span_id = %self.context.span_id,
                error = %err,
                "failed to persist span"
            );
        }
    }
}

impl Tracer for SqliteTracer {
    fn start(&self, cx: &Context, name: &str, attrs: SpanAttributes) -> (Context, Box<dyn Span>) {
        let span_cx = child_span_context(cx);
        let experiment_id = match cx.parent() {
            Some(Parent::Experiment(id)) => Some(id.clone()),
            None => None,
        };
        let span = SqliteSpan {
            conn: self.conn.clone(),
            experiment_id,
            name: name.to_string(),
            context: span_cx.clone(),
            parent_span_id: cx.span().map(|s| s.span_id.clone()),
            attributes: with_root_parent(cx, attrs),
            status: SpanStatus::Unset,
            events: Vec::new(),
            start: Utc::now(),
        };
        (cx.with_span(span_cx), Box::new(span))
    }
}

struct SpanRow {
    experiment_id: Option<String>,
    trace_id: String,
    span_id: String,
    parent_span_id: Option<String>,
    name: String,
    status: String,
    error: Option<String>,
    attributes: String,
    events: String,
    started_at: DateTime<Utc>,
    ended_at: DateTime<Utc>,
}

pub(crate) fn spans_for_experiment(
    conn: &Mutex<Connection>,
    experiment_id: &str,
) -> Result<Vec<StoredSpan>, StoreError> {
    let conn = lock(conn)?;
    let mut stmt = conn.prepare(
        "SELECT experiment_id, trace_id, span_id, parent_span_id, name, status, error,
                attributes, events, started_at, ended_at
         FROM spans WHERE experiment_id = ?1 ORDER BY id",
    )?;
    let rows = stmt
        .query_map(params![experiment_id], |row| {
            Ok(SpanRow {
                experiment_id: row.get(0)?,
                trace_id: row.get(1)?,
                span_id: row.get(2)?,
                parent_span_id: row.get(3)?,
                name: row.get(4)?,
                status: row.get(5)?,
                error: row.get(6)?,
                attributes: row.get(7)?,
                events: row.get(8)?,
                started_at: row.get(9)?,
                ended_at: row.get(10)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|row| -> Result<StoredSpan, StoreError> {
            Ok(StoredSpan {
                experiment_id: row.experiment_id,
                trace_id: row.trace_id,
                span_id: row.span_id,
                parent_span_id: row.parent_span_id,
                name: row.name,
                status: row.status,
                error: row.error,
                attributes: serde_json::from_str(&row.attributes)?,
                events: serde_json::from_str(&row.events)?,
                started_at: row.started_at,
                ended_at: row.ended_at,
            })
        })
        .collect()
}
