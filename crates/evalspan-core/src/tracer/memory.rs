use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{child_span_context, with_root_parent, AttrKey, Span, SpanAttributes, SpanEvent, SpanStatus, Tracer};
use crate::context::{Context, SpanContext};

/// A span after `end()`, as captured by [`MemoryTracer`].
#[derive(Debug, Clone)]
pub struct FinishedSpan {
    pub name: String,
    pub context: SpanContext,
    pub parent_span_id: Option<String>,
    pub attributes: BTreeMap<AttrKey, String>,
    pub status: SpanStatus,
    pub events: Vec<SpanEvent>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl FinishedSpan {
    pub fn attr(&self, key: AttrKey) -> Option<&str> {
        self.attributes.get(&key).map(String::as_str)
    }

    pub fn attr_json(&self, key: AttrKey) -> Option<Value> {
        self.attr(key).and_then(|raw| serde_json::from_str(raw).ok())
    }

    pub fn is_error(&self) -> bool {
        self.status.is_error()
    }

    pub fn has_event(&self, name: &str) -> bool {
        self.events.iter().any(|e| e.name == name)
    }

    /// Whether the two spans were open at the same time.
    pub fn overlaps(&self, other: &FinishedSpan) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Keeps every finished span in memory, in the order spans ended.
#[derive(Debug, Clone, Default)]
pub struct MemoryTracer {
    finished: Arc<Mutex<Vec<FinishedSpan>>>,
}

impl MemoryTracer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spans(&self) -> Vec<FinishedSpan> {
        self.finished
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn spans_named(&self, name: &str) -> Vec<FinishedSpan> {
        self.spans().into_iter().filter(|s| s.name == name).collect()
    }

    pub fn len(&self) -> usize {
        self.finished
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.finished
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}

struct MemorySpan {
    sink: Arc<Mutex<Vec<FinishedSpan>>>,
    name: String,
    context: SpanContext,
    parent_span_id: Option<String>,
    attributes: SpanAttributes,
    status: SpanStatus,
    events: Vec<SpanEvent>,
    start: DateTime<Utc>,
}

impl Span for MemorySpan {
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
        let span = *self;
        let finished = FinishedSpan {
            name: span.name,
            context: span.context,
            parent_span_id: span.parent_span_id,
            attributes: span.attributes.into_values(),
            status: span.status,
            events: span.events,
            start: span.start,
            end: Utc::now(),
        };
        span.sink
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(finished);
    }
}

impl Tracer for MemoryTracer {
    fn start(&self, cx: &Context, name: &str, attrs: SpanAttributes) -> (Context, Box<dyn Span>) {
        let span_cx = child_span_context(cx);
        let span = MemorySpan {
            sink: self.finished.clone(),
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Parent;
    use evalspan_types::SpanType;

    #[test]
    fn records_spans_in_end_order_with_parentage() {
        let tracer = MemoryTracer::new();
        let root = Context::new().with_parent(Parent::Experiment("exp".into()));

        let (cx, mut outer) = tracer.start(&root, "eval", SpanAttributes::new().span_type(SpanType::Eval));
        let (_, mut inner) = tracer.start(&cx, "task", SpanAttributes::new().input(&1));
        inner.set_attributes(SpanAttributes::new().output(&2));
        inner.end();
        outer.set_status(SpanStatus::Ok);
        outer.end();

        let spans = tracer.spans();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].name, "task");
        assert_eq!(spans[1].name, "eval");
        assert_eq!(spans[0].parent_span_id.as_deref(), Some(spans[1].context.span_id.as_str()));
        assert_eq!(spans[0].context.trace_id, spans[1].context.trace_id);
        assert_eq!(spans[0].attr(AttrKey::InputJson), Some("1"));
        assert_eq!(spans[0].attr(AttrKey::OutputJson), Some("2"));
        assert_eq!(spans[1].attr(AttrKey::Parent), Some("experiment_id:exp"));
        assert!(spans[0].attr(AttrKey::Parent).is_none());
        assert!(spans[1].start <= spans[0].start);
    }

    #[test]
    fn record_error_sets_status_and_event() {
        let tracer = MemoryTracer::new();
        let (_, mut span) = tracer.start(&Context::new(), "task", SpanAttributes::new());
        let err: Box<dyn std::error::Error + Send + Sync> = "bad input".into();
        span.record_error(err.as_ref());
        span.end();

        let spans = tracer.spans_named("task");
        assert!(spans[0].is_error());
        assert!(spans[0].has_event("exception"));
        assert_eq!(spans[0].status, SpanStatus::Error("bad input".into()));
    }
}
