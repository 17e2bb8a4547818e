use std::time::Instant;

use tracing::{debug, warn};

use super::{child_span_context, with_root_parent, AttrKey, Span, SpanAttributes, SpanEvent, SpanStatus, Tracer};
use crate::context::{Context, SpanContext};

/// Emits each finished span as a `tracing` event under the
/// `evalspan::span` target. Failed spans are logged at `warn`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTracer;

struct LogSpan {
    name: String,
    context: SpanContext,
    parent_span_id: Option<String>,
    attributes: SpanAttributes,
    status: SpanStatus,
    events: usize,
    started: Instant,
}

impl Span for LogSpan {
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
        self.events += 1;
        debug!(
            target: "evalspan::span",
            span = %self.name,
            span_id = %self.context.span_id,
            event = %event.name,
            "span event"
        );
    }

    fn end(self: Box<Self>) {
        let duration_ms = self.started.elapsed().as_millis() as u64;
        let parent = self.parent_span_id.as_deref().unwrap_or("-");
        let scores = self.attributes.get(AttrKey::Scores).unwrap_or("");
        match &self.status {
            SpanStatus::Error(message) => warn!(
                target: "evalspan::span",
                span = %self.name,
                trace_id = %self.context.trace_id,
                span_id = %self.context.span_id,
                parent_span_id = %parent,
                duration_ms,
                events = self.events,
                error = %message,
                "span failed"
            ),
            _ => debug!(
                target: "evalspan::span",
                span = %self.name,
                trace_id = %self.context.trace_id,
                span_id = %self.context.span_id,
                parent_span_id = %parent,
                duration_ms,
                scores = %scores,
                "span finished"
            ),
        }
    }
}

impl Tracer for LogTracer {
    fn start(&self, cx: &Context, name: &str, attrs: SpanAttributes) -> (Context, Box<dyn Span>) {
        let span_cx = child_span_context(cx);
        let span = LogSpan {
            name: name.to_string(),
            context: span_cx.clone(),
            parent_span_id: cx.span().map(|s| s.span_id.clone()),
            attributes: with_root_parent(cx, attrs),
            status: SpanStatus::Unset,
            events: 0,
            started: Instant::now(),
        };
        (cx.with_span(span_cx), Box::new(span))
    }
}
