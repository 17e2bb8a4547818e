//! Span factory abstraction. The engine never decides where spans go; it
//! only talks to the [`Tracer`] handed to the eval builder.

mod attributes;
mod log;
mod memory;

use std::fmt;

use crate::context::Context;

pub use attributes::{AttrKey, AttributeError, SpanAttributes};
pub use log::LogTracer;
pub use memory::{FinishedSpan, MemoryTracer};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SpanStatus {
    #[default]
    Unset,
    Ok,
    Error(String),
}

impl SpanStatus {
    pub fn error(message: impl fmt::Display) -> Self {
        SpanStatus::Error(message.to_string())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, SpanStatus::Error(_))
    }
}

/// A named, timestamped annotation on a span.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanEvent {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub at: chrono::DateTime<chrono::Utc>,
}

impl SpanEvent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            at: chrono::Utc::now(),
        }
    }

    pub fn attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    /// An `exception` event carrying the error's message chain.
    pub fn exception(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut chain = Vec::new();
        let mut cur = err.source();
        while let Some(inner) = cur {
            chain.push(inner.to_string());
            cur = inner.source();
        }
        let mut event = Self::new("exception").attr("exception.message", err.to_string());
        if !chain.is_empty() {
            event = event.attr("exception.cause", chain.join(": "));
        }
        event
    }
}

pub trait Span: Send {
    fn context(&self) -> &crate::context::SpanContext;
    fn set_attributes(&mut self, attrs: SpanAttributes);
    fn set_status(&mut self, status: SpanStatus);
    fn add_event(&mut self, event: SpanEvent);
    fn end(self: Box<Self>);

    /// Records `err` as an exception event and marks the span failed.
    fn record_error(&mut self, err: &(dyn std::error::Error + 'static)) {
        self.add_event(SpanEvent::exception(err));
        self.set_status(SpanStatus::error(err));
    }
}

pub trait Tracer: Send + Sync {
    /// Opens a span under whatever span `cx` points at and returns a context
    /// positioned inside the new span.
    fn start(&self, cx: &Context, name: &str, attrs: SpanAttributes) -> (Context, Box<dyn Span>);
}

/// Fresh span identity under `cx`: reuses the trace id of the enclosing span
/// or starts a new trace at the root.
pub fn child_span_context(cx: &Context) -> crate::context::SpanContext {
    let trace_id = cx
        .span()
        .map(|s| s.trace_id.clone())
        .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
    crate::context::SpanContext {
        trace_id,
        span_id: uuid::Uuid::new_v4().simple().to_string(),
    }
}

/// Stamps the run's `parent` attribute on spans opened at the root of `cx`.
pub fn with_root_parent(cx: &Context, attrs: SpanAttributes) -> SpanAttributes {
    match (cx.span(), cx.parent()) {
        (None, Some(parent)) => attrs.parent(parent),
        _ => attrs,
    }
}

/// Drops every span on the floor.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

struct NoopSpan {
    cx: crate::context::SpanContext,
}

impl Span for NoopSpan {
    fn context(&self) -> &crate::context::SpanContext {
        &self.cx
    }
    fn set_attributes(&mut self, _attrs: SpanAttributes) {}
    fn set_status(&mut self, _status: SpanStatus) {}
    fn add_event(&mut self, _event: SpanEvent) {}
    fn end(self: Box<Self>) {}
}

impl Tracer for NoopTracer {
    fn start(&self, cx: &Context, _name: &str, _attrs: SpanAttributes) -> (Context, Box<dyn Span>) {
        let span_cx = child_span_context(cx);
        (cx.with_span(span_cx.clone()), Box::new(NoopSpan { cx: span_cx }))
    }
}
