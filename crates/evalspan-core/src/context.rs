use std::fmt;

use tokio_util::sync::CancellationToken;

/// Where the spans of a run are recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parent {
    Experiment(String),
}

impl fmt::Display for Parent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parent::Experiment(id) => write!(f, "experiment_id:{id}"),
        }
    }
}

/// Identity of a live span, handed to children so they can link back to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanContext {
    pub trace_id: String,
    pub span_id: String,
}

/// Threaded through span creation, tasks and scorers.
///
/// Cloning is cheap; children share the parent's cancellation token.
#[derive(Debug, Clone, Default)]
pub struct Context {
    cancel: CancellationToken,
    parent: Option<Parent>,
    span: Option<SpanContext>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_parent(mut self, parent: Parent) -> Self {
        self.parent = Some(parent);
        self
    }

    /// A child context positioned inside `span`.
    pub fn with_span(&self, span: SpanContext) -> Self {
        Self {
            cancel: self.cancel.clone(),
            parent: self.parent.clone(),
            span: Some(span),
        }
    }

    pub fn parent(&self) -> Option<&Parent> {
        self.parent.as_ref()
    }

    pub fn span(&self) -> Option<&SpanContext> {
        self.span.as_ref()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_context_keeps_parent_and_token() {
        let token = CancellationToken::new();
        let root = Context::new()
            .with_cancellation(token.clone())
            .with_parent(Parent::Experiment("exp-1".into()));
        let child = root.with_span(SpanContext {
            trace_id: "t".into(),
            span_id: "s".into(),
        });
        assert_eq!(child.parent(), Some(&Parent::Experiment("exp-1".into())));
        assert_eq!(child.span().map(|s| s.span_id.as_str()), Some("s"));
        assert!(root.span().is_none());

        token.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn parent_formats_as_attribute_value() {
        assert_eq!(Parent::Experiment("abc".into()).to_string(), "experiment_id:abc");
    }
}
