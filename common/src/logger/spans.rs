use tracing::{Span, field};

use super::TraceId;

/// Root span for one unit of work (a monitoring cycle, a manual check).
pub fn root_span(name: &'static str, trace_id: &TraceId) -> Span {
    tracing::info_span!(
        "root",
        name = %name,
        trace_id = %trace_id.as_str(),
        watch_id = field::Empty,
        route = field::Empty
    )
}

/// Child span; inherits the trace id from the enclosing root span.
pub fn child_span(name: &'static str) -> Span {
    tracing::info_span!(
        "child",
        name = %name,
        watch_id = field::Empty,
        route = field::Empty
    )
}
