use std::time::Duration;
use tracing::{Span, field};
use uuid::Uuid;

/// Fills the `watch_id`/`route` fields declared by `common::logger` spans.
pub fn annotate_span(watch_id: &Uuid, route: &str) {
    let span = Span::current();
    span.record("watch_id", field::display(watch_id));
    span.record("route", field::display(route));
}

pub async fn warn_if_slow<F, T>(label: &'static str, max: Duration, fut: F) -> T
where
    F: std::future::Future<Output = T>,
{
    let start = std::time::Instant::now();
    let out = fut.await;
    let elapsed = start.elapsed();
    if elapsed > max {
        tracing::warn!(
            target: "performance",
            label = label,
            elapsed_ms = elapsed.as_millis() as u64,
            "slow operation detected"
        );
    }
    out
}
