//! Matching pass span helpers.

use tracing::Span;

use crate::model::QuestId;

/// Start a span for one matching pass.
///
/// `labors.opened` and `labors.closed` are declared empty and filled in by
/// [`record_plan`].
pub fn start_matching_span(batch_size: usize, quest: Option<QuestId>) -> Span {
    tracing::info_span!(
        "fates.question",
        "batch.size" = batch_size,
        "quest.id" = quest.map(|q| q.0),
        "labors.opened" = tracing::field::Empty,
        "labors.closed" = tracing::field::Empty,
    )
}

/// Record what the pass changed on its span.
pub fn record_plan(span: &Span, opened: usize, closed: usize) {
    span.record("labors.opened", opened);
    span.record("labors.closed", closed);
    span.in_scope(|| {
        tracing::debug!(opened, closed, "plan applied");
    });
}
