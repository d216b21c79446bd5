//! Applies a match plan inside the transaction that recorded its events.

use std::collections::BTreeSet;

use sqlx::SqliteConnection;
use tracing::{Instrument as _, debug};

use crate::error::Result;
use crate::matching::question_the_fates;
use crate::model::{Event, HostId, Labor, QuestId};
use crate::registry::FateSnapshot;
use crate::telemetry::matching::{record_plan, start_matching_span};

use super::QuestCompletion;

/// What a matching pass changed.
#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    pub opened: Vec<Labor>,
    pub completed: Vec<Labor>,
    /// Quests whose last open labor was closed by this pass.
    pub completed_quests: Vec<QuestCompletion>,
}

/// Question the fates for `events` and apply the result through `conn`.
///
/// `events` must already be inserted, in submission order. `fates` is taken
/// before the transaction began.
pub(crate) async fn question_the_fates_on(
    conn: &mut SqliteConnection,
    fates: &FateSnapshot,
    events: &[Event],
    quest: Option<QuestId>,
) -> Result<MatchOutcome> {
    let span = start_matching_span(events.len(), quest);
    apply(conn, fates, events, quest, &span)
        .instrument(span.clone())
        .await
}

async fn apply(
    conn: &mut SqliteConnection,
    fates: &FateSnapshot,
    events: &[Event],
    quest: Option<QuestId>,
    span: &tracing::Span,
) -> Result<MatchOutcome> {
    if events.is_empty() {
        return Ok(MatchOutcome::default());
    }

    let hosts: Vec<HostId> = events
        .iter()
        .map(|e| e.host_id)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let open = super::labors::open_labors_on_hosts_on(conn, &hosts).await?;
    debug!(
        generation = fates.generation(),
        open_labors = open.len(),
        hosts = hosts.len(),
        "questioning the fates"
    );

    let plan = question_the_fates(fates, events, open, quest);
    if plan.is_empty() {
        record_plan(span, 0, 0);
        return Ok(MatchOutcome::default());
    }

    let opened = super::labors::open_many_on(conn, &plan.opens).await?;
    let completed = super::labors::close_many_on(conn, &plan.closes).await?;

    let mut completed_quests = Vec::new();
    for quest_id in &plan.touched_quests {
        if let Some(completion) = super::quests::check_completion_on(conn, *quest_id).await? {
            completed_quests.push(completion);
        }
    }

    record_plan(span, opened.len(), completed.len());
    Ok(MatchOutcome {
        opened,
        completed,
        completed_quests,
    })
}
