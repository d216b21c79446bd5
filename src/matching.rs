//! Questioning the fates: decide which labors a batch of events opens,
//! closes and chains.
//!
//! This module is pure. The store glue in `db::matching` loads the open
//! labors, calls [`question_the_fates`] and applies the resulting plan in the
//! same transaction that recorded the events.
//!
//! Labors staged while planning a batch are not visible to closure matching
//! in that batch. A chained labor opened by an event therefore stays open
//! until a later event arrives, even if another event in the same batch has
//! its completion type.

use std::collections::{HashMap, HashSet};

use crate::model::{
    Designation, Event, EventId, EventTypeId, Fate, HostId, LaborClosure, LaborId, NewLabor,
    QuestId,
};
use crate::registry::FateSnapshot;

/// An open labor as seen by the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::FromRow)]
pub struct OpenLabor {
    pub id: LaborId,
    pub host_id: HostId,
    pub quest_id: Option<QuestId>,
    pub starting_labor_id: Option<LaborId>,
    /// Type of the event that opened the labor.
    pub creation_type_id: EventTypeId,
}

/// Staged changes for one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchPlan {
    /// Labors to open, in staging order, without duplicates.
    pub opens: Vec<NewLabor>,
    /// Labors to close, in staging order. A labor appears at most once.
    pub closes: Vec<LaborClosure>,
    /// Quests holding a labor in `closes`, in first-seen order.
    pub touched_quests: Vec<QuestId>,
}

impl MatchPlan {
    pub fn is_empty(&self) -> bool {
        self.opens.is_empty() && self.closes.is_empty()
    }
}

#[derive(Default)]
struct Staging {
    plan: MatchPlan,
    staged: HashSet<NewLabor>,
    touched: HashSet<QuestId>,
}

impl Staging {
    fn open(&mut self, labor: NewLabor) {
        if self.staged.insert(labor) {
            self.plan.opens.push(labor);
        }
    }

    fn close(&mut self, labor: &OpenLabor, event_id: EventId) {
        self.plan.closes.push(LaborClosure {
            labor_id: labor.id,
            event_id,
        });
        if let Some(quest_id) = labor.quest_id {
            if self.touched.insert(quest_id) {
                self.plan.touched_quests.push(quest_id);
            }
        }
    }
}

/// Plan the labor changes caused by `events`, in order.
///
/// `open_labors` must hold every open labor on the hosts the events refer to.
/// `quest` is stamped onto labors opened by starting fates; chained labors
/// inherit the quest of the labor they continue.
pub fn question_the_fates(
    fates: &FateSnapshot,
    events: &[Event],
    open_labors: Vec<OpenLabor>,
    quest: Option<QuestId>,
) -> MatchPlan {
    let mut by_host: HashMap<HostId, Vec<OpenLabor>> = HashMap::new();
    for labor in open_labors {
        by_host.entry(labor.host_id).or_default().push(labor);
    }

    let mut staging = Staging::default();

    for event in events {
        // Opening. Every starting fate of the type stages the same labor, so
        // it is staged once with the union of their designations.
        let starting: Vec<&Fate> = fates.starting_created_by(event.event_type_id).collect();
        if !starting.is_empty() {
            staging.open(NewLabor {
                host_id: event.host_id,
                creation_event_id: event.id,
                starting_labor_id: None,
                quest_id: quest,
                designation: Designation::of(starting),
            });
        }

        // Closing and chaining
        let completing: Vec<_> = fates.completed_by(event.event_type_id).collect();
        if completing.is_empty() {
            continue;
        }
        let Some(open) = by_host.get_mut(&event.host_id) else {
            continue;
        };

        let mut still_open = Vec::with_capacity(open.len());
        for labor in open.drain(..) {
            let matched: Vec<&Fate> = completing
                .iter()
                .copied()
                .filter(|f| f.creation_type_id == labor.creation_type_id)
                .collect();
            if matched.is_empty() {
                still_open.push(labor);
                continue;
            }

            staging.close(&labor, event.id);

            // The chained labor is designated by the fates that will close it.
            let successors: Vec<&Fate> = matched
                .iter()
                .flat_map(|f| f.precedes.iter())
                .filter_map(|id| fates.get(*id))
                .collect();
            if !successors.is_empty() {
                staging.open(NewLabor {
                    host_id: event.host_id,
                    creation_event_id: event.id,
                    starting_labor_id: Some(labor.starting_labor_id.unwrap_or(labor.id)),
                    quest_id: labor.quest_id,
                    designation: Designation::of(successors),
                });
            }
        }
        *open = still_open;
    }

    staging.plan
}
