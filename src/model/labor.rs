//! Labors: work opened by one event and closed by a later one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Designation, EventId, HostId, LaborId, QuestId};

/// A unit of work on a host.
///
/// Open while `completion_time` is `None`. `completion_time` and
/// `completion_event_id` are always set together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Labor {
    pub id: LaborId,
    pub host_id: HostId,
    pub quest_id: Option<QuestId>,
    pub creation_event_id: EventId,
    pub completion_event_id: Option<EventId>,
    /// First labor of the chain this labor continues. `None` on the origin itself.
    pub starting_labor_id: Option<LaborId>,
    pub creation_time: DateTime<Utc>,
    pub completion_time: Option<DateTime<Utc>>,
    pub ack_time: Option<DateTime<Utc>>,
    pub ack_user: Option<String>,
    pub for_owner: bool,
    pub for_creator: bool,
}

impl Labor {
    pub fn is_open(&self) -> bool {
        self.completion_time.is_none()
    }

    pub fn is_acknowledged(&self) -> bool {
        self.ack_time.is_some()
    }

    /// The labor that started this chain (possibly this one).
    pub fn chain_origin(&self) -> LaborId {
        self.starting_labor_id.unwrap_or(self.id)
    }
}

/// A labor staged by the matching engine.
///
/// Two staged labors with equal fields are the same labor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NewLabor {
    pub host_id: HostId,
    pub creation_event_id: EventId,
    pub starting_labor_id: Option<LaborId>,
    pub quest_id: Option<QuestId>,
    pub designation: Designation,
}

/// A staged completion: `labor_id` is achieved by `event_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LaborClosure {
    pub labor_id: LaborId,
    pub event_id: EventId,
}

/// Filters for listing labors. Unset fields do not constrain.
#[derive(Debug, Clone, Default)]
pub struct LaborFilter {
    pub hostname: Option<String>,
    pub quest_id: Option<QuestId>,
    /// `Some(true)` for open labors only, `Some(false)` for closed only.
    pub open: Option<bool>,
    /// Labors whose `starting_labor_id` equals this id.
    pub starting_labor_id: Option<LaborId>,
    /// A whole chain: the origin itself plus every labor that points to it.
    pub chain: Option<LaborId>,
    /// Category of the creation event's type.
    pub category: Option<String>,
    /// State of the creation event's type.
    pub state: Option<String>,
    pub for_owner: Option<bool>,
    pub for_creator: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}
