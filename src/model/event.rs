//! Events: immutable facts reported against a host.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{EventId, EventTypeId, HostId, QuestId};

/// An observation of an [`super::EventType`] on a host. Never updated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Event {
    pub id: EventId,
    pub host_id: HostId,
    pub event_type_id: EventTypeId,
    /// Free-text attribution. Not validated.
    #[sqlx(rename = "user_name")]
    pub user: String,
    pub timestamp: DateTime<Utc>,
    pub note: Option<String>,
    /// Groups events that were submitted together.
    pub batch_id: Option<BatchId>,
}

/// Tag shared by every event recorded in one batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct BatchId(pub String);

impl BatchId {
    /// Batch id for the events synthesized when a quest embarks.
    pub fn for_quest(quest_id: QuestId) -> Self {
        Self(format!("quest-{quest_id}"))
    }

    /// Fresh batch id for an ad-hoc multi-host submission.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An event staged for insertion. Hosts are already resolved.
#[derive(Debug, Clone)]
pub(crate) struct NewEvent {
    pub host_id: HostId,
    pub event_type_id: EventTypeId,
    pub user: String,
    pub note: Option<String>,
}

/// Filters for listing events. Unset fields do not constrain.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub hostname: Option<String>,
    pub event_type_id: Option<EventTypeId>,
    pub category: Option<String>,
    pub state: Option<String>,
    pub batch_id: Option<BatchId>,
    /// Events at or after this instant.
    pub after: Option<DateTime<Utc>>,
    /// Events strictly before this instant.
    pub before: Option<DateTime<Utc>>,
    /// Events from the latest event of this type onwards. The latest one is
    /// picked among the events the hostname filter allows.
    pub after_event_type: Option<EventTypeId>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// How a caller names the type of an event to record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventTypeRef {
    Id(EventTypeId),
    Named { category: String, state: String },
}

impl EventTypeRef {
    pub fn named(category: impl Into<String>, state: impl Into<String>) -> Self {
        Self::Named {
            category: category.into(),
            state: state.into(),
        }
    }
}

impl From<EventTypeId> for EventTypeRef {
    fn from(id: EventTypeId) -> Self {
        Self::Id(id)
    }
}

impl std::fmt::Display for EventTypeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Named { category, state } => write!(f, "{category}/{state}"),
        }
    }
}
