//! Core data model.
//!
//! Hosts report Events of a given EventType. Fates map one event type into
//! another; a Labor is the work opened by one event and closed by a later
//! one. Quests group Labors and track them to joint completion.

pub mod event;
pub mod fate;
pub mod labor;
pub mod quest;

use serde::{Deserialize, Serialize};

pub use event::{BatchId, Event, EventFilter, EventTypeRef};
pub use fate::{Designation, Fate, NewFate};
pub use labor::{Labor, LaborClosure, LaborFilter, NewLabor};
pub use quest::{EmbarkMode, NewQuest, Quest, QuestFilter, QuestProgress, QuestUpdate};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
            Serialize, Deserialize, sqlx::Type,
        )]
        #[serde(transparent)]
        #[sqlx(transparent)]
        pub struct $name(pub i64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Row id of an [`EventType`].
    EventTypeId
);
id_type!(
    /// Row id of a [`Host`].
    HostId
);
id_type!(
    /// Row id of an [`Event`].
    EventId
);
id_type!(
    /// Row id of a [`Fate`].
    FateId
);
id_type!(
    /// Row id of a [`Labor`].
    LaborId
);
id_type!(
    /// Row id of a [`Quest`].
    QuestId
);

// ---------------------------------------------------------------------------
// Event Type
// ---------------------------------------------------------------------------

/// A `(category, state)` pair classifying events, e.g. `("system-reboot", "required")`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct EventType {
    pub id: EventTypeId,
    pub category: String,
    pub state: String,
    /// Metadata only; never participates in matching.
    pub description: Option<String>,
    /// Only direct library calls may record events of this type; the
    /// interactive surfaces refuse them.
    pub restricted: bool,
}

impl EventType {
    /// Fail with `Validation` if this type is restricted.
    pub fn ensure_unrestricted(&self) -> crate::error::Result<()> {
        if self.restricted {
            return Err(crate::error::Error::validation(format!(
                "event type {self} is restricted"
            )));
        }
        Ok(())
    }
}

/// Builder for creating event types.
#[derive(Debug, Clone)]
pub struct NewEventType {
    pub(crate) category: String,
    pub(crate) state: String,
    pub(crate) description: Option<String>,
    pub(crate) restricted: bool,
}

impl NewEventType {
    pub fn new(category: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            state: state.into(),
            description: None,
            restricted: false,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn restricted(mut self, restricted: bool) -> Self {
        self.restricted = restricted;
        self
    }
}

/// Filters for listing event types. Unset fields do not constrain.
#[derive(Debug, Clone, Default)]
pub struct EventTypeFilter {
    pub category: Option<String>,
    pub state: Option<String>,
    /// Only types that some starting fate is created by.
    pub starting_only: bool,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.category, self.state)
    }
}

// ---------------------------------------------------------------------------
// Host
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Host {
    pub id: HostId,
    pub hostname: String,
}
