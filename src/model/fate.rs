//! Fates: the rulebook that turns one event type into another.

use serde::{Deserialize, Serialize};

use super::{EventTypeId, FateId};

/// A rule: an event of `creation_type_id` opens a labor that an event of
/// `completion_type_id` closes.
///
/// A fate with `follows_id` set only continues a chain started by the fate it
/// follows, and that fate's completion type must equal this fate's creation
/// type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Fate {
    pub id: FateId,
    pub creation_type_id: EventTypeId,
    pub completion_type_id: EventTypeId,
    pub follows_id: Option<FateId>,
    pub description: Option<String>,
    /// Labors opened under this fate concern the host's owner.
    pub for_owner: bool,
    /// Labors opened under this fate concern the creator of their quest.
    pub for_creator: bool,
    /// Fates that directly follow this one. Derived, not stored.
    #[sqlx(skip)]
    #[serde(default)]
    pub precedes: Vec<FateId>,
}

impl Fate {
    /// Entry point of a chain: follows nothing.
    pub fn is_starting(&self) -> bool {
        self.follows_id.is_none()
    }

    pub fn is_intermediate(&self) -> bool {
        self.follows_id.is_some()
    }

    /// Does closing a labor under this fate continue the chain?
    pub fn has_successors(&self) -> bool {
        !self.precedes.is_empty()
    }
}

/// Builder for creating fates.
#[derive(Debug, Clone)]
pub struct NewFate {
    pub(crate) creation_type_id: EventTypeId,
    pub(crate) completion_type_id: EventTypeId,
    pub(crate) follows_id: Option<FateId>,
    pub(crate) description: Option<String>,
    pub(crate) for_owner: bool,
    pub(crate) for_creator: bool,
}

impl NewFate {
    pub fn new(creation_type_id: EventTypeId, completion_type_id: EventTypeId) -> Self {
        Self {
            creation_type_id,
            completion_type_id,
            follows_id: None,
            description: None,
            for_owner: true,
            for_creator: false,
        }
    }

    pub fn follows(mut self, fate_id: FateId) -> Self {
        self.follows_id = Some(fate_id);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Defaults to `true`.
    pub fn for_owner(mut self, for_owner: bool) -> Self {
        self.for_owner = for_owner;
        self
    }

    /// Defaults to `false`.
    pub fn for_creator(mut self, for_creator: bool) -> Self {
        self.for_creator = for_creator;
        self
    }
}

/// Who a labor is designated for. Copied from the fates that open it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Designation {
    pub for_owner: bool,
    pub for_creator: bool,
}

impl Designation {
    /// Union of the designations of `fates`.
    pub fn of<'a>(fates: impl IntoIterator<Item = &'a Fate>) -> Self {
        fates.into_iter().fold(Self::default(), |acc, fate| Self {
            for_owner: acc.for_owner || fate.for_owner,
            for_creator: acc.for_creator || fate.for_creator,
        })
    }
}
