//! Quests: named batches of labors tracked to joint completion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{EventTypeId, QuestId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Quest {
    pub id: QuestId,
    pub creator: String,
    pub description: String,
    pub embark_time: DateTime<Utc>,
    pub target_time: Option<DateTime<Utc>>,
    /// Set once, when every attached labor is complete. Never unset.
    pub completion_time: Option<DateTime<Utc>>,
}

impl Quest {
    pub fn is_complete(&self) -> bool {
        self.completion_time.is_some()
    }
}

/// Completion figures for a quest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestProgress {
    pub total_labors: i64,
    pub open_labors: i64,
    pub completed_labors: i64,
    /// Whole percent of labors completed. 0 for a quest with no labors.
    pub percent_complete: i64,
}

impl QuestProgress {
    pub fn new(total_labors: i64, open_labors: i64) -> Self {
        let completed_labors = total_labors - open_labors;
        let percent_complete = if total_labors > 0 {
            completed_labors * 100 / total_labors
        } else {
            0
        };
        Self {
            total_labors,
            open_labors,
            completed_labors,
            percent_complete,
        }
    }
}

/// How an embarking quest acquires its labors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbarkMode {
    /// Record one event per host; the fates open the labors.
    #[default]
    Fresh,
    /// Group already-open, unaffiliated labors created by this event type.
    Adopt,
}

/// Builder for embarking on a quest.
#[derive(Debug, Clone)]
pub struct NewQuest {
    pub(crate) creator: String,
    pub(crate) description: String,
    pub(crate) event_type_id: EventTypeId,
    pub(crate) hostnames: Vec<String>,
    pub(crate) target_time: Option<DateTime<Utc>>,
    pub(crate) mode: EmbarkMode,
}

impl NewQuest {
    pub fn new(
        creator: impl Into<String>,
        description: impl Into<String>,
        event_type_id: EventTypeId,
    ) -> Self {
        Self {
            creator: creator.into(),
            description: description.into(),
            event_type_id,
            hostnames: Vec::new(),
            target_time: None,
            mode: EmbarkMode::Fresh,
        }
    }

    pub fn hosts<I, S>(mut self, hostnames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hostnames.extend(hostnames.into_iter().map(Into::into));
        self
    }

    pub fn target_time(mut self, target_time: DateTime<Utc>) -> Self {
        self.target_time = Some(target_time);
        self
    }

    pub fn mode(mut self, mode: EmbarkMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Changes applied by `Db::update_quest`. Unset fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct QuestUpdate {
    pub description: Option<String>,
    pub creator: Option<String>,
    pub target_time: Option<DateTime<Utc>>,
}

/// Filters for listing quests.
#[derive(Debug, Clone, Default)]
pub struct QuestFilter {
    /// Only quests that have not completed.
    pub open_only: bool,
    pub creator: Option<String>,
    /// Quests holding a labor on any of these hosts.
    pub hostnames: Vec<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}
