//! Quest aggregation: embark, progress, edge-triggered completion.

use chrono::Utc;
use opentelemetry::KeyValue;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::model::event::NewEvent;
use crate::model::{
    BatchId, EmbarkMode, NewQuest, Quest, QuestFilter, QuestId, QuestProgress, QuestUpdate,
};
use crate::notice::NoticeKind;
use crate::telemetry::metrics;

const QUEST_COLUMNS: &str = "id, creator, description, embark_time, target_time, completion_time";

/// A quest that has just completed, with the summary handed to delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestCompletion {
    pub quest: Quest,
    pub summary: String,
}

impl QuestCompletion {
    fn new(quest: Quest, labors: i64) -> Self {
        let target = quest
            .target_time
            .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_else(|| "none".to_string());
        let summary = format!(
            "Quest {} \"{}\" by {} is complete: {} labor(s) finished. Embarked {}, target {}.",
            quest.id,
            quest.description,
            quest.creator,
            labors,
            quest.embark_time.format("%Y-%m-%d %H:%M UTC"),
            target,
        );
        Self { quest, summary }
    }

    pub fn notice(&self) -> NoticeKind {
        NoticeKind::QuestCompleted {
            quest_id: self.quest.id,
            creator: self.quest.creator.clone(),
            summary: self.summary.clone(),
        }
    }
}

impl super::Db {
    /// Embark on a quest.
    ///
    /// In [`EmbarkMode::Fresh`] one event per host is recorded under batch id
    /// `quest-<id>` and the labors its starting fates open join the quest. In
    /// [`EmbarkMode::Adopt`] open, unaffiliated labors on those hosts that were
    /// created by the event type join instead. Either way a quest with no
    /// labors is rejected and nothing is written.
    pub async fn embark_quest(&self, new: NewQuest) -> Result<Quest> {
        let start = std::time::Instant::now();
        let creator = new.creator.trim();
        let description = new.description.trim();
        if creator.is_empty() {
            return Err(Error::validation("quest creator must not be blank"));
        }
        if description.is_empty() {
            return Err(Error::validation("quest description must not be blank"));
        }
        if let Some(target) = new.target_time {
            if target <= Utc::now() {
                warn!(%target, "quest rejected: target time is not in the future");
                return Err(Error::validation("target time must be in the future"));
            }
        }
        let hostnames = super::hosts::normalize_hostnames(&new.hostnames)?;

        let fates = self.fates.snapshot(&self.pool).await?;
        let mut tx = self.pool.begin().await?;

        let event_type = super::event_types::event_type_on(&mut tx, new.event_type_id)
            .await
            .map_err(|e| match e {
                Error::NotFound { .. } => Error::validation(format!(
                    "event type {} does not exist",
                    new.event_type_id
                )),
                other => other,
            })?;

        let (quest, labors, batch) = match new.mode {
            EmbarkMode::Fresh => {
                if fates.starting_created_by(event_type.id).next().is_none() {
                    return Err(Error::validation(format!(
                        "no starting fate is created by {event_type}"
                    )));
                }

                let hosts = super::hosts::ensure_hosts_on(&mut tx, &hostnames).await?;
                let quest = insert_quest_on(&mut tx, creator, description, new.target_time).await?;
                let batch_id = BatchId::for_quest(quest.id);
                let new_events: Vec<NewEvent> = hosts
                    .iter()
                    .map(|host| NewEvent {
                        host_id: host.id,
                        event_type_id: event_type.id,
                        user: creator.to_string(),
                        note: Some(description.to_string()),
                    })
                    .collect();

                let (events, outcome) = super::events::record_batch_on(
                    &mut tx,
                    &fates,
                    &new_events,
                    Some(&batch_id),
                    Some(quest.id),
                )
                .await?;
                let labors = outcome
                    .opened
                    .iter()
                    .filter(|l| l.quest_id == Some(quest.id))
                    .count();
                (quest, labors, Some((events, batch_id, outcome)))
            }
            EmbarkMode::Adopt => {
                let hosts = super::hosts::hosts_by_name_on(&mut tx, &hostnames).await?;
                let quest = insert_quest_on(&mut tx, creator, description, new.target_time).await?;
                let labors = if hosts.is_empty() {
                    0
                } else {
                    let mut qb: QueryBuilder<Sqlite> =
                        QueryBuilder::new("UPDATE labors SET quest_id = ");
                    qb.push_bind(quest.id);
                    qb.push(
                        " WHERE quest_id IS NULL AND completion_event_id IS NULL
                          AND creation_event_id IN (SELECT id FROM events WHERE event_type_id = ",
                    );
                    qb.push_bind(event_type.id);
                    qb.push(") AND host_id IN (");
                    let mut list = qb.separated(", ");
                    for host in &hosts {
                        list.push_bind(host.id);
                    }
                    list.push_unseparated(")");
                    qb.build().execute(&mut *tx).await?.rows_affected() as usize
                };
                (quest, labors, None)
            }
        };

        if labors == 0 {
            warn!(creator, mode = ?new.mode, "quest rejected: no labors");
            return Err(Error::validation("quest would hold no labors"));
        }

        tx.commit().await?;

        if let Some((events, batch_id, outcome)) = batch {
            self.publish_batch(&events, Some(&batch_id), &outcome);
        }
        self.notifier.publish(NoticeKind::QuestEmbarked {
            quest_id: quest.id,
            creator: quest.creator.clone(),
            labors,
        });
        metrics::operation_duration_ms().record(
            start.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("operation", "quest.embark")],
        );
        info!(
            id = %quest.id,
            creator = %quest.creator,
            mode = ?new.mode,
            hosts = hostnames.len(),
            labors,
            "quest embarked"
        );
        Ok(quest)
    }

    /// Re-evaluate a quest's completion outside of a matching pass.
    pub async fn check_quest_completion(&self, id: QuestId) -> Result<Option<QuestCompletion>> {
        let mut tx = self.pool.begin().await?;
        quest_on(&mut tx, id).await?;
        let completion = check_completion_on(&mut tx, id).await?;
        tx.commit().await?;

        if let Some(ref completion) = completion {
            self.notifier.publish(completion.notice());
        }
        Ok(completion)
    }

    pub async fn get_quest(&self, id: QuestId) -> Result<Quest> {
        let mut conn = self.pool.acquire().await?;
        quest_on(&mut conn, id).await
    }

    /// Labor counts and percent complete for a quest.
    pub async fn quest_progress(&self, id: QuestId) -> Result<QuestProgress> {
        let mut conn = self.pool.acquire().await?;
        quest_on(&mut conn, id).await?;
        let (total, open) = labor_counts_on(&mut conn, id).await?;
        Ok(QuestProgress::new(total, open))
    }

    /// List quests matching `filter`, ordered by id.
    pub async fn list_quests(&self, filter: &QuestFilter) -> Result<Vec<Quest>> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {QUEST_COLUMNS} FROM quests q WHERE 1 = 1"));
        if filter.open_only {
            qb.push(" AND q.completion_time IS NULL");
        }
        if let Some(ref creator) = filter.creator {
            qb.push(" AND q.creator = ").push_bind(creator.as_str());
        }
        if !filter.hostnames.is_empty() {
            qb.push(
                " AND EXISTS (SELECT 1 FROM labors l JOIN hosts h ON h.id = l.host_id
                  WHERE l.quest_id = q.id AND h.hostname IN (",
            );
            let mut list = qb.separated(", ");
            for hostname in &filter.hostnames {
                list.push_bind(hostname.as_str());
            }
            list.push_unseparated("))");
        }
        qb.push(" ORDER BY q.id");
        super::push_pagination(&mut qb, filter.limit, filter.offset);

        Ok(qb.build_query_as().fetch_all(&self.pool).await?)
    }

    /// Change a quest's description, creator or target time.
    pub async fn update_quest(&self, id: QuestId, update: QuestUpdate) -> Result<Quest> {
        let description = update.description.as_deref().map(str::trim);
        let creator = update.creator.as_deref().map(str::trim);
        if description.is_some_and(str::is_empty) {
            return Err(Error::validation("quest description must not be blank"));
        }
        if creator.is_some_and(str::is_empty) {
            return Err(Error::validation("quest creator must not be blank"));
        }
        if update.target_time.is_some_and(|t| t <= Utc::now()) {
            return Err(Error::validation("target time must be in the future"));
        }

        let quest: Option<Quest> = sqlx::query_as(&format!(
            "UPDATE quests SET
                description = COALESCE($1, description),
                creator = COALESCE($2, creator),
                target_time = COALESCE($3, target_time)
             WHERE id = $4
             RETURNING {QUEST_COLUMNS}"
        ))
        .bind(description)
        .bind(creator)
        .bind(update.target_time)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let quest = quest.ok_or_else(|| Error::not_found("quest", id))?;
        info!(id = %id, "quest updated");
        Ok(quest)
    }
}

pub(crate) async fn quest_on(conn: &mut SqliteConnection, id: QuestId) -> Result<Quest> {
    let quest: Option<Quest> =
        sqlx::query_as(&format!("SELECT {QUEST_COLUMNS} FROM quests WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
    quest.ok_or_else(|| Error::not_found("quest", id))
}

async fn insert_quest_on(
    conn: &mut SqliteConnection,
    creator: &str,
    description: &str,
    target_time: Option<chrono::DateTime<Utc>>,
) -> Result<Quest> {
    let quest = sqlx::query_as(&format!(
        "INSERT INTO quests (creator, description, embark_time, target_time)
         VALUES ($1, $2, $3, $4)
         RETURNING {QUEST_COLUMNS}"
    ))
    .bind(creator)
    .bind(description)
    .bind(Utc::now())
    .bind(target_time)
    .fetch_one(&mut *conn)
    .await?;
    Ok(quest)
}

/// `(total, open)` labor counts for a quest.
async fn labor_counts_on(conn: &mut SqliteConnection, id: QuestId) -> Result<(i64, i64)> {
    let counts: (i64, i64) = sqlx::query_as(
        "SELECT COUNT(*),
                COALESCE(SUM(CASE WHEN completion_event_id IS NULL THEN 1 ELSE 0 END), 0)
         FROM labors WHERE quest_id = $1",
    )
    .bind(id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(counts)
}

/// Stamp the quest complete if every attached labor is closed.
///
/// Returns `Some` only on the call that stamps it; a quest with no labors,
/// one with open labors, or one already complete yields `None`.
pub(crate) async fn check_completion_on(
    conn: &mut SqliteConnection,
    id: QuestId,
) -> Result<Option<QuestCompletion>> {
    let (total, open) = labor_counts_on(conn, id).await?;
    if total == 0 || open > 0 {
        return Ok(None);
    }

    let quest: Option<Quest> = sqlx::query_as(&format!(
        "UPDATE quests SET completion_time = $1
         WHERE id = $2 AND completion_time IS NULL
         RETURNING {QUEST_COLUMNS}"
    ))
    .bind(Utc::now())
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(quest) = quest else {
        return Ok(None);
    };
    metrics::quests_completed().add(1, &[]);
    info!(id = %quest.id, creator = %quest.creator, labors = total, "quest complete");
    Ok(Some(QuestCompletion::new(quest, total)))
}
