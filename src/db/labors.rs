//! Labor lifecycle: bulk open and close, acknowledgement, quest attachment, reads.

use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::matching::OpenLabor;
use crate::model::{HostId, Labor, LaborClosure, LaborFilter, LaborId, NewLabor, QuestId};
use crate::notice::NoticeKind;
use crate::telemetry::metrics;

pub(crate) const LABOR_COLUMNS: &str = "id, host_id, quest_id, creation_event_id, \
     completion_event_id, starting_labor_id, creation_time, completion_time, ack_time, ack_user, \
     for_owner, for_creator";

const LABOR_COLUMNS_L: &str = "l.id, l.host_id, l.quest_id, l.creation_event_id, \
     l.completion_event_id, l.starting_labor_id, l.creation_time, l.completion_time, \
     l.ack_time, l.ack_user, l.for_owner, l.for_creator";

impl super::Db {
    /// Get a labor by ID.
    pub async fn get_labor(&self, id: LaborId) -> Result<Labor> {
        let mut conn = self.pool.acquire().await?;
        labor_on(&mut conn, id).await
    }

    /// Mark a labor as seen by `user`. Last write wins.
    pub async fn acknowledge_labor(&self, id: LaborId, user: &str) -> Result<Labor> {
        let user = user.trim();
        if user.is_empty() {
            return Err(Error::validation("acknowledging user must not be blank"));
        }

        let labor: Option<Labor> = sqlx::query_as(&format!(
            "UPDATE labors SET ack_time = $1, ack_user = $2 WHERE id = $3 RETURNING {LABOR_COLUMNS}"
        ))
        .bind(Utc::now())
        .bind(user)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        let labor = labor.ok_or_else(|| Error::not_found("labor", id))?;

        self.notifier.publish(NoticeKind::LaborAcknowledged {
            labor_id: id,
            user: user.to_string(),
        });
        info!(labor_id = %id, user, "labor acknowledged");
        Ok(labor)
    }

    /// Attach a labor to a quest, replacing any previous affiliation.
    ///
    /// Both the new quest and the one the labor leaves are re-checked: either
    /// may now hold only completed labors.
    pub async fn attach_labor_to_quest(&self, id: LaborId, quest_id: QuestId) -> Result<Labor> {
        let mut tx = self.pool.begin().await?;

        super::quests::quest_on(&mut tx, quest_id).await?;
        let previous = labor_on(&mut tx, id).await?.quest_id;
        let labor: Labor = sqlx::query_as(&format!(
            "UPDATE labors SET quest_id = $1 WHERE id = $2 RETURNING {LABOR_COLUMNS}"
        ))
        .bind(quest_id)
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        let mut completions = Vec::new();
        for quest in std::iter::once(quest_id).chain(previous.filter(|q| *q != quest_id)) {
            if let Some(completion) = super::quests::check_completion_on(&mut tx, quest).await? {
                completions.push(completion);
            }
        }

        tx.commit().await?;
        self.notifier.publish_all(completions.iter().map(|c| c.notice()));
        info!(
            labor_id = %id,
            quest_id = %quest_id,
            previous = ?previous,
            "labor attached to quest"
        );
        Ok(labor)
    }

    /// List labors matching `filter`, ordered by id.
    pub async fn list_labors(&self, filter: &LaborFilter) -> Result<Vec<Labor>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {LABOR_COLUMNS_L} FROM labors l
             JOIN hosts h ON h.id = l.host_id
             JOIN events e ON e.id = l.creation_event_id
             JOIN event_types t ON t.id = e.event_type_id
             WHERE 1 = 1"
        ));
        if let Some(ref hostname) = filter.hostname {
            qb.push(" AND h.hostname = ").push_bind(hostname.as_str());
        }
        if let Some(quest_id) = filter.quest_id {
            qb.push(" AND l.quest_id = ").push_bind(quest_id);
        }
        match filter.open {
            Some(true) => {
                qb.push(" AND l.completion_time IS NULL");
            }
            Some(false) => {
                qb.push(" AND l.completion_time IS NOT NULL");
            }
            None => {}
        }
        if let Some(starting) = filter.starting_labor_id {
            qb.push(" AND l.starting_labor_id = ").push_bind(starting);
        }
        if let Some(origin) = filter.chain {
            qb.push(" AND (l.id = ")
                .push_bind(origin)
                .push(" OR l.starting_labor_id = ")
                .push_bind(origin)
                .push(")");
        }
        if let Some(ref category) = filter.category {
            qb.push(" AND t.category = ").push_bind(category.as_str());
        }
        if let Some(ref state) = filter.state {
            qb.push(" AND t.state = ").push_bind(state.as_str());
        }
        if let Some(for_owner) = filter.for_owner {
            qb.push(" AND l.for_owner = ").push_bind(for_owner);
        }
        if let Some(for_creator) = filter.for_creator {
            qb.push(" AND l.for_creator = ").push_bind(for_creator);
        }
        qb.push(" ORDER BY l.id");
        super::push_pagination(&mut qb, filter.limit, filter.offset);

        Ok(qb.build_query_as().fetch_all(&self.pool).await?)
    }

    /// Every labor whose completion time is unset.
    pub async fn open_labors(&self) -> Result<Vec<Labor>> {
        let labors = sqlx::query_as(&format!(
            "SELECT {LABOR_COLUMNS} FROM labors WHERE completion_time IS NULL ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(labors)
    }

    /// Open labors nobody has acknowledged yet.
    pub async fn open_unacknowledged_labors(&self) -> Result<Vec<Labor>> {
        let labors = sqlx::query_as(&format!(
            "SELECT {LABOR_COLUMNS} FROM labors
             WHERE completion_time IS NULL AND ack_time IS NULL
             ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(labors)
    }
}

pub(crate) async fn labor_on(conn: &mut SqliteConnection, id: LaborId) -> Result<Labor> {
    let labor: Option<Labor> =
        sqlx::query_as(&format!("SELECT {LABOR_COLUMNS} FROM labors WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
    labor.ok_or_else(|| Error::not_found("labor", id))
}

/// Open labors on `hosts`, each with the type of the event that opened it.
pub(crate) async fn open_labors_on_hosts_on(
    conn: &mut SqliteConnection,
    hosts: &[HostId],
) -> Result<Vec<OpenLabor>> {
    let mut labors = Vec::new();
    for chunk in hosts.chunks(super::BIND_CHUNK) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT l.id, l.host_id, l.quest_id, l.starting_labor_id,
                    e.event_type_id AS creation_type_id
             FROM labors l
             JOIN events e ON e.id = l.creation_event_id
             WHERE l.completion_event_id IS NULL AND l.host_id IN (",
        );
        let mut list = qb.separated(", ");
        for host in chunk {
            list.push_bind(*host);
        }
        list.push_unseparated(") ORDER BY l.id");
        labors.extend(qb.build_query_as::<OpenLabor>().fetch_all(&mut *conn).await?);
    }
    labors.sort_by_key(|l| l.id);
    Ok(labors)
}

/// Insert staged labors in bulk.
///
/// Every referenced host, event, quest and chain origin must exist. A labor
/// that already exists for the same creation event and chain origin is
/// skipped, so the result may hold fewer labors than `staged`.
pub(crate) async fn open_many_on(
    conn: &mut SqliteConnection,
    staged: &[NewLabor],
) -> Result<Vec<Labor>> {
    if staged.is_empty() {
        return Ok(Vec::new());
    }

    super::ensure_ids_exist_on(conn, "hosts", "host", staged.iter().map(|s| s.host_id.0)).await?;
    super::ensure_ids_exist_on(
        conn,
        "events",
        "event",
        staged.iter().map(|s| s.creation_event_id.0),
    )
    .await?;
    super::ensure_ids_exist_on(
        conn,
        "quests",
        "quest",
        staged.iter().filter_map(|s| s.quest_id).map(|q| q.0),
    )
    .await?;
    super::ensure_ids_exist_on(
        conn,
        "labors",
        "labor",
        staged.iter().filter_map(|s| s.starting_labor_id).map(|l| l.0),
    )
    .await?;

    let now = Utc::now();
    let mut opened: Vec<Labor> = Vec::with_capacity(staged.len());
    for chunk in staged.chunks(super::BIND_CHUNK) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO labors (host_id, quest_id, creation_event_id, starting_labor_id, \
             creation_time, for_owner, for_creator) ",
        );
        qb.push_values(chunk, |mut row, new| {
            row.push_bind(new.host_id)
                .push_bind(new.quest_id)
                .push_bind(new.creation_event_id)
                .push_bind(new.starting_labor_id)
                .push_bind(now)
                .push_bind(new.designation.for_owner)
                .push_bind(new.designation.for_creator);
        });
        qb.push(" ON CONFLICT DO NOTHING RETURNING ");
        qb.push(LABOR_COLUMNS);
        opened.extend(qb.build_query_as::<Labor>().fetch_all(&mut *conn).await?);
    }
    opened.sort_by_key(|l| l.id);

    let skipped = staged.len() - opened.len();
    if skipped > 0 {
        warn!(skipped, "labors already opened by a concurrent pass");
    }
    metrics::labors_opened().add(opened.len() as u64, &[]);
    debug!(opened = opened.len(), "labors opened");
    Ok(opened)
}

/// Close staged labors.
///
/// Fails on an unknown labor or event, or on a labor that is already closed.
pub(crate) async fn close_many_on(
    conn: &mut SqliteConnection,
    closures: &[LaborClosure],
) -> Result<Vec<Labor>> {
    if closures.is_empty() {
        return Ok(Vec::new());
    }

    super::ensure_ids_exist_on(conn, "events", "event", closures.iter().map(|c| c.event_id.0))
        .await?;

    let now = Utc::now();
    let mut closed = Vec::with_capacity(closures.len());
    for closure in closures {
        let labor: Option<Labor> = sqlx::query_as(&format!(
            "UPDATE labors SET completion_event_id = $1, completion_time = $2
             WHERE id = $3 AND completion_event_id IS NULL
             RETURNING {LABOR_COLUMNS}"
        ))
        .bind(closure.event_id)
        .bind(now)
        .bind(closure.labor_id)
        .fetch_optional(&mut *conn)
        .await?;

        match labor {
            Some(labor) => closed.push(labor),
            None => {
                // Distinguish a missing labor from one closed underneath us.
                labor_on(conn, closure.labor_id).await?;
                return Err(Error::Conflict(format!(
                    "labor {} is already complete",
                    closure.labor_id
                )));
            }
        }
    }

    metrics::labors_completed().add(closed.len() as u64, &[]);
    debug!(closed = closed.len(), "labors closed");
    Ok(closed)
}
