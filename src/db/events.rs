//! Event log: append events and question the fates in the same transaction.

use std::time::Instant;

use chrono::Utc;
use opentelemetry::KeyValue;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use tracing::info;

use crate::error::{Error, Result};
use crate::model::event::NewEvent;
use crate::model::{BatchId, Event, EventFilter, EventId, EventTypeId, EventTypeRef, QuestId};
use crate::registry::FateSnapshot;
use crate::telemetry::metrics;

use super::MatchOutcome;

const EVENT_COLUMNS: &str = "id, host_id, event_type_id, user_name, timestamp, note, batch_id";

const EVENT_COLUMNS_E: &str =
    "e.id, e.host_id, e.event_type_id, e.user_name, e.timestamp, e.note, e.batch_id";

impl super::Db {
    /// Record one event. The host is created if it does not exist yet.
    ///
    /// The event type is given by id or by its `(category, state)` pair.
    pub async fn record_event(
        &self,
        hostname: &str,
        user: &str,
        event_type: impl Into<EventTypeRef>,
        note: Option<&str>,
    ) -> Result<Event> {
        let mut events = self
            .record_for_hosts(&[hostname.to_string()], user, event_type.into(), note, None)
            .await?;
        events
            .pop()
            .ok_or_else(|| Error::Other("event insert returned no row".to_string()))
    }

    /// Record the same event on several hosts as one batch.
    ///
    /// Duplicate hostnames collapse to one event.
    pub async fn record_events_for_hosts(
        &self,
        hostnames: &[String],
        user: &str,
        event_type: impl Into<EventTypeRef>,
        note: Option<&str>,
    ) -> Result<Vec<Event>> {
        let batch_id = BatchId::generate();
        self.record_for_hosts(hostnames, user, event_type.into(), note, Some(batch_id))
            .await
    }

    /// Record the event on every host that holds a labor of `quest_id`.
    pub async fn record_events_for_quest(
        &self,
        quest_id: QuestId,
        user: &str,
        event_type: impl Into<EventTypeRef>,
        note: Option<&str>,
    ) -> Result<Vec<Event>> {
        let hostnames: Vec<String> = {
            let mut conn = self.pool.acquire().await?;
            super::quests::quest_on(&mut conn, quest_id).await?;
            sqlx::query_scalar(
                "SELECT DISTINCT h.hostname FROM labors l
                 JOIN hosts h ON h.id = l.host_id
                 WHERE l.quest_id = $1
                 ORDER BY h.hostname",
            )
            .bind(quest_id)
            .fetch_all(&mut *conn)
            .await?
        };
        if hostnames.is_empty() {
            return Err(Error::validation(format!("quest {quest_id} holds no labors")));
        }

        let batch_id = BatchId::generate();
        self.record_for_hosts(&hostnames, user, event_type.into(), note, Some(batch_id))
            .await
    }

    async fn record_for_hosts(
        &self,
        hostnames: &[String],
        user: &str,
        event_type: EventTypeRef,
        note: Option<&str>,
        batch_id: Option<BatchId>,
    ) -> Result<Vec<Event>> {
        let start = Instant::now();
        let fates = self.fates.snapshot(&self.pool).await?;
        let mut tx = self.pool.begin().await?;

        let event_type_id = super::event_types::resolve_event_type_on(&mut tx, &event_type)
            .await?
            .id;
        let hosts = super::hosts::ensure_hosts_on(&mut tx, hostnames).await?;
        let new_events: Vec<NewEvent> = hosts
            .iter()
            .map(|host| NewEvent {
                host_id: host.id,
                event_type_id,
                user: user.to_string(),
                note: note.map(str::to_string),
            })
            .collect();

        let (events, outcome) =
            record_batch_on(&mut tx, &fates, &new_events, batch_id.as_ref(), None).await?;

        tx.commit().await?;
        self.publish_batch(&events, batch_id.as_ref(), &outcome);

        metrics::operation_duration_ms().record(
            start.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("operation", "event.record")],
        );
        info!(
            event_type_id = %event_type_id,
            events = events.len(),
            batch_id = ?batch_id,
            opened = outcome.opened.len(),
            completed = outcome.completed.len(),
            "events recorded"
        );
        Ok(events)
    }

    pub async fn get_event(&self, id: EventId) -> Result<Event> {
        let event: Option<Event> =
            sqlx::query_as(&format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        event.ok_or_else(|| Error::not_found("event", id))
    }

    /// List events matching `filter`.
    ///
    /// Pagination walks back from the newest event; each page is returned
    /// oldest first.
    pub async fn list_events(&self, filter: &EventFilter) -> Result<Vec<Event>> {
        let anchor = match filter.after_event_type {
            Some(event_type_id) => Some(
                self.latest_event_of_type(event_type_id, filter.hostname.as_deref())
                    .await?
                    .ok_or_else(|| {
                        Error::validation(format!("no event of type {event_type_id} found"))
                    })?,
            ),
            None => None,
        };

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {EVENT_COLUMNS} FROM (
             SELECT {EVENT_COLUMNS_E} FROM events e
             JOIN hosts h ON h.id = e.host_id
             JOIN event_types t ON t.id = e.event_type_id
             WHERE 1 = 1"
        ));
        if let Some(ref hostname) = filter.hostname {
            qb.push(" AND h.hostname = ").push_bind(hostname.as_str());
        }
        if let Some(event_type_id) = filter.event_type_id {
            qb.push(" AND e.event_type_id = ").push_bind(event_type_id);
        }
        if let Some(ref category) = filter.category {
            qb.push(" AND t.category = ").push_bind(category.as_str());
        }
        if let Some(ref state) = filter.state {
            qb.push(" AND t.state = ").push_bind(state.as_str());
        }
        if let Some(ref batch_id) = filter.batch_id {
            qb.push(" AND e.batch_id = ").push_bind(batch_id.0.as_str());
        }
        if let Some(after) = filter.after {
            qb.push(" AND e.timestamp >= ").push_bind(after);
        }
        if let Some(before) = filter.before {
            qb.push(" AND e.timestamp < ").push_bind(before);
        }
        if let Some(anchor) = anchor {
            qb.push(" AND e.id >= ").push_bind(anchor);
        }
        qb.push(" ORDER BY e.timestamp DESC, e.id DESC");
        super::push_pagination(&mut qb, filter.limit, filter.offset);
        qb.push(") ORDER BY timestamp, id");

        Ok(qb.build_query_as().fetch_all(&self.pool).await?)
    }

    /// Most recent event of `event_type_id`, optionally on one host.
    async fn latest_event_of_type(
        &self,
        event_type_id: EventTypeId,
        hostname: Option<&str>,
    ) -> Result<Option<EventId>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT e.id FROM events e JOIN hosts h ON h.id = e.host_id WHERE e.event_type_id = ",
        );
        qb.push_bind(event_type_id);
        if let Some(hostname) = hostname {
            qb.push(" AND h.hostname = ").push_bind(hostname);
        }
        qb.push(" ORDER BY e.timestamp DESC, e.id DESC LIMIT 1");

        let id = qb
            .build_query_scalar::<EventId>()
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }
}

/// Insert `new_events` in order, then question the fates for them.
///
/// Runs on the caller's connection so the events and every labor change they
/// cause commit or roll back together.
pub(crate) async fn record_batch_on(
    conn: &mut SqliteConnection,
    fates: &FateSnapshot,
    new_events: &[NewEvent],
    batch_id: Option<&BatchId>,
    quest: Option<QuestId>,
) -> Result<(Vec<Event>, MatchOutcome)> {
    if new_events.is_empty() {
        return Err(Error::validation("a batch needs at least one event"));
    }

    super::ensure_ids_exist_on(
        conn,
        "event_types",
        "event type",
        new_events.iter().map(|e| e.event_type_id.0),
    )
    .await?;

    let now = Utc::now();
    let mut events: Vec<Event> = Vec::with_capacity(new_events.len());
    for chunk in new_events.chunks(super::BIND_CHUNK) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO events (host_id, event_type_id, user_name, timestamp, note, batch_id) ",
        );
        qb.push_values(chunk, |mut row, event| {
            row.push_bind(event.host_id)
                .push_bind(event.event_type_id)
                .push_bind(event.user.as_str())
                .push_bind(now)
                .push_bind(event.note.as_deref())
                .push_bind(batch_id.map(|b| b.0.as_str()));
        });
        qb.push(" RETURNING ");
        qb.push(EVENT_COLUMNS);
        events.extend(qb.build_query_as::<Event>().fetch_all(&mut *conn).await?);
    }
    // Ids follow insertion order, which is submission order.
    events.sort_by_key(|e| e.id);
    metrics::events_recorded().add(events.len() as u64, &[]);

    let outcome = super::matching::question_the_fates_on(conn, fates, &events, quest).await?;
    Ok((events, outcome))
}
