//! Event type administration: create, look up, describe.

use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use tracing::info;

use crate::error::{Error, Result};
use crate::model::{EventType, EventTypeFilter, EventTypeId, EventTypeRef, NewEventType};

const EVENT_TYPE_COLUMNS: &str = "id, category, state, description, restricted";

impl super::Db {
    /// Create an unrestricted event type.
    pub async fn create_event_type(
        &self,
        category: &str,
        state: &str,
        description: Option<&str>,
    ) -> Result<EventType> {
        let mut new = NewEventType::new(category, state);
        if let Some(description) = description {
            new = new.description(description);
        }
        self.add_event_type(new).await
    }

    /// Create an event type. Duplicate `(category, state)` pairs are a conflict.
    pub async fn add_event_type(&self, new: NewEventType) -> Result<EventType> {
        let category = new.category.trim();
        let state = new.state.trim();
        if category.is_empty() || state.is_empty() {
            return Err(Error::validation("category and state are required"));
        }

        let event_type: EventType = sqlx::query_as(&format!(
            "INSERT INTO event_types (category, state, description, restricted)
             VALUES ($1, $2, $3, $4)
             RETURNING {EVENT_TYPE_COLUMNS}"
        ))
        .bind(category)
        .bind(state)
        .bind(new.description.as_deref())
        .bind(new.restricted)
        .fetch_one(&self.pool)
        .await?;

        info!(
            id = %event_type.id,
            %event_type,
            restricted = event_type.restricted,
            "event type created"
        );
        Ok(event_type)
    }

    /// Get an event type by ID.
    pub async fn get_event_type(&self, id: EventTypeId) -> Result<EventType> {
        let mut conn = self.pool.acquire().await?;
        event_type_on(&mut conn, id).await
    }

    /// Look up an event type by its `(category, state)` pair.
    pub async fn find_event_type(&self, category: &str, state: &str) -> Result<Option<EventType>> {
        let event_type = sqlx::query_as(&format!(
            "SELECT {EVENT_TYPE_COLUMNS} FROM event_types WHERE category = $1 AND state = $2"
        ))
        .bind(category)
        .bind(state)
        .fetch_optional(&self.pool)
        .await?;
        Ok(event_type)
    }

    /// List event types matching `filter`, ordered by id.
    pub async fn list_event_types(&self, filter: &EventTypeFilter) -> Result<Vec<EventType>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {EVENT_TYPE_COLUMNS} FROM event_types WHERE 1 = 1"
        ));
        if let Some(ref category) = filter.category {
            qb.push(" AND category = ").push_bind(category.as_str());
        }
        if let Some(ref state) = filter.state {
            qb.push(" AND state = ").push_bind(state.as_str());
        }
        if filter.starting_only {
            qb.push(" AND id IN (SELECT creation_type_id FROM fates WHERE follows_id IS NULL)");
        }
        qb.push(" ORDER BY id");

        Ok(qb.build_query_as().fetch_all(&self.pool).await?)
    }

    /// Replace an event type's description. The only mutable attribute.
    pub async fn update_event_type_description(
        &self,
        id: EventTypeId,
        description: Option<&str>,
    ) -> Result<EventType> {
        let event_type: Option<EventType> = sqlx::query_as(&format!(
            "UPDATE event_types SET description = $1 WHERE id = $2 RETURNING {EVENT_TYPE_COLUMNS}"
        ))
        .bind(description)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let event_type = event_type.ok_or_else(|| Error::not_found("event type", id))?;
        info!(id = %id, "event type description updated");
        Ok(event_type)
    }
}

pub(crate) async fn event_type_on(
    conn: &mut SqliteConnection,
    id: EventTypeId,
) -> Result<EventType> {
    let event_type: Option<EventType> = sqlx::query_as(&format!(
        "SELECT {EVENT_TYPE_COLUMNS} FROM event_types WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    event_type.ok_or_else(|| Error::not_found("event type", id))
}

/// Resolve an event type named by id or by `(category, state)`.
pub(crate) async fn resolve_event_type_on(
    conn: &mut SqliteConnection,
    event_type: &EventTypeRef,
) -> Result<EventType> {
    match event_type {
        EventTypeRef::Id(id) => event_type_on(conn, *id).await,
        EventTypeRef::Named { category, state } => {
            let found: Option<EventType> = sqlx::query_as(&format!(
                "SELECT {EVENT_TYPE_COLUMNS} FROM event_types WHERE category = $1 AND state = $2"
            ))
            .bind(category.trim())
            .bind(state.trim())
            .fetch_optional(&mut *conn)
            .await?;
            found.ok_or_else(|| Error::not_found("event type", event_type))
        }
    }
}
