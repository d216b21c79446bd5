//! Fate creation and rulebook reads.
//!
//! Reads go through the cached [`FateSnapshot`](crate::registry::FateSnapshot);
//! a committed create or description change invalidates it.

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::model::{EventTypeId, Fate, FateId, NewFate};
use crate::notice::NoticeKind;
use crate::registry::FATE_COLUMNS;

impl super::Db {
    /// Create a fate.
    ///
    /// Both event types must exist. A fate that follows another must start
    /// where that one completes: `follows.completion_type == creation_type`.
    pub async fn create_fate(&self, new: NewFate) -> Result<Fate> {
        let mut tx = self.pool.begin().await?;

        let found: Vec<EventTypeId> =
            sqlx::query_scalar("SELECT id FROM event_types WHERE id IN ($1, $2)")
                .bind(new.creation_type_id)
                .bind(new.completion_type_id)
                .fetch_all(&mut *tx)
                .await?;
        for id in [new.creation_type_id, new.completion_type_id] {
            if !found.contains(&id) {
                warn!(event_type_id = %id, "fate rejected: unknown event type");
                return Err(Error::validation(format!("event type {id} does not exist")));
            }
        }

        if let Some(follows) = new.follows_id {
            let parent: Option<EventTypeId> =
                sqlx::query_scalar("SELECT completion_type_id FROM fates WHERE id = $1")
                    .bind(follows)
                    .fetch_optional(&mut *tx)
                    .await?;
            match parent {
                None => {
                    warn!(follows = %follows, "fate rejected: unknown predecessor");
                    return Err(Error::validation(format!("followed fate {follows} does not exist")));
                }
                Some(completion) if completion != new.creation_type_id => {
                    warn!(follows = %follows, "fate rejected: chain hand-off mismatch");
                    return Err(Error::validation(format!(
                        "fate {follows} completes with event type {completion}, \
                         which is not this fate's creation type {}",
                        new.creation_type_id
                    )));
                }
                Some(_) => {}
            }
        }

        let fate: Fate = sqlx::query_as(&format!(
            "INSERT INTO fates
                (creation_type_id, completion_type_id, follows_id, description, for_owner, for_creator)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {FATE_COLUMNS}"
        ))
        .bind(new.creation_type_id)
        .bind(new.completion_type_id)
        .bind(new.follows_id)
        .bind(&new.description)
        .bind(new.for_owner)
        .bind(new.for_creator)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        self.fates.invalidate();
        self.notifier.publish(NoticeKind::FateCreated { fate_id: fate.id });

        info!(
            id = %fate.id,
            creation = %fate.creation_type_id,
            completion = %fate.completion_type_id,
            follows = ?fate.follows_id,
            for_owner = fate.for_owner,
            for_creator = fate.for_creator,
            "fate created"
        );
        Ok(fate)
    }

    /// Replace a fate's description. The rule itself never changes.
    pub async fn update_fate_description(
        &self,
        id: FateId,
        description: Option<&str>,
    ) -> Result<Fate> {
        let updated: Option<FateId> =
            sqlx::query_scalar("UPDATE fates SET description = $1 WHERE id = $2 RETURNING id")
                .bind(description)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        let id = updated.ok_or_else(|| Error::not_found("fate", id))?;

        self.fates.invalidate();
        info!(id = %id, "fate description updated");
        self.get_fate(id).await
    }

    /// Get a fate by ID, with `precedes` filled in.
    pub async fn get_fate(&self, id: FateId) -> Result<Fate> {
        let snapshot = self.fates.snapshot(&self.pool).await?;
        snapshot
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found("fate", id))
    }

    /// Every fate, ordered by id.
    pub async fn all_fates(&self) -> Result<Vec<Fate>> {
        let snapshot = self.fates.snapshot(&self.pool).await?;
        Ok(snapshot.all().to_vec())
    }

    /// Fates that follow nothing: the ones an event can open a chain with.
    pub async fn starting_fates(&self) -> Result<Vec<Fate>> {
        let snapshot = self.fates.snapshot(&self.pool).await?;
        Ok(snapshot.starting().cloned().collect())
    }

    pub async fn intermediate_fates(&self) -> Result<Vec<Fate>> {
        let snapshot = self.fates.snapshot(&self.pool).await?;
        Ok(snapshot.intermediate().cloned().collect())
    }
}
