//! Database handle, migrations, and health check.
//!
//! `Db` owns the connection pool, the fate registry and the notice
//! publisher. Operations are split across the submodules by component;
//! each public operation runs in a single transaction and publishes its
//! notices only after commit.
//!
//! Helpers named `*_on` take a `&mut SqliteConnection` so they work both on
//! a pooled connection and inside a transaction.

pub mod event_types;
pub mod events;
pub mod fates;
pub mod hosts;
pub mod labors;
pub mod matching;
pub mod quests;

use std::collections::BTreeSet;
use std::str::FromStr;
use std::time::Duration;

use secrecy::ExposeSecret;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use tokio::sync::broadcast;

use crate::config::{Config, DEFAULT_MAX_CONNECTIONS, DEFAULT_NOTICE_CAPACITY};
use crate::error::{Error, Result};
use crate::model::{BatchId, Event};
use crate::notice::{Notice, NoticeKind, Notifier};
use crate::registry::FateRegistry;

pub use matching::MatchOutcome;
pub use quests::QuestCompletion;

/// Rows per multi-row statement. Keeps bind counts well under SQLite's limit.
pub(crate) const BIND_CHUNK: usize = 200;

/// Database handle. Owns the pool and the state shared across operations.
pub struct Db {
    pool: SqlitePool,
    fates: FateRegistry,
    notifier: Notifier,
}

impl Db {
    /// Connect to a SQLite database file, creating it if missing.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_options(url, DEFAULT_MAX_CONNECTIONS, DEFAULT_NOTICE_CAPACITY).await
    }

    /// Connect using a loaded [`Config`].
    pub async fn connect_with_config(config: &Config) -> Result<Self> {
        Self::connect_with_options(
            config.database_url.expose_secret(),
            config.max_connections,
            config.notice_capacity,
        )
        .await
    }

    async fn connect_with_options(
        url: &str,
        max_connections: u32,
        notice_capacity: usize,
    ) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;
        Ok(Self::from_pool(pool, notice_capacity))
    }

    /// Migrated in-memory database (for tests and dry runs).
    ///
    /// An in-memory SQLite database lives and dies with its connection, so
    /// the pool holds exactly one connection and never recycles it.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let db = Self::from_pool(pool, DEFAULT_NOTICE_CAPACITY);
        db.migrate().await?;
        Ok(db)
    }

    fn from_pool(pool: SqlitePool, notice_capacity: usize) -> Self {
        Self {
            pool,
            fates: FateRegistry::new(),
            notifier: Notifier::new(notice_capacity),
        }
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Other(format!("migration failed: {e}")))?;
        Ok(())
    }

    /// Simple health check: run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Subscribe to notices published after each committed change.
    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.notifier.subscribe()
    }

    /// The cached rulebook.
    pub fn fate_registry(&self) -> &FateRegistry {
        &self.fates
    }

    /// Publish the notices for a committed batch of events.
    ///
    /// Always publishes at least `EventsRecorded`.
    pub(crate) fn publish_batch(
        &self,
        events: &[Event],
        batch_id: Option<&BatchId>,
        outcome: &MatchOutcome,
    ) {
        self.notifier.publish(NoticeKind::EventsRecorded {
            batch_id: batch_id.cloned(),
            event_ids: events.iter().map(|e| e.id).collect(),
        });
        if !outcome.opened.is_empty() {
            self.notifier.publish(NoticeKind::LaborsOpened {
                labor_ids: outcome.opened.iter().map(|l| l.id).collect(),
            });
        }
        if !outcome.completed.is_empty() {
            self.notifier.publish(NoticeKind::LaborsCompleted {
                labor_ids: outcome.completed.iter().map(|l| l.id).collect(),
            });
        }
        self.notifier
            .publish_all(outcome.completed_quests.iter().map(|c| c.notice()));
    }
}

/// Fail with `NotFound` unless every id exists in `table`.
pub(crate) async fn ensure_ids_exist_on(
    conn: &mut SqliteConnection,
    table: &'static str,
    kind: &'static str,
    ids: impl IntoIterator<Item = i64>,
) -> Result<()> {
    let wanted: BTreeSet<i64> = ids.into_iter().collect();
    let wanted: Vec<i64> = wanted.into_iter().collect();

    for chunk in wanted.chunks(BIND_CHUNK) {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT id FROM {table} WHERE id IN ("));
        let mut list = qb.separated(", ");
        for id in chunk {
            list.push_bind(*id);
        }
        list.push_unseparated(")");

        let found: BTreeSet<i64> = qb
            .build_query_scalar::<i64>()
            .fetch_all(&mut *conn)
            .await?
            .into_iter()
            .collect();
        if let Some(missing) = chunk.iter().find(|id| !found.contains(*id)) {
            return Err(Error::not_found(kind, missing));
        }
    }
    Ok(())
}

/// Append `LIMIT`/`OFFSET` to a query under construction.
pub(crate) fn push_pagination(
    qb: &mut QueryBuilder<'_, Sqlite>,
    limit: Option<i64>,
    offset: Option<i64>,
) {
    match (limit, offset) {
        (None, None) => {}
        (limit, offset) => {
            qb.push(" LIMIT ").push_bind(limit.unwrap_or(-1));
            qb.push(" OFFSET ").push_bind(offset.unwrap_or(0));
        }
    }
}
