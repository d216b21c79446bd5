//! Host registration and lookup.
//!
//! Hosts are created implicitly the first time an event names them.

use std::collections::HashSet;

use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::model::{Host, HostId};

impl super::Db {
    /// Register a host explicitly. An existing hostname is a conflict.
    pub async fn create_host(&self, hostname: &str) -> Result<Host> {
        let hostname = hostname.trim();
        if hostname.is_empty() {
            return Err(Error::validation("hostname must not be blank"));
        }

        let host: Host =
            sqlx::query_as("INSERT INTO hosts (hostname) VALUES ($1) RETURNING id, hostname")
                .bind(hostname)
                .fetch_one(&self.pool)
                .await?;

        info!(id = %host.id, hostname = %host.hostname, "host created");
        Ok(host)
    }

    pub async fn get_host(&self, id: HostId) -> Result<Host> {
        let host: Option<Host> = sqlx::query_as("SELECT id, hostname FROM hosts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        host.ok_or_else(|| Error::not_found("host", id))
    }

    pub async fn get_host_by_name(&self, hostname: &str) -> Result<Host> {
        let host: Option<Host> =
            sqlx::query_as("SELECT id, hostname FROM hosts WHERE hostname = $1")
                .bind(hostname.trim())
                .fetch_optional(&self.pool)
                .await?;
        host.ok_or_else(|| Error::not_found("host", hostname))
    }

    /// Rename a host. Its events and labors follow it.
    pub async fn rename_host(&self, hostname: &str, new_hostname: &str) -> Result<Host> {
        let new_hostname = new_hostname.trim();
        if new_hostname.is_empty() {
            return Err(Error::validation("hostname must not be blank"));
        }

        let host: Option<Host> = sqlx::query_as(
            "UPDATE hosts SET hostname = $1 WHERE hostname = $2 RETURNING id, hostname",
        )
        .bind(new_hostname)
        .bind(hostname.trim())
        .fetch_optional(&self.pool)
        .await?;
        let host = host.ok_or_else(|| Error::not_found("host", hostname))?;

        info!(id = %host.id, from = hostname, to = %host.hostname, "host renamed");
        Ok(host)
    }

    /// List hosts ordered by hostname.
    pub async fn list_hosts(&self) -> Result<Vec<Host>> {
        let hosts = sqlx::query_as("SELECT id, hostname FROM hosts ORDER BY hostname")
            .fetch_all(&self.pool)
            .await?;
        Ok(hosts)
    }
}

/// Trim and dedupe hostnames, preserving first-seen order.
pub(crate) fn normalize_hostnames(hostnames: &[String]) -> Result<Vec<String>> {
    if hostnames.is_empty() {
        return Err(Error::validation("at least one hostname is required"));
    }
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(hostnames.len());
    for name in hostnames {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::validation("hostname must not be blank"));
        }
        if seen.insert(name) {
            out.push(name.to_string());
        }
    }
    Ok(out)
}

/// Resolve hostnames to hosts, creating the missing ones.
///
/// Returns hosts in the order of the normalized input.
pub(crate) async fn ensure_hosts_on(
    conn: &mut SqliteConnection,
    hostnames: &[String],
) -> Result<Vec<Host>> {
    let names = normalize_hostnames(hostnames)?;

    for chunk in names.chunks(super::BIND_CHUNK) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("INSERT INTO hosts (hostname) ");
        qb.push_values(chunk, |mut row, name| {
            row.push_bind(name.as_str());
        });
        qb.push(" ON CONFLICT (hostname) DO NOTHING");
        let inserted = qb.build().execute(&mut *conn).await?.rows_affected();
        if inserted > 0 {
            debug!(inserted, "hosts auto-created");
        }
    }

    let mut hosts = hosts_by_name_on(conn, &names).await?;
    let position = |h: &Host| names.iter().position(|n| *n == h.hostname);
    hosts.sort_by_key(position);
    Ok(hosts)
}

/// Look up existing hosts by name. Unknown names are skipped.
pub(crate) async fn hosts_by_name_on(
    conn: &mut SqliteConnection,
    hostnames: &[String],
) -> Result<Vec<Host>> {
    let mut hosts = Vec::with_capacity(hostnames.len());
    for chunk in hostnames.chunks(super::BIND_CHUNK) {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT id, hostname FROM hosts WHERE hostname IN (");
        let mut list = qb.separated(", ");
        for name in chunk {
            list.push_bind(name.as_str());
        }
        list.push_unseparated(")");
        hosts.extend(qb.build_query_as::<Host>().fetch_all(&mut *conn).await?);
    }
    Ok(hosts)
}
