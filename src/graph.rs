//! Graph synchronizer: merges statement sets into a collection's graph.
//!
//! The diff computation (read existing objects, delete stale ones, insert
//! new ones) is not atomic against the underlying store, so every merge
//! holds the collection's lock from [`GraphLocks`] and runs its writes in
//! one transaction: either all computed deletes and inserts commit, or the
//! caller is told the update failed before any other store is touched.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::error::Result;
use crate::models::Statement;

/// Per-collection mutual exclusion for graph mutation.
///
/// Concurrent merges against different collections proceed in parallel;
/// merges against the same collection are serialized.
#[derive(Default)]
pub struct GraphLocks {
    inner: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl GraphLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_for(&self, collection_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.inner.lock().expect("graph lock registry poisoned");
        map.entry(collection_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Diff against the existing graph; single-valued predicates replace,
    /// multi-valued predicates append.
    Diff,
    /// Substitute the whole subgraph for every subject present in the new
    /// statement set. Used for full metadata replacement.
    Replace,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub inserted: u64,
    pub deleted: u64,
}

/// Merges `new_statements` into the collection's graph.
///
/// Diff mode, per statement `(s,p,o)`:
/// - multi-valued `p`: insert if absent, never remove prior objects;
/// - otherwise: delete every `(s,p,x)` where `x != o`, unless `(s,p,x)` is
///   itself re-asserted in `new_statements`; insert `(s,p,o)` if absent.
///
/// Idempotent: merging the same set twice leaves the graph unchanged.
pub async fn merge(
    pool: &SqlitePool,
    locks: &GraphLocks,
    collection_id: i64,
    new_statements: &[Statement],
    mode: MergeMode,
    multi_valued: &[String],
) -> Result<MergeStats> {
    let lock = locks.lock_for(collection_id);
    let _guard = lock.lock().await;

    let mut tx = pool.begin().await?;
    let mut stats = MergeStats::default();

    match mode {
        MergeMode::Replace => {
            let subjects: HashSet<&str> =
                new_statements.iter().map(|s| s.subject.as_str()).collect();
            for subject in subjects {
                let res = sqlx::query(
                    "DELETE FROM statements WHERE collection_id = ? AND subject = ?",
                )
                .bind(collection_id)
                .bind(subject)
                .execute(&mut *tx)
                .await?;
                stats.deleted += res.rows_affected();
            }
            for stmt in new_statements {
                stats.inserted += insert_ignore(&mut tx, collection_id, stmt).await?;
            }
        }
        MergeMode::Diff => {
            let asserted: HashSet<&Statement> = new_statements.iter().collect();

            for stmt in new_statements {
                if multi_valued.iter().any(|p| p == &stmt.predicate) {
                    stats.inserted += insert_ignore(&mut tx, collection_id, stmt).await?;
                    continue;
                }

                let rows = sqlx::query(
                    "SELECT object FROM statements WHERE collection_id = ? AND subject = ? AND predicate = ?",
                )
                .bind(collection_id)
                .bind(&stmt.subject)
                .bind(&stmt.predicate)
                .fetch_all(&mut *tx)
                .await?;

                let mut already_present = false;
                for row in &rows {
                    let object: String = row.get("object");
                    if object == stmt.object {
                        already_present = true;
                        continue;
                    }
                    let shadow =
                        Statement::new(stmt.subject.clone(), stmt.predicate.clone(), object.clone());
                    // A fact present in both graphs is not stale
                    if asserted.contains(&shadow) {
                        continue;
                    }
                    let res = sqlx::query(
                        "DELETE FROM statements WHERE collection_id = ? AND subject = ? AND predicate = ? AND object = ?",
                    )
                    .bind(collection_id)
                    .bind(&stmt.subject)
                    .bind(&stmt.predicate)
                    .bind(&object)
                    .execute(&mut *tx)
                    .await?;
                    stats.deleted += res.rows_affected();
                }

                if !already_present {
                    stats.inserted += insert_ignore(&mut tx, collection_id, stmt).await?;
                }
            }
        }
    }

    tx.commit().await?;
    debug!(
        collection_id,
        inserted = stats.inserted,
        deleted = stats.deleted,
        "graph merge committed"
    );
    Ok(stats)
}

async fn insert_ignore(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    collection_id: i64,
    stmt: &Statement,
) -> Result<u64> {
    let res = sqlx::query(
        "INSERT OR IGNORE INTO statements (collection_id, subject, predicate, object) VALUES (?, ?, ?, ?)",
    )
    .bind(collection_id)
    .bind(&stmt.subject)
    .bind(&stmt.predicate)
    .bind(&stmt.object)
    .execute(&mut **tx)
    .await?;
    Ok(res.rows_affected())
}

/// Triple-pattern query over a collection's graph. `None` components match
/// anything.
pub async fn query(
    pool: &SqlitePool,
    collection_id: i64,
    subject: Option<&str>,
    predicate: Option<&str>,
    object: Option<&str>,
) -> Result<Vec<Statement>> {
    let mut sql = String::from(
        "SELECT subject, predicate, object FROM statements WHERE collection_id = ?",
    );
    if subject.is_some() {
        sql.push_str(" AND subject = ?");
    }
    if predicate.is_some() {
        sql.push_str(" AND predicate = ?");
    }
    if object.is_some() {
        sql.push_str(" AND object = ?");
    }
    sql.push_str(" ORDER BY subject, predicate, object");

    let mut q = sqlx::query(&sql).bind(collection_id);
    if let Some(s) = subject {
        q = q.bind(s);
    }
    if let Some(p) = predicate {
        q = q.bind(p);
    }
    if let Some(o) = object {
        q = q.bind(o);
    }

    let rows = q.fetch_all(pool).await?;
    Ok(rows
        .iter()
        .map(|r| Statement::new(r.get::<String, _>("subject"), r.get::<String, _>("predicate"), r.get::<String, _>("object")))
        .collect())
}

/// Deletes every statement matching the pattern. `None` components match
/// anything. Returns the number of statements removed.
pub async fn delete_matching(
    pool: &SqlitePool,
    collection_id: i64,
    subject: Option<&str>,
    predicate: Option<&str>,
    object: Option<&str>,
) -> Result<u64> {
    let mut sql = String::from("DELETE FROM statements WHERE collection_id = ?");
    if subject.is_some() {
        sql.push_str(" AND subject = ?");
    }
    if predicate.is_some() {
        sql.push_str(" AND predicate = ?");
    }
    if object.is_some() {
        sql.push_str(" AND object = ?");
    }

    let mut q = sqlx::query(&sql).bind(collection_id);
    if let Some(s) = subject {
        q = q.bind(s);
    }
    if let Some(p) = predicate {
        q = q.bind(p);
    }
    if let Some(o) = object {
        q = q.bind(o);
    }

    let res = q.execute(pool).await?;
    Ok(res.rows_affected())
}
