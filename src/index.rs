//! Search index maintenance.
//!
//! The index holds one FTS row per item, derived from the item, its
//! documents, and its graph statements. Entries are only ever rebuilt by
//! delete-then-reinsert, and the rebuild always reads current store state
//! at execution time, never a payload captured at dispatch time. That makes
//! reindexing idempotent and tolerant of at-least-once, out-of-order
//! delivery.

use sqlx::{Row, SqlitePool};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::error::Result;
use crate::graph;

/// Removes the item's index entry. Safe to call for items that were never
/// indexed or no longer exist.
pub async fn delete_entry(pool: &SqlitePool, item_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM items_fts WHERE item_id = ?")
        .bind(item_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Rebuilds the item's index entry from current relational and graph state.
///
/// If the item no longer exists, the entry is deleted and the request is
/// considered satisfied (a delete raced ahead of this rebuild).
pub async fn reindex(pool: &SqlitePool, item_id: i64) -> Result<()> {
    let item_row = sqlx::query(
        "SELECT id, collection_id, name, handle, uri FROM items WHERE id = ?",
    )
    .bind(item_id)
    .fetch_optional(pool)
    .await?;

    let item_row = match item_row {
        Some(row) => row,
        None => {
            delete_entry(pool, item_id).await?;
            debug!(item_id, "reindex skipped, item gone");
            return Ok(());
        }
    };

    let collection_id: i64 = item_row.get("collection_id");
    let name: String = item_row.get("name");
    let handle: String = item_row.get("handle");
    let uri: String = item_row.get("uri");

    let doc_rows = sqlx::query("SELECT file_name FROM documents WHERE item_id = ?")
        .bind(item_id)
        .fetch_all(pool)
        .await?;

    let mut body_parts: Vec<String> = vec![name, handle.clone()];
    for row in &doc_rows {
        body_parts.push(row.get("file_name"));
    }
    for stmt in graph::query(pool, collection_id, Some(&uri), None, None).await? {
        body_parts.push(stmt.object);
    }
    let body = body_parts.join(" ");

    // Delete-then-insert inside one transaction so no window ever shows two
    // entries for the same handle
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM items_fts WHERE item_id = ?")
        .bind(item_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("INSERT INTO items_fts (item_id, handle, body) VALUES (?, ?, ?)")
        .bind(item_id)
        .bind(&handle)
        .bind(&body)
        .execute(&mut *tx)
        .await?;
    sqlx::query("UPDATE items SET indexed_at = strftime('%s','now') WHERE id = ?")
        .bind(item_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    debug!(item_id, handle = %handle, "item reindexed");
    Ok(())
}

/// Marks the item stale and removes its entry; the actual rebuild is left
/// to a queued reindex request.
pub async fn invalidate(pool: &SqlitePool, item_id: i64) -> Result<()> {
    delete_entry(pool, item_id).await?;
    sqlx::query("UPDATE items SET indexed_at = NULL WHERE id = ?")
        .bind(item_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[derive(Debug, Clone, Copy)]
pub struct ReindexRequest {
    pub item_id: i64,
}

/// Handle for dispatching asynchronous reindex requests.
///
/// Dropping every clone closes the channel; the worker then drains what is
/// queued and exits, so `worker.await` after dropping the queue flushes all
/// pending rebuilds.
#[derive(Clone)]
pub struct ReindexQueue {
    tx: mpsc::UnboundedSender<ReindexRequest>,
}

impl ReindexQueue {
    /// Spawns the single consumer task and returns the queue handle plus
    /// the worker's join handle.
    pub fn start(pool: SqlitePool) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<ReindexRequest>();
        let worker = tokio::spawn(async move {
            while let Some(req) = rx.recv().await {
                if let Err(e) = reindex(&pool, req.item_id).await {
                    error!(item_id = req.item_id, error = %e, "reindex failed");
                }
            }
        });
        (ReindexQueue { tx }, worker)
    }

    pub fn enqueue(&self, item_id: i64) {
        if self.tx.send(ReindexRequest { item_id }).is_err() {
            error!(item_id, "reindex worker is gone, request dropped");
        }
    }
}
