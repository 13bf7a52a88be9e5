//! Entity deletion cascade across all four representations.
//!
//! Order per entity: filesystem (log-and-continue), graph statements
//! (subject-anchored then object-anchored), search index entry, relational
//! record. The relational delete is the authoritative step; its failure
//! fails the cascade even though earlier steps ran best-effort.

use sqlx::{Row, SqlitePool};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::graph::{self, GraphLocks};
use crate::index::{self, ReindexQueue};
use crate::metadata::{self, contribution_archive_path, contribution_dir, document_uri};
use crate::models::{Collection, Contribution, Document, Item};

fn remove_file_best_effort(path: &str) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path, error = %e, "could not remove file, continuing cascade");
        }
    }
}

fn remove_dir_best_effort(path: &std::path::Path) {
    if let Err(e) = std::fs::remove_dir_all(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "could not remove directory, continuing cascade");
        }
    }
}

/// Removes the document's statements from its collection graph. Two
/// pattern deletes: the document as subject, then as object (the item's
/// document link).
async fn scrub_entity_statements(
    pool: &SqlitePool,
    locks: &GraphLocks,
    collection_id: i64,
    uri: &str,
) -> Result<u64> {
    let lock = locks.lock_for(collection_id);
    let _guard = lock.lock().await;

    let as_subject = graph::delete_matching(pool, collection_id, Some(uri), None, None).await?;
    let as_object = graph::delete_matching(pool, collection_id, None, None, Some(uri)).await?;
    Ok(as_subject + as_object)
}

/// Non-relational teardown shared by the document paths: file, statements,
/// parent item index entry.
async fn scrub_document(
    pool: &SqlitePool,
    locks: &GraphLocks,
    collection_id: i64,
    item: &Item,
    document: &Document,
) -> Result<()> {
    remove_file_best_effort(&document.file_path);

    let uri = document_uri(&item.uri, &document.file_name);
    let removed = scrub_entity_statements(pool, locks, collection_id, &uri).await?;
    info!(
        document = %document.file_name,
        statements = removed,
        "document statements removed"
    );

    index::delete_entry(pool, item.id).await?;
    Ok(())
}

/// Deletes a document everywhere, then queues a rebuild of the parent
/// item's index entry (it derives from document state).
pub async fn delete_document(
    pool: &SqlitePool,
    locks: &GraphLocks,
    queue: &ReindexQueue,
    collection: &Collection,
    item: &Item,
    document: &Document,
) -> Result<()> {
    scrub_document(pool, locks, collection.id, item, document).await?;

    sqlx::query("DELETE FROM documents WHERE id = ?")
        .bind(document.id)
        .execute(pool)
        .await?;

    queue.enqueue(item.id);
    info!(item = %item.handle, document = %document.file_name, "document deleted");
    Ok(())
}

/// Deletes an item and every child document. Files, statements, and index
/// entries go first for each document and for the item itself; the single
/// relational delete then cascades to the document rows.
pub async fn delete_item(
    pool: &SqlitePool,
    locks: &GraphLocks,
    collection: &Collection,
    item: &Item,
) -> Result<()> {
    for document in metadata::documents_of_item(pool, item.id).await? {
        scrub_document(pool, locks, collection.id, item, &document).await?;
    }

    scrub_entity_statements(pool, locks, collection.id, &item.uri).await?;
    index::delete_entry(pool, item.id).await?;

    sqlx::query("DELETE FROM items WHERE id = ?")
        .bind(item.id)
        .execute(pool)
        .await?;

    info!(item = %item.handle, "item deleted");
    Ok(())
}

/// Deletes a collection: one item cascade per item, then the remaining
/// graph wholesale, then the corpus and contribution directories and the
/// collection row.
pub async fn delete_collection(
    pool: &SqlitePool,
    locks: &GraphLocks,
    config: &Config,
    collection: &Collection,
) -> Result<usize> {
    let items = metadata::items_of_collection(pool, collection.id).await?;
    let item_count = items.len();
    for item in &items {
        delete_item(pool, locks, collection, item).await?;
    }

    // The graph is deleted wholesale only here
    let lock = locks.lock_for(collection.id);
    {
        let _guard = lock.lock().await;
        graph::delete_matching(pool, collection.id, None, None, None).await?;
    }

    remove_dir_best_effort(&config.storage.data_dir.join(&collection.name));
    // Contribution rows fall to the FK cascade on the collection row; their
    // working directories and pending archives live under the collection's
    // contrib tree and must go with it
    remove_dir_best_effort(&config.storage.contrib_dir.join(&collection.name));

    sqlx::query("DELETE FROM collections WHERE id = ?")
        .bind(collection.id)
        .execute(pool)
        .await?;

    info!(collection = %collection.name, items = item_count, "collection deleted");
    Ok(item_count)
}

/// Deletes a contribution: every document it brought in (full document
/// cascade each), its working directory and pending archive, its graph
/// statements, and finally its row. Returns the number of documents
/// removed.
pub async fn delete_contribution(
    pool: &SqlitePool,
    locks: &GraphLocks,
    config: &Config,
    queue: &ReindexQueue,
    collection: &Collection,
    contribution: &Contribution,
) -> Result<usize> {
    let rows = sqlx::query(
        r#"
        SELECT d.id AS document_id, i.handle AS handle
        FROM contribution_mappings m
        JOIN documents d ON d.id = m.document_id
        JOIN items i ON i.id = m.item_id
        WHERE m.contribution_id = ?
        "#,
    )
    .bind(contribution.id)
    .fetch_all(pool)
    .await?;

    let mut removed = 0usize;
    for row in &rows {
        let document_id: i64 = row.get("document_id");
        let handle: String = row.get("handle");
        let item = metadata::require_item_by_handle(pool, &handle).await?;
        let documents = metadata::documents_of_item(pool, item.id).await?;
        if let Some(document) = documents.into_iter().find(|d| d.id == document_id) {
            delete_document(pool, locks, queue, collection, &item, &document).await?;
            removed += 1;
        }
    }

    remove_file_best_effort(
        &contribution_archive_path(config, &collection.name, contribution.id)
            .to_string_lossy(),
    );
    remove_dir_best_effort(&contribution_dir(config, &collection.name, contribution.id));

    let uri = metadata::contribution_uri(config, contribution.id);
    scrub_entity_statements(pool, locks, collection.id, &uri).await?;

    sqlx::query("DELETE FROM contributions WHERE id = ?")
        .bind(contribution.id)
        .execute(pool)
        .await?;

    info!(
        contribution = %contribution.name,
        documents = removed,
        "contribution deleted"
    );
    Ok(removed)
}
