//! Keyword search over the item index.
//!
//! Thin query layer used by the CLI; index maintenance lives in
//! [`crate::index`].

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

/// A search hit: one item, ranked by bm25.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub item_id: i64,
    pub handle: String,
    pub score: f64,
    pub snippet: String,
}

pub async fn search_items(pool: &SqlitePool, query: &str, limit: i64) -> Result<Vec<SearchHit>> {
    let rows = sqlx::query(
        r#"
        SELECT item_id, handle,
               bm25(items_fts) AS rank,
               snippet(items_fts, 2, '[', ']', '…', 12) AS snippet
        FROM items_fts
        WHERE items_fts MATCH ?
        ORDER BY rank
        LIMIT ?
        "#,
    )
    .bind(query)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| {
            let rank: f64 = row.get("rank");
            SearchHit {
                item_id: row.get("item_id"),
                handle: row.get("handle"),
                // bm25 returns lower-is-better negative ranks
                score: -rank,
                snippet: row.get("snippet"),
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_search_finds_reindexed_item() {
        let pool = crate::db::connect_in_memory().await.unwrap();
        crate::migrate::apply_schema(&pool).await.unwrap();
        sqlx::query(
            "INSERT INTO collections (name, uri, created_at, updated_at) VALUES ('mava', 'urn:mava', 0, 0)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO items (collection_id, name, handle, uri) VALUES (1, 's203', 'mava:s203', 'urn:mava/s203')",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO documents (item_id, file_name, file_path) VALUES (1, 'interview.wav', '/x')",
        )
        .execute(&pool)
        .await
        .unwrap();
        crate::index::reindex(&pool, 1).await.unwrap();

        let hits = search_items(&pool, "interview", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].handle, "mava:s203");
    }
}
