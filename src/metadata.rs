//! Metadata upsert: canonical relational records and their mirrored graph
//! representation.
//!
//! Every create/update here writes the relational row first (the
//! authoritative state), then merges the entity's subgraph through the
//! graph synchronizer, then invalidates the search index where item state
//! changed. A graph failure surfaces before any index mutation so callers
//! never mark stores consistent past a failed merge.

use std::path::{Path, PathBuf};

use chrono::Utc;
use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::collision::COLLECTION_OWNER;
use crate::config::Config;
use crate::error::{Result, VaultError};
use crate::graph::{self, GraphLocks, MergeMode};
use crate::index::{self, ReindexQueue};
use crate::models::{
    vocab, Collection, CollectionStatus, Contribution, Document, Item, Statement,
};

// ── URI minting ─────────────────────────────────────────────────────────

pub fn collection_uri(config: &Config, name: &str) -> String {
    format!("{}/{}", config.graph.base_uri, name)
}

pub fn item_uri(collection_uri: &str, item_name: &str) -> String {
    format!("{}/{}", collection_uri, item_name)
}

pub fn document_uri(item_uri: &str, file_name: &str) -> String {
    format!("{}/document/{}", item_uri, file_name)
}

pub fn contribution_uri(config: &Config, contribution_id: i64) -> String {
    format!("{}/contrib/{}", config.graph.base_uri, contribution_id)
}

// ── Filesystem layout ───────────────────────────────────────────────────

/// Working directory for a contribution:
/// `<contrib_dir>/<collection>/<contribution id>/`.
pub fn contribution_dir(config: &Config, collection_name: &str, contribution_id: i64) -> PathBuf {
    config
        .storage
        .contrib_dir
        .join(collection_name)
        .join(contribution_id.to_string())
}

/// Deterministic pending-archive path, so a re-upload overwrites the
/// previous pending archive instead of accumulating.
pub fn contribution_archive_path(
    config: &Config,
    collection_name: &str,
    contribution_id: i64,
) -> PathBuf {
    contribution_dir(config, collection_name, contribution_id)
        .join(format!("import_{}.zip", contribution_id))
}

// ── Row loading ─────────────────────────────────────────────────────────

fn collection_from_row(row: &sqlx::sqlite::SqliteRow) -> Collection {
    let status: String = row.get("status");
    Collection {
        id: row.get("id"),
        name: row.get("name"),
        uri: row.get("uri"),
        status: CollectionStatus::parse(&status).unwrap_or(CollectionStatus::Draft),
        is_private: row.get::<i64, _>("is_private") != 0,
        owner: row.get("owner"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn item_from_row(row: &sqlx::sqlite::SqliteRow) -> Item {
    Item {
        id: row.get("id"),
        collection_id: row.get("collection_id"),
        name: row.get("name"),
        handle: row.get("handle"),
        uri: row.get("uri"),
        indexed_at: row.get("indexed_at"),
    }
}

fn document_from_row(row: &sqlx::sqlite::SqliteRow) -> Document {
    Document {
        id: row.get("id"),
        item_id: row.get("item_id"),
        file_name: row.get("file_name"),
        file_path: row.get("file_path"),
        doc_type: row.get("doc_type"),
        mime_type: row.get("mime_type"),
        source_uri: row.get("source_uri"),
    }
}

fn contribution_from_row(row: &sqlx::sqlite::SqliteRow) -> Contribution {
    Contribution {
        id: row.get("id"),
        name: row.get("name"),
        collection_id: row.get("collection_id"),
        owner: row.get("owner"),
        description: row.get("description"),
        abstract_text: row.get("abstract_text"),
        created_at: row.get("created_at"),
    }
}

pub async fn find_collection_by_name(
    pool: &SqlitePool,
    name: &str,
) -> Result<Option<Collection>> {
    let row = sqlx::query("SELECT * FROM collections WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(collection_from_row))
}

pub async fn require_collection_by_name(pool: &SqlitePool, name: &str) -> Result<Collection> {
    find_collection_by_name(pool, name)
        .await?
        .ok_or_else(|| VaultError::NotFound(format!("collection '{}'", name)))
}

pub async fn require_collection_by_id(pool: &SqlitePool, id: i64) -> Result<Collection> {
    let row = sqlx::query("SELECT * FROM collections WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref()
        .map(collection_from_row)
        .ok_or_else(|| VaultError::NotFound(format!("collection {}", id)))
}

pub async fn find_item_by_handle(pool: &SqlitePool, handle: &str) -> Result<Option<Item>> {
    let row = sqlx::query("SELECT * FROM items WHERE handle = ?")
        .bind(handle)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(item_from_row))
}

pub async fn require_item_by_handle(pool: &SqlitePool, handle: &str) -> Result<Item> {
    find_item_by_handle(pool, handle)
        .await?
        .ok_or_else(|| VaultError::NotFound(format!("item '{}'", handle)))
}

pub async fn items_of_collection(pool: &SqlitePool, collection_id: i64) -> Result<Vec<Item>> {
    let rows = sqlx::query("SELECT * FROM items WHERE collection_id = ? ORDER BY handle")
        .bind(collection_id)
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(item_from_row).collect())
}

pub async fn documents_of_item(pool: &SqlitePool, item_id: i64) -> Result<Vec<Document>> {
    let rows = sqlx::query("SELECT * FROM documents WHERE item_id = ? ORDER BY file_name")
        .bind(item_id)
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(document_from_row).collect())
}

pub async fn find_contribution(pool: &SqlitePool, id: i64) -> Result<Option<Contribution>> {
    let row = sqlx::query("SELECT * FROM contributions WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(contribution_from_row))
}

pub async fn require_contribution(pool: &SqlitePool, id: i64) -> Result<Contribution> {
    find_contribution(pool, id)
        .await?
        .ok_or_else(|| VaultError::NotFound(format!("contribution {}", id)))
}

pub async fn find_contribution_by_name(
    pool: &SqlitePool,
    name: &str,
) -> Result<Option<Contribution>> {
    let row = sqlx::query("SELECT * FROM contributions WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(contribution_from_row))
}

/// The (file name, owner) pairs bound to an item, for collision
/// resolution. Documents that arrived through a contribution are owned by
/// that contribution's id; all others belong to the collection scope.
pub async fn item_bindings(pool: &SqlitePool, item_id: i64) -> Result<Vec<(String, String)>> {
    let rows = sqlx::query(
        r#"
        SELECT d.file_name AS file_name,
               COALESCE(CAST(m.contribution_id AS TEXT), ?) AS owner
        FROM documents d
        LEFT JOIN contribution_mappings m ON m.document_id = d.id
        WHERE d.item_id = ?
        "#,
    )
    .bind(COLLECTION_OWNER)
    .bind(item_id)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .iter()
        .map(|r| (r.get("file_name"), r.get("owner")))
        .collect())
}

// ── Media types ─────────────────────────────────────────────────────────

fn family_of(mime: &str) -> String {
    mime.split('/').next().unwrap_or("application").to_string()
}

/// Extension-based media type, for archive entries that are not yet on
/// disk.
pub fn media_type_for_name(file_name: &str) -> (String, String) {
    let ext = Path::new(file_name)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let mime = match ext.as_str() {
        "wav" => "audio/x-wav",
        "mp3" => "audio/mpeg",
        "flac" => "audio/flac",
        "mp4" => "video/mp4",
        "mkv" => "video/x-matroska",
        "txt" | "md" => "text/plain",
        "csv" => "text/csv",
        "xml" => "text/xml",
        "html" => "text/html",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "tif" | "tiff" => "image/tiff",
        _ => "application/octet-stream",
    };
    (mime.to_string(), family_of(mime))
}

/// Content-based media type with extension fallback.
pub fn media_type_for_file(path: &Path) -> (String, String) {
    if let Ok(Some(kind)) = infer::get_from_path(path) {
        let mime = kind.mime_type().to_string();
        let family = family_of(&mime);
        return (mime, family);
    }
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    media_type_for_name(&name)
}

// ── Additional metadata sanitation ──────────────────────────────────────

/// Structural keys and canonical fields that user-supplied "additional
/// metadata" may not override.
const PROTECTED_KEYS: &[&str] = &[
    "@id",
    "@type",
    "@context",
    "dc:identifier",
    "dcterms:identifier",
    vocab::DCT_IDENTIFIER,
    "dc:title",
    "dcterms:title",
    vocab::DCT_TITLE,
    "dc:abstract",
    "dcterms:abstract",
    vocab::DCT_ABSTRACT,
];

/// Validates and sanitises additional metadata pairs from ingest forms.
///
/// Blank key or blank value is a validation failure; protected keys are
/// silently dropped; repeated keys become multiple statements for the same
/// predicate (the merge keeps every value asserted in one set).
pub fn sanitize_additional(pairs: &[(String, String)]) -> Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    for (key, value) in pairs {
        let key: String = key.split_whitespace().collect();
        let value = value.trim().to_string();
        if key.is_empty() && value.is_empty() {
            continue;
        }
        if key.is_empty() {
            return Err(VaultError::ValidationFailed(vec![crate::error::EntryFailure {
                name: value,
                reason: "metadata field is missing a name".into(),
            }]));
        }
        if value.is_empty() {
            return Err(VaultError::ValidationFailed(vec![crate::error::EntryFailure {
                name: key,
                reason: "metadata field is missing a value".into(),
            }]));
        }
        if PROTECTED_KEYS.contains(&key.as_str()) {
            continue;
        }
        out.push((key, value));
    }
    Ok(out)
}

// ── Upserts ─────────────────────────────────────────────────────────────

/// Parameters for creating or updating a collection.
#[derive(Debug, Clone)]
pub struct CollectionUpsert {
    pub name: String,
    pub owner: String,
    pub status: CollectionStatus,
    pub is_private: bool,
    pub title: Option<String>,
    pub abstract_text: Option<String>,
    /// Extra (predicate, value) pairs; validated by
    /// [`sanitize_additional`].
    pub additional: Vec<(String, String)>,
}

/// Creates or updates the collection row and Replace-merges its subgraph.
pub async fn upsert_collection(
    pool: &SqlitePool,
    locks: &GraphLocks,
    config: &Config,
    params: CollectionUpsert,
) -> Result<Collection> {
    if params.name.is_empty() || params.name.len() > 255 {
        return Err(VaultError::ValidationFailed(vec![crate::error::EntryFailure {
            name: params.name.clone(),
            reason: "collection name must be 1-255 characters".into(),
        }]));
    }
    let additional = sanitize_additional(&params.additional)?;
    let now = Utc::now().timestamp();

    let collection = match find_collection_by_name(pool, &params.name).await? {
        Some(existing) => {
            sqlx::query(
                "UPDATE collections SET status = ?, is_private = ?, owner = ?, updated_at = ? WHERE id = ?",
            )
            .bind(params.status.as_str())
            .bind(params.is_private as i64)
            .bind(&params.owner)
            .bind(now)
            .bind(existing.id)
            .execute(pool)
            .await?;
            Collection {
                status: params.status,
                is_private: params.is_private,
                owner: params.owner.clone(),
                updated_at: now,
                ..existing
            }
        }
        None => {
            let uri = collection_uri(config, &params.name);
            let res = sqlx::query(
                "INSERT INTO collections (name, uri, status, is_private, owner, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&params.name)
            .bind(&uri)
            .bind(params.status.as_str())
            .bind(params.is_private as i64)
            .bind(&params.owner)
            .bind(now)
            .bind(now)
            .execute(pool)
            .await?;
            Collection {
                id: res.last_insert_rowid(),
                name: params.name.clone(),
                uri,
                status: params.status,
                is_private: params.is_private,
                owner: params.owner.clone(),
                created_at: now,
                updated_at: now,
            }
        }
    };

    let mut statements = vec![
        Statement::new(&collection.uri, vocab::RDF_TYPE, vocab::TYPE_COLLECTION),
        Statement::new(&collection.uri, vocab::DCT_IDENTIFIER, &collection.name),
    ];
    if let Some(title) = &params.title {
        statements.push(Statement::new(&collection.uri, vocab::DCT_TITLE, title));
    }
    if let Some(abstract_text) = &params.abstract_text {
        statements.push(Statement::new(
            &collection.uri,
            vocab::DCT_ABSTRACT,
            abstract_text,
        ));
    }
    for (predicate, value) in &additional {
        statements.push(Statement::new(&collection.uri, predicate, value));
    }

    // Full metadata replacement for the collection's own subject
    graph::merge(
        pool,
        locks,
        collection.id,
        &statements,
        MergeMode::Replace,
        &config.graph.multi_valued_predicates,
    )
    .await?;

    info!(collection = %collection.name, "collection upserted");
    Ok(collection)
}

/// Creates an item under the collection. The handle is immutable once
/// created; a duplicate handle is a conflict.
pub async fn create_item(
    pool: &SqlitePool,
    locks: &GraphLocks,
    config: &Config,
    queue: &ReindexQueue,
    collection: &Collection,
    item_name: &str,
) -> Result<Item> {
    let handle = Item::make_handle(&collection.name, item_name);
    if find_item_by_handle(pool, &handle).await?.is_some() {
        return Err(VaultError::Conflict(format!(
            "item handle '{}' already exists",
            handle
        )));
    }

    let uri = item_uri(&collection.uri, item_name);
    let res = sqlx::query(
        "INSERT INTO items (collection_id, name, handle, uri) VALUES (?, ?, ?, ?)",
    )
    .bind(collection.id)
    .bind(item_name)
    .bind(&handle)
    .bind(&uri)
    .execute(pool)
    .await?;
    let item_id = res.last_insert_rowid();

    graph::merge(
        pool,
        locks,
        collection.id,
        &[
            Statement::new(&uri, vocab::RDF_TYPE, vocab::TYPE_ITEM),
            Statement::new(&uri, vocab::DCT_IDENTIFIER, &handle),
        ],
        MergeMode::Diff,
        &config.graph.multi_valued_predicates,
    )
    .await?;

    queue.enqueue(item_id);
    Ok(Item {
        id: item_id,
        collection_id: collection.id,
        name: item_name.to_string(),
        handle,
        uri,
        indexed_at: None,
    })
}

/// Parameters for creating or updating a contribution.
#[derive(Debug, Clone)]
pub struct ContributionUpsert {
    /// `None` creates; `Some(id)` updates name/description/abstract.
    pub id: Option<i64>,
    pub name: String,
    /// Required on create, ignored on update (a contribution never moves
    /// between collections).
    pub collection_name: Option<String>,
    pub owner: String,
    pub description: String,
    pub abstract_text: String,
}

/// Creates or updates a contribution row, mirrors its metadata into the
/// collection graph, and on create prepares its working directory.
pub async fn upsert_contribution(
    pool: &SqlitePool,
    locks: &GraphLocks,
    config: &Config,
    params: ContributionUpsert,
) -> Result<Contribution> {
    if params.name.trim().is_empty() {
        return Err(VaultError::ValidationFailed(vec![crate::error::EntryFailure {
            name: "contribution name".into(),
            reason: "required field is missing".into(),
        }]));
    }

    let contribution = match params.id {
        None => {
            if find_contribution_by_name(pool, &params.name).await?.is_some() {
                return Err(VaultError::Conflict(format!(
                    "contribution name '{}' already been taken",
                    params.name
                )));
            }
            let collection_name = params.collection_name.as_deref().ok_or_else(|| {
                VaultError::ValidationFailed(vec![crate::error::EntryFailure {
                    name: "contribution collection".into(),
                    reason: "required field is missing".into(),
                }])
            })?;
            let collection = require_collection_by_name(pool, collection_name).await?;

            let now = Utc::now().timestamp();
            let res = sqlx::query(
                "INSERT INTO contributions (name, collection_id, owner, description, abstract_text, created_at) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&params.name)
            .bind(collection.id)
            .bind(&params.owner)
            .bind(&params.description)
            .bind(&params.abstract_text)
            .bind(now)
            .execute(pool)
            .await?;
            let id = res.last_insert_rowid();

            std::fs::create_dir_all(contribution_dir(config, &collection.name, id))?;

            Contribution {
                id,
                name: params.name.clone(),
                collection_id: collection.id,
                owner: params.owner.clone(),
                description: params.description.clone(),
                abstract_text: params.abstract_text.clone(),
                created_at: now,
            }
        }
        Some(id) => {
            let existing = require_contribution(pool, id).await?;
            if params.name != existing.name
                && find_contribution_by_name(pool, &params.name).await?.is_some()
            {
                return Err(VaultError::Conflict(format!(
                    "contribution name '{}' already been taken",
                    params.name
                )));
            }
            sqlx::query(
                "UPDATE contributions SET name = ?, description = ?, abstract_text = ? WHERE id = ?",
            )
            .bind(&params.name)
            .bind(&params.description)
            .bind(&params.abstract_text)
            .bind(id)
            .execute(pool)
            .await?;
            Contribution {
                name: params.name.clone(),
                description: params.description.clone(),
                abstract_text: params.abstract_text.clone(),
                ..existing
            }
        }
    };

    let uri = contribution_uri(config, contribution.id);
    let created = chrono::DateTime::from_timestamp(contribution.created_at, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_default();
    graph::merge(
        pool,
        locks,
        contribution.collection_id,
        &[
            Statement::new(&uri, vocab::RDF_TYPE, vocab::TYPE_CONTRIBUTION),
            Statement::new(&uri, vocab::DCT_IDENTIFIER, contribution.id.to_string()),
            Statement::new(&uri, vocab::DCT_TITLE, &contribution.name),
            Statement::new(&uri, vocab::DCT_ABSTRACT, &contribution.abstract_text),
            Statement::new(&uri, vocab::DCT_CREATOR, &contribution.owner),
            Statement::new(&uri, vocab::DCT_CREATED, created),
        ],
        MergeMode::Diff,
        &config.graph.multi_valued_predicates,
    )
    .await?;

    info!(contribution = %contribution.name, id = contribution.id, "contribution upserted");
    Ok(contribution)
}

/// Attaches a placed file to an item: document row, document subgraph plus
/// the item's multi-valued document link, contribution mapping, and index
/// invalidation.
///
/// With `overwrite` false an existing file name under the item is a
/// conflict; with `overwrite` true the same owner replaces its prior
/// upload in place and the existing mapping is kept.
#[allow(clippy::too_many_arguments)]
pub async fn add_document(
    pool: &SqlitePool,
    locks: &GraphLocks,
    config: &Config,
    queue: &ReindexQueue,
    item: &Item,
    file_name: &str,
    file_path: &Path,
    contribution_id: Option<i64>,
    overwrite: bool,
) -> Result<i64> {
    let (mime_type, doc_type) = media_type_for_file(file_path);
    let source_uri = format!("file://{}", file_path.display());

    let existing = sqlx::query("SELECT id FROM documents WHERE item_id = ? AND file_name = ?")
        .bind(item.id)
        .bind(file_name)
        .fetch_optional(pool)
        .await?;

    let document_id = match existing {
        Some(row) => {
            if !overwrite {
                return Err(VaultError::Conflict(format!(
                    "a file named {} is already in use by another document of item '{}'",
                    file_name, item.handle
                )));
            }
            let id: i64 = row.get("id");
            sqlx::query(
                "UPDATE documents SET file_path = ?, doc_type = ?, mime_type = ?, source_uri = ? WHERE id = ?",
            )
            .bind(file_path.to_string_lossy().as_ref())
            .bind(&doc_type)
            .bind(&mime_type)
            .bind(&source_uri)
            .bind(id)
            .execute(pool)
            .await?;
            id
        }
        None => {
            let res = sqlx::query(
                "INSERT INTO documents (item_id, file_name, file_path, doc_type, mime_type, source_uri) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(item.id)
            .bind(file_name)
            .bind(file_path.to_string_lossy().as_ref())
            .bind(&doc_type)
            .bind(&mime_type)
            .bind(&source_uri)
            .execute(pool)
            .await?;
            res.last_insert_rowid()
        }
    };

    let doc_uri = document_uri(&item.uri, file_name);
    graph::merge(
        pool,
        locks,
        item.collection_id,
        &[
            Statement::new(&doc_uri, vocab::RDF_TYPE, vocab::TYPE_DOCUMENT),
            Statement::new(&doc_uri, vocab::DCT_IDENTIFIER, file_name),
            Statement::new(&doc_uri, vocab::DCT_SOURCE, &source_uri),
            Statement::new(&doc_uri, vocab::DCT_TYPE, &doc_type),
            Statement::new(&doc_uri, vocab::DCT_TITLE, format!("{}#{}", file_name, doc_type)),
            Statement::new(&item.uri, vocab::HAS_DOCUMENT, &doc_uri),
        ],
        MergeMode::Diff,
        &config.graph.multi_valued_predicates,
    )
    .await?;

    // An overwrite keeps whatever mapping the original upload created
    if let (Some(contribution_id), false) = (contribution_id, overwrite) {
        sqlx::query(
            "INSERT OR IGNORE INTO contribution_mappings (contribution_id, item_id, document_id) VALUES (?, ?, ?)",
        )
        .bind(contribution_id)
        .bind(item.id)
        .bind(document_id)
        .execute(pool)
        .await?;
    }

    index::invalidate(pool, item.id).await?;
    queue.enqueue(item.id);

    info!(
        item = %item.handle,
        file = file_name,
        doc_type = %doc_type,
        overwrite,
        "document added"
    );
    Ok(document_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_drops_protected_and_folds_blanks() {
        let pairs = vec![
            ("dc:title".to_string(), "sneaky".to_string()),
            ("".to_string(), "".to_string()),
            ("urn:custom".to_string(), "  padded  ".to_string()),
        ];
        let out = sanitize_additional(&pairs).unwrap();
        assert_eq!(out, vec![("urn:custom".to_string(), "padded".to_string())]);
    }

    #[test]
    fn test_sanitize_rejects_blank_value() {
        let pairs = vec![("urn:custom".to_string(), "   ".to_string())];
        assert!(matches!(
            sanitize_additional(&pairs),
            Err(VaultError::ValidationFailed(_))
        ));
    }

    #[test]
    fn test_sanitize_strips_spaces_inside_keys() {
        let pairs = vec![("urn: custom ".to_string(), "v".to_string())];
        let out = sanitize_additional(&pairs).unwrap();
        assert_eq!(out[0].0, "urn:custom");
    }

    #[test]
    fn test_media_type_families() {
        assert_eq!(media_type_for_name("a.wav").1, "audio");
        assert_eq!(media_type_for_name("a.txt").1, "text");
        assert_eq!(media_type_for_name("a.unknownext").1, "application");
        assert_eq!(media_type_for_name("README").1, "application");
    }

    #[test]
    fn test_uri_shapes() {
        let c = "http://corpus-vault.dev/catalog/mava";
        let i = item_uri(c, "s203");
        assert_eq!(i, "http://corpus-vault.dev/catalog/mava/s203");
        assert_eq!(
            document_uri(&i, "a.wav"),
            "http://corpus-vault.dev/catalog/mava/s203/document/a.wav"
        );
    }
}
