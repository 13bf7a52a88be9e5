//! End-to-end engine tests: import batches, collision handling, and
//! deletion cascades across the relational store, the statement graph, the
//! search index, and the filesystem.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use sqlx::SqlitePool;
use tempfile::TempDir;

use corpus_vault::cascade;
use corpus_vault::config::{Config, DbConfig, GraphConfig, ImportConfig, StorageConfig};
use corpus_vault::db;
use corpus_vault::error::VaultError;
use corpus_vault::graph::{self, GraphLocks};
use corpus_vault::index::ReindexQueue;
use corpus_vault::metadata::{self, CollectionUpsert, ContributionUpsert};
use corpus_vault::migrate;
use corpus_vault::models::{vocab, Collection, CollectionStatus, Contribution, Item};
use corpus_vault::pipeline;
use corpus_vault::resolve::NamingStrategy;

struct TestVault {
    pool: SqlitePool,
    locks: GraphLocks,
    config: Config,
    queue: ReindexQueue,
    worker: tokio::task::JoinHandle<()>,
    _tmp: TempDir,
}

async fn vault() -> TestVault {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();
    let config = Config {
        db: DbConfig {
            path: root.join("vault.sqlite"),
        },
        storage: StorageConfig {
            data_dir: root.join("data"),
            contrib_dir: root.join("contrib"),
            scratch_dir: root.join("scratch"),
        },
        graph: GraphConfig::default(),
        import: ImportConfig::default(),
    };
    fs::create_dir_all(&config.storage.data_dir).unwrap();
    fs::create_dir_all(&config.storage.contrib_dir).unwrap();
    fs::create_dir_all(&config.storage.scratch_dir).unwrap();

    let pool = db::connect_in_memory().await.unwrap();
    migrate::apply_schema(&pool).await.unwrap();
    let (queue, worker) = ReindexQueue::start(pool.clone());

    TestVault {
        pool,
        locks: GraphLocks::new(),
        config,
        queue,
        worker,
        _tmp: tmp,
    }
}

async fn make_collection(v: &TestVault, name: &str) -> Collection {
    metadata::upsert_collection(
        &v.pool,
        &v.locks,
        &v.config,
        CollectionUpsert {
            name: name.to_string(),
            owner: "tests@example.org".to_string(),
            status: CollectionStatus::Draft,
            is_private: false,
            title: Some("Test Collection".to_string()),
            abstract_text: None,
            additional: vec![],
        },
    )
    .await
    .unwrap()
}

async fn make_item(v: &TestVault, collection: &Collection, name: &str) -> Item {
    metadata::create_item(&v.pool, &v.locks, &v.config, &v.queue, collection, name)
        .await
        .unwrap()
}

async fn make_contribution(v: &TestVault, collection_name: &str, name: &str) -> Contribution {
    metadata::upsert_contribution(
        &v.pool,
        &v.locks,
        &v.config,
        ContributionUpsert {
            id: None,
            name: name.to_string(),
            collection_name: Some(collection_name.to_string()),
            owner: "jbh".to_string(),
            description: "field recordings".to_string(),
            abstract_text: "a batch of recordings".to_string(),
        },
    )
    .await
    .unwrap()
}

fn write_zip(path: &Path, entries: &[(&str, &str)]) {
    let file = fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    for (name, body) in entries {
        zip.start_file(*name, zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(body.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
}

async fn count(pool: &SqlitePool, sql: &str) -> i64 {
    sqlx::query_scalar(sql).fetch_one(pool).await.unwrap()
}

fn delimiter_strategy() -> NamingStrategy {
    NamingStrategy::parse("delimiter:-:1").unwrap()
}

/// Writes a small file and attaches it to the item outside any
/// contribution.
async fn attach_plain_document(v: &TestVault, collection: &Collection, item: &Item, name: &str) {
    let dir = v.config.storage.data_dir.join(&collection.name);
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, b"plain document body").unwrap();
    metadata::add_document(
        &v.pool, &v.locks, &v.config, &v.queue, item, name, &path, None, false,
    )
    .await
    .unwrap();
}

fn scratch_is_empty(config: &Config) -> bool {
    fs::read_dir(&config.storage.scratch_dir)
        .map(|mut d| d.next().is_none())
        .unwrap_or(true)
}

async fn import(
    v: &TestVault,
    collection: &Collection,
    contribution: &Contribution,
    zip_entries: &[(&str, &str)],
) -> Result<pipeline::BatchReport, VaultError> {
    let zip_path = v._tmp.path().join("upload.zip");
    write_zip(&zip_path, zip_entries);
    pipeline::stage_archive(&v.config, &collection.name, contribution.id, &zip_path)?;
    pipeline::run_import(
        &v.pool,
        &v.locks,
        &v.config,
        &v.queue,
        collection,
        contribution,
        &delimiter_strategy(),
    )
    .await
}

fn pending_archive(v: &TestVault, collection: &Collection, contribution: &Contribution) -> PathBuf {
    metadata::contribution_archive_path(&v.config, &collection.name, contribution.id)
}

#[tokio::test]
async fn test_delimiter_import_end_to_end() {
    let v = vault().await;
    let collection = make_collection(&v, "mava").await;
    let item = make_item(&v, &collection, "s203").await;
    let contribution = make_contribution(&v, "mava", "batch-one").await;

    let report = import(
        &v,
        &collection,
        &contribution,
        &[("s203-speaker.wav", "audio bytes")],
    )
    .await
    .unwrap();

    assert_eq!(report.persisted, 1);
    assert!(report.failures.is_empty());

    // Relational row
    assert_eq!(count(&v.pool, "SELECT COUNT(*) FROM documents").await, 1);
    let mapped = count(&v.pool, "SELECT COUNT(*) FROM contribution_mappings").await;
    assert_eq!(mapped, 1);

    // File placed under the contribution's working directory
    let placed = metadata::contribution_dir(&v.config, "mava", contribution.id)
        .join("s203-speaker.wav");
    assert_eq!(fs::read_to_string(&placed).unwrap(), "audio bytes");

    // Graph: item links to the document, document typed and identified
    let doc_uri = metadata::document_uri(&item.uri, "s203-speaker.wav");
    let links = graph::query(
        &v.pool,
        collection.id,
        Some(&item.uri),
        Some(vocab::HAS_DOCUMENT),
        None,
    )
    .await
    .unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].object, doc_uri);

    // Archive consumed, scratch cleaned
    assert!(!pending_archive(&v, &collection, &contribution).exists());
    assert!(scratch_is_empty(&v.config));

    // Index entry appears once the queue drains
    drop(v.queue);
    v.worker.await.unwrap();
    let hits = corpus_vault::search::search_items(&v.pool, "speaker", 10)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].handle, "mava:s203");
}

#[tokio::test]
async fn test_unresolved_entries_fail_whole_batch_and_keep_archive() {
    let v = vault().await;
    let collection = make_collection(&v, "mava").await;
    make_item(&v, &collection, "s203").await;
    let contribution = make_contribution(&v, "mava", "batch-bad").await;

    let err = import(
        &v,
        &collection,
        &contribution,
        &[
            ("s203-good.wav", "ok"),
            ("nosuch-a.wav", "no item"),
            ("missing-b.wav", "no item"),
        ],
    )
    .await
    .unwrap_err();

    match err {
        VaultError::ValidationFailed(failures) => {
            let names: Vec<&str> = failures.iter().map(|f| f.name.as_str()).collect();
            assert_eq!(names, vec!["nosuch-a.wav", "missing-b.wav"]);
        }
        other => panic!("expected ValidationFailed, got {:?}", other),
    }

    // Nothing persisted, and the archive stays so the user can fix item
    // naming and retry
    assert_eq!(count(&v.pool, "SELECT COUNT(*) FROM documents").await, 0);
    assert!(pending_archive(&v, &collection, &contribution).exists());
}

#[tokio::test]
async fn test_offset_and_whole_name_strategies_resolve() {
    let v = vault().await;
    let collection = make_collection(&v, "mava").await;
    make_item(&v, &collection, "s203").await;
    let contribution = make_contribution(&v, "mava", "batch-offset").await;

    let zip_path = v._tmp.path().join("upload.zip");
    write_zip(&zip_path, &[("s203extra.wav", "x")]);
    pipeline::stage_archive(&v.config, "mava", contribution.id, &zip_path).unwrap();

    let strategy = NamingStrategy::parse("offset:4").unwrap();
    let entries = pipeline::preview(&v.pool, &v.config, &collection, &contribution, &strategy)
        .await
        .unwrap();
    assert_eq!(entries[0].handle.as_deref(), Some("mava:s203"));

    // The delimiter strategy does not resolve the same entry
    let entries = pipeline::preview(
        &v.pool,
        &v.config,
        &collection,
        &contribution,
        &delimiter_strategy(),
    )
    .await
    .unwrap();
    assert!(entries[0].message.is_some());

    // whole-name matches the base name exactly
    write_zip(&zip_path, &[("s203.wav", "x")]);
    pipeline::stage_archive(&v.config, "mava", contribution.id, &zip_path).unwrap();
    let strategy = NamingStrategy::parse("whole-name").unwrap();
    let entries = pipeline::preview(&v.pool, &v.config, &collection, &contribution, &strategy)
        .await
        .unwrap();
    assert_eq!(entries[0].handle.as_deref(), Some("mava:s203"));
}

#[tokio::test]
async fn test_document_prefix_ambiguity_is_reported() {
    let v = vault().await;
    let collection = make_collection(&v, "mava").await;
    let a1 = make_item(&v, &collection, "a1").await;
    let a2 = make_item(&v, &collection, "a2").await;
    attach_plain_document(&v, &collection, &a1, "x.wav").await;
    attach_plain_document(&v, &collection, &a2, "x.wav").await;
    let contribution = make_contribution(&v, "mava", "batch-prefix").await;

    let zip_path = v._tmp.path().join("upload.zip");
    write_zip(&zip_path, &[("x.txt", "transcript")]);
    pipeline::stage_archive(&v.config, "mava", contribution.id, &zip_path).unwrap();

    let strategy = NamingStrategy::parse("document-prefix").unwrap();
    let entries = pipeline::preview(&v.pool, &v.config, &collection, &contribution, &strategy)
        .await
        .unwrap();

    let message = entries[0].message.as_deref().unwrap();
    assert!(message.contains("ambiguous"), "got: {}", message);
    assert!(message.contains("mava:a1"));
    assert!(message.contains("mava:a2"));
}

#[tokio::test]
async fn test_cross_contribution_collision_renames() {
    let v = vault().await;
    let collection = make_collection(&v, "mava").await;
    make_item(&v, &collection, "s203").await;
    let first = make_contribution(&v, "mava", "first").await;
    let second = make_contribution(&v, "mava", "second").await;

    import(&v, &collection, &first, &[("s203-rec.wav", "v1")])
        .await
        .unwrap();

    // A different contribution uploading the same name gets an owner suffix
    let report = import(&v, &collection, &second, &[("s203-rec.wav", "v2")])
        .await
        .unwrap();
    assert_eq!(report.persisted, 1);

    let names: std::collections::BTreeSet<String> =
        sqlx::query_scalar("SELECT file_name FROM documents")
            .fetch_all(&v.pool)
            .await
            .unwrap()
            .into_iter()
            .collect();
    assert_eq!(names.len(), 2);
    assert!(names.contains("s203-rec.wav"));
    assert!(names.contains(&format!("s203-rec-c{}.wav", second.id)));

    // The same contribution re-uploading replaces its own file in place
    import(&v, &collection, &first, &[("s203-rec.wav", "v3")])
        .await
        .unwrap();
    assert_eq!(count(&v.pool, "SELECT COUNT(*) FROM documents").await, 2);
    let placed = metadata::contribution_dir(&v.config, "mava", first.id).join("s203-rec.wav");
    assert_eq!(fs::read_to_string(&placed).unwrap(), "v3");
}

#[tokio::test]
async fn test_mid_batch_placing_failure_continues() {
    let v = vault().await;
    let collection = make_collection(&v, "mava").await;
    make_item(&v, &collection, "s1").await;
    make_item(&v, &collection, "s2").await;
    make_item(&v, &collection, "s3").await;
    let contribution = make_contribution(&v, "mava", "batch-broken").await;

    // Block entry 2's destination with a directory so the move fails
    let dest_dir = metadata::contribution_dir(&v.config, "mava", contribution.id);
    fs::create_dir_all(dest_dir.join("s2-b.wav")).unwrap();

    let report = import(
        &v,
        &collection,
        &contribution,
        &[
            ("s1-a.wav", "one"),
            ("s2-b.wav", "two"),
            ("s3-c.wav", "three"),
        ],
    )
    .await
    .unwrap();

    assert_eq!(report.persisted, 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].name, "s2-b.wav");

    // Entries 1 and 3 are fully persisted despite the failure in between
    assert_eq!(count(&v.pool, "SELECT COUNT(*) FROM documents").await, 2);
    assert!(!pending_archive(&v, &collection, &contribution).exists());
    assert!(scratch_is_empty(&v.config));
}

#[tokio::test]
async fn test_store_failure_during_persisting_is_recorded_per_entry() {
    let v = vault().await;
    let collection = make_collection(&v, "mava").await;
    make_item(&v, &collection, "s1").await;
    make_item(&v, &collection, "s2").await;
    make_item(&v, &collection, "s3").await;
    let contribution = make_contribution(&v, "mava", "batch-flaky").await;

    // A trigger stands in for a store that fails mid-batch: entry 2's
    // document insert aborts after its file is already placed
    sqlx::query(
        r#"
        CREATE TRIGGER reject_s2 BEFORE INSERT ON documents
        WHEN NEW.file_name = 's2-b.wav'
        BEGIN SELECT RAISE(ABORT, 'simulated store outage'); END
        "#,
    )
    .execute(&v.pool)
    .await
    .unwrap();

    let report = import(
        &v,
        &collection,
        &contribution,
        &[
            ("s1-a.wav", "one"),
            ("s2-b.wav", "two"),
            ("s3-c.wav", "three"),
        ],
    )
    .await
    .unwrap();

    assert_eq!(report.persisted, 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].name, "s2-b.wav");
    assert!(report.failures[0].reason.contains("simulated store outage"));

    // The store failure never threw past the pipeline, and cleanup ran
    assert_eq!(count(&v.pool, "SELECT COUNT(*) FROM documents").await, 2);
    assert!(!pending_archive(&v, &collection, &contribution).exists());
    assert!(scratch_is_empty(&v.config));
}

#[tokio::test]
async fn test_batch_with_zero_persisted_is_an_error() {
    let v = vault().await;
    let collection = make_collection(&v, "mava").await;
    make_item(&v, &collection, "s1").await;
    let contribution = make_contribution(&v, "mava", "batch-hopeless").await;

    let dest_dir = metadata::contribution_dir(&v.config, "mava", contribution.id);
    fs::create_dir_all(dest_dir.join("s1-a.wav")).unwrap();

    let err = import(&v, &collection, &contribution, &[("s1-a.wav", "one")])
        .await
        .unwrap_err();
    match err {
        VaultError::Partial {
            persisted,
            failures,
        } => {
            assert_eq!(persisted, 0);
            assert_eq!(failures.len(), 1);
        }
        other => panic!("expected Partial, got {:?}", other),
    }
}

#[tokio::test]
async fn test_preview_moves_and_persists_nothing() {
    let v = vault().await;
    let collection = make_collection(&v, "mava").await;
    make_item(&v, &collection, "s203").await;
    let contribution = make_contribution(&v, "mava", "batch-preview").await;

    let zip_path = v._tmp.path().join("upload.zip");
    write_zip(&zip_path, &[("s203-speaker.wav", "audio")]);
    pipeline::stage_archive(&v.config, "mava", contribution.id, &zip_path).unwrap();

    let entries = pipeline::preview(
        &v.pool,
        &v.config,
        &collection,
        &contribution,
        &delimiter_strategy(),
    )
    .await
    .unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].message.is_none());

    assert_eq!(count(&v.pool, "SELECT COUNT(*) FROM documents").await, 0);

    // Only the staged archive lives in the working directory
    let dir = metadata::contribution_dir(&v.config, "mava", contribution.id);
    let names: Vec<String> = fs::read_dir(&dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec![format!("import_{}.zip", contribution.id)]);
}

#[tokio::test]
async fn test_collection_cascade_removes_all_stores() {
    let v = vault().await;
    let collection = make_collection(&v, "mava").await;
    let i1 = make_item(&v, &collection, "s1").await;
    let i2 = make_item(&v, &collection, "s2").await;
    attach_plain_document(&v, &collection, &i1, "one.txt").await;
    attach_plain_document(&v, &collection, &i2, "two.txt").await;
    let contribution = make_contribution(&v, "mava", "goes-with-it").await;
    import(&v, &collection, &contribution, &[("s1-extra.wav", "bytes")])
        .await
        .unwrap();

    let removed = cascade::delete_collection(&v.pool, &v.locks, &v.config, &collection)
        .await
        .unwrap();
    assert_eq!(removed, 2);

    assert_eq!(count(&v.pool, "SELECT COUNT(*) FROM collections").await, 0);
    assert_eq!(count(&v.pool, "SELECT COUNT(*) FROM items").await, 0);
    assert_eq!(count(&v.pool, "SELECT COUNT(*) FROM documents").await, 0);
    assert_eq!(count(&v.pool, "SELECT COUNT(*) FROM contributions").await, 0);
    assert_eq!(count(&v.pool, "SELECT COUNT(*) FROM statements").await, 0);
    assert_eq!(count(&v.pool, "SELECT COUNT(*) FROM items_fts").await, 0);
    assert!(!v.config.storage.data_dir.join("mava").exists());
    // Contribution working directories go with the collection, not just
    // their rows
    assert!(!v.config.storage.contrib_dir.join("mava").exists());
}

#[tokio::test]
async fn test_contribution_delete_cascades_only_its_documents() {
    let v = vault().await;
    let collection = make_collection(&v, "mava").await;
    let s1 = make_item(&v, &collection, "s1").await;
    let s2 = make_item(&v, &collection, "s2").await;
    attach_plain_document(&v, &collection, &s2, "keeper.txt").await;
    let contribution = make_contribution(&v, "mava", "doomed").await;

    import(&v, &collection, &contribution, &[("s1-a.wav", "bytes")])
        .await
        .unwrap();
    assert_eq!(count(&v.pool, "SELECT COUNT(*) FROM documents").await, 2);

    let removed = cascade::delete_contribution(
        &v.pool,
        &v.locks,
        &v.config,
        &v.queue,
        &collection,
        &contribution,
    )
    .await
    .unwrap();
    assert_eq!(removed, 1);

    // The contribution's document and working directory are gone; the
    // collection-level document and both items survive
    assert_eq!(count(&v.pool, "SELECT COUNT(*) FROM contributions").await, 0);
    assert_eq!(count(&v.pool, "SELECT COUNT(*) FROM documents").await, 1);
    assert_eq!(count(&v.pool, "SELECT COUNT(*) FROM items").await, 2);
    assert!(!metadata::contribution_dir(&v.config, "mava", contribution.id).exists());

    let kept = metadata::documents_of_item(&v.pool, s2.id).await.unwrap();
    assert_eq!(kept[0].file_name, "keeper.txt");
    assert!(metadata::documents_of_item(&v.pool, s1.id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_item_delete_scrubs_graph_and_index() {
    let v = vault().await;
    let collection = make_collection(&v, "mava").await;
    let item = make_item(&v, &collection, "s1").await;
    attach_plain_document(&v, &collection, &item, "a.txt").await;

    cascade::delete_item(&v.pool, &v.locks, &collection, &item)
        .await
        .unwrap();

    // No statement mentions the item as subject or object anymore
    let as_subject = graph::query(&v.pool, collection.id, Some(&item.uri), None, None)
        .await
        .unwrap();
    assert!(as_subject.is_empty());
    let as_object = graph::query(&v.pool, collection.id, None, None, Some(&item.uri))
        .await
        .unwrap();
    assert!(as_object.is_empty());
    assert_eq!(count(&v.pool, "SELECT COUNT(*) FROM items_fts").await, 0);

    // The collection's own metadata is untouched
    let remaining = graph::query(&v.pool, collection.id, Some(&collection.uri), None, None)
        .await
        .unwrap();
    assert!(!remaining.is_empty());
}

#[tokio::test]
async fn test_duplicate_contribution_name_is_a_conflict() {
    let v = vault().await;
    make_collection(&v, "mava").await;
    make_contribution(&v, "mava", "taken").await;

    let err = metadata::upsert_contribution(
        &v.pool,
        &v.locks,
        &v.config,
        ContributionUpsert {
            id: None,
            name: "taken".to_string(),
            collection_name: Some("mava".to_string()),
            owner: "someone".to_string(),
            description: String::new(),
            abstract_text: String::new(),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, VaultError::Conflict(_)));
}
