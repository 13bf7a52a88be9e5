//! # Corpus Vault CLI (`cvault`)
//!
//! The `cvault` binary is the operator interface for Corpus Vault. It
//! manages collections, items, documents, and contributions, runs bulk
//! imports of contribution archives, and queries the search index.
//!
//! ## Usage
//!
//! ```bash
//! cvault --config ./config/vault.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cvault init` | Create the SQLite database and run schema migrations |
//! | `cvault collection create <name>` | Create or update a collection |
//! | `cvault collection show <name>` | Print a collection and its items |
//! | `cvault collection delete <name>` | Delete a collection and everything in it |
//! | `cvault item add <collection> <name>` | Create an item |
//! | `cvault item delete <handle>` | Delete an item and its documents |
//! | `cvault document add <handle> <file>` | Attach a file to an item |
//! | `cvault document delete <handle> <file-name>` | Delete a document |
//! | `cvault contrib create <name>` | Create a contribution |
//! | `cvault contrib preview <id> <archive>` | Validate an archive without importing |
//! | `cvault contrib import <id> <archive>` | Import an archive |
//! | `cvault contrib delete <id>` | Delete a contribution and its documents |
//! | `cvault search "<query>"` | Keyword search over indexed items |

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use sqlx::SqlitePool;

use corpus_vault::cascade;
use corpus_vault::config::{self, Config};
use corpus_vault::db;
use corpus_vault::graph::GraphLocks;
use corpus_vault::index::ReindexQueue;
use corpus_vault::metadata::{self, CollectionUpsert, ContributionUpsert};
use corpus_vault::migrate;
use corpus_vault::models::CollectionStatus;
use corpus_vault::pipeline;
use corpus_vault::resolve::NamingStrategy;
use corpus_vault::search;

/// Corpus Vault CLI — a multi-store consistency and ingestion engine for
/// research-data collections.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/vault.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "cvault",
    about = "Corpus Vault — a multi-store consistency and ingestion engine for research-data collections",
    version,
    long_about = "Corpus Vault keeps a collection's four representations consistent: relational \
    records, a per-collection statement graph, a full-text search index, and corpus files on \
    disk. Bulk imports arrive as contribution archives whose entries are resolved to items by \
    configurable naming strategies."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/vault.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. This
    /// command is idempotent — running it multiple times is safe.
    Init,

    /// Manage collections.
    Collection {
        #[command(subcommand)]
        action: CollectionAction,
    },

    /// Manage items.
    Item {
        #[command(subcommand)]
        action: ItemAction,
    },

    /// Manage documents attached to items.
    Document {
        #[command(subcommand)]
        action: DocumentAction,
    },

    /// Manage contributions and archive imports.
    Contrib {
        #[command(subcommand)]
        action: ContribAction,
    },

    /// Keyword search over indexed items.
    Search {
        /// The search query string (FTS5 syntax).
        query: String,

        /// Maximum number of results to return.
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[derive(Subcommand)]
enum CollectionAction {
    /// Create a collection, or update one that already exists.
    Create {
        /// Collection name. Also the first half of every item handle.
        name: String,

        /// Owner identifier recorded on the collection.
        #[arg(long, default_value = "")]
        owner: String,

        /// Lifecycle status: `draft`, `released`, or `finalised`.
        #[arg(long, default_value = "draft")]
        status: String,

        /// Hide the collection from public listings.
        #[arg(long)]
        private: bool,

        /// Display title asserted into the collection graph.
        #[arg(long)]
        title: Option<String>,

        /// Abstract asserted into the collection graph.
        #[arg(long = "abstract")]
        abstract_text: Option<String>,

        /// Extra metadata as `predicate=value` pairs. Reserved predicates
        /// (identifier, type) are dropped silently.
        #[arg(long = "meta", value_parser = parse_key_val)]
        meta: Vec<(String, String)>,
    },

    /// Print a collection and the handles of its items.
    Show {
        name: String,
    },

    /// Delete a collection: every item, document, statement, index entry,
    /// and corpus file under it.
    Delete {
        name: String,
    },
}

#[derive(Subcommand)]
enum ItemAction {
    /// Create an item under a collection.
    Add {
        /// Collection name.
        collection: String,
        /// Item name; the handle becomes `<collection>:<name>`.
        name: String,
    },

    /// Delete an item and all of its documents.
    Delete {
        /// Item handle (`collection:item`).
        handle: String,
    },
}

#[derive(Subcommand)]
enum DocumentAction {
    /// Attach a file to an item.
    ///
    /// The file is copied into the collection's corpus directory, its
    /// metadata is asserted into the graph, and the item is reindexed.
    Add {
        /// Item handle (`collection:item`).
        handle: String,
        /// Path to the file to attach.
        file: PathBuf,
        /// Replace an existing document with the same file name.
        #[arg(long)]
        overwrite: bool,
    },

    /// Delete a document from an item.
    Delete {
        /// Item handle (`collection:item`).
        handle: String,
        /// File name of the document to delete.
        file_name: String,
    },
}

#[derive(Subcommand)]
enum ContribAction {
    /// Create a contribution scoped to a collection.
    Create {
        /// Contribution name, unique across the vault.
        name: String,

        /// Collection the contribution belongs to. Immutable once set.
        #[arg(long)]
        collection: String,

        /// Owner identifier recorded on the contribution.
        #[arg(long, default_value = "")]
        owner: String,

        #[arg(long, default_value = "")]
        description: String,

        #[arg(long = "abstract", default_value = "")]
        abstract_text: String,
    },

    /// Update a contribution's name, description, or abstract.
    Update {
        /// Contribution id.
        id: i64,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        description: Option<String>,

        #[arg(long = "abstract")]
        abstract_text: Option<String>,
    },

    /// Print a contribution and the documents it has brought in.
    Show {
        id: i64,
    },

    /// Stage an archive and report how each entry would import, without
    /// extracting or persisting anything.
    Preview {
        /// Contribution id.
        id: i64,

        /// Zip archive of documents. Staged as the pending archive; a later
        /// `import` without an archive argument picks it up.
        archive: PathBuf,

        /// Naming strategy override (`delimiter:<d>:<field>`, `offset:<n>`,
        /// `whole-name`, `document-prefix`). Defaults to the configured one.
        #[arg(long)]
        strategy: Option<String>,
    },

    /// Import an archive of documents into a contribution.
    Import {
        /// Contribution id.
        id: i64,

        /// Zip archive of documents. Omit to import a previously staged
        /// pending archive.
        archive: Option<PathBuf>,

        /// Naming strategy override. Defaults to the configured one.
        #[arg(long)]
        strategy: Option<String>,
    },

    /// Delete a contribution and every document it brought in.
    Delete {
        id: i64,
    },
}

/// Parse a `key=value` pair for `--meta` arguments.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn naming_strategy(cfg: &Config, flag: Option<&str>) -> anyhow::Result<NamingStrategy> {
    match flag {
        Some(s) => NamingStrategy::parse(s),
        None => NamingStrategy::parse(&cfg.import.naming_strategy),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    if let Commands::Init = cli.command {
        migrate::run_migrations(&cfg).await?;
        println!("Database initialized successfully.");
        return Ok(());
    }

    let pool = db::connect(&cfg).await?;
    let locks = GraphLocks::new();
    let (queue, worker) = ReindexQueue::start(pool.clone());

    let outcome = run_command(&pool, &locks, &cfg, &queue, cli.command).await;

    // Dropping the last queue handle closes the channel; the worker drains
    // pending reindex requests and exits
    drop(queue);
    worker.await?;
    pool.close().await;

    outcome
}

async fn run_command(
    pool: &SqlitePool,
    locks: &GraphLocks,
    cfg: &Config,
    queue: &ReindexQueue,
    command: Commands,
) -> anyhow::Result<()> {
    match command {
        Commands::Init => unreachable!("handled before pool creation"),

        Commands::Collection { action } => match action {
            CollectionAction::Create {
                name,
                owner,
                status,
                private,
                title,
                abstract_text,
                meta,
            } => {
                let status = CollectionStatus::parse(&status)
                    .ok_or_else(|| anyhow::anyhow!("unknown status '{}'", status))?;
                let collection = metadata::upsert_collection(
                    pool,
                    locks,
                    cfg,
                    CollectionUpsert {
                        name,
                        owner,
                        status,
                        is_private: private,
                        title,
                        abstract_text,
                        additional: meta,
                    },
                )
                .await?;
                println!("{}  {}", collection.name, collection.uri);
            }
            CollectionAction::Show { name } => {
                let collection = metadata::require_collection_by_name(pool, &name).await?;
                println!("{}", serde_json::to_string_pretty(&collection)?);
                for item in metadata::items_of_collection(pool, collection.id).await? {
                    let marker = if item.indexed_at.is_some() { " " } else { "*" };
                    println!("{} {}", marker, item.handle);
                }
            }
            CollectionAction::Delete { name } => {
                let collection = metadata::require_collection_by_name(pool, &name).await?;
                let items = cascade::delete_collection(pool, locks, cfg, &collection).await?;
                println!("Deleted collection '{}' ({} items).", name, items);
            }
        },

        Commands::Item { action } => match action {
            ItemAction::Add { collection, name } => {
                let collection = metadata::require_collection_by_name(pool, &collection).await?;
                let item =
                    metadata::create_item(pool, locks, cfg, queue, &collection, &name).await?;
                println!("{}  {}", item.handle, item.uri);
            }
            ItemAction::Delete { handle } => {
                let item = metadata::require_item_by_handle(pool, &handle).await?;
                let collection =
                    metadata::require_collection_by_id(pool, item.collection_id).await?;
                cascade::delete_item(pool, locks, &collection, &item).await?;
                println!("Deleted item '{}'.", handle);
            }
        },

        Commands::Document { action } => match action {
            DocumentAction::Add {
                handle,
                file,
                overwrite,
            } => {
                let item = metadata::require_item_by_handle(pool, &handle).await?;
                let collection =
                    metadata::require_collection_by_id(pool, item.collection_id).await?;
                let file_name = file
                    .file_name()
                    .and_then(|n| n.to_str())
                    .ok_or_else(|| anyhow::anyhow!("'{}' has no usable file name", file.display()))?
                    .to_string();

                let dest_dir = cfg.storage.data_dir.join(&collection.name);
                std::fs::create_dir_all(&dest_dir)?;
                let dest = dest_dir.join(&file_name);
                std::fs::copy(&file, &dest)?;

                metadata::add_document(
                    pool, locks, cfg, queue, &item, &file_name, &dest, None, overwrite,
                )
                .await?;
                println!("Attached '{}' to {}.", file_name, handle);
            }
            DocumentAction::Delete { handle, file_name } => {
                let item = metadata::require_item_by_handle(pool, &handle).await?;
                let collection =
                    metadata::require_collection_by_id(pool, item.collection_id).await?;
                let document = metadata::documents_of_item(pool, item.id)
                    .await?
                    .into_iter()
                    .find(|d| d.file_name == file_name)
                    .ok_or_else(|| {
                        anyhow::anyhow!("document '{}' not found under {}", file_name, handle)
                    })?;
                cascade::delete_document(pool, locks, queue, &collection, &item, &document)
                    .await?;
                println!("Deleted document '{}' from {}.", file_name, handle);
            }
        },

        Commands::Contrib { action } => match action {
            ContribAction::Create {
                name,
                collection,
                owner,
                description,
                abstract_text,
            } => {
                let contribution = metadata::upsert_contribution(
                    pool,
                    locks,
                    cfg,
                    ContributionUpsert {
                        id: None,
                        name,
                        collection_name: Some(collection),
                        owner,
                        description,
                        abstract_text,
                    },
                )
                .await?;
                println!("Contribution {} '{}' created.", contribution.id, contribution.name);
            }
            ContribAction::Update {
                id,
                name,
                description,
                abstract_text,
            } => {
                let existing = metadata::require_contribution(pool, id).await?;
                let contribution = metadata::upsert_contribution(
                    pool,
                    locks,
                    cfg,
                    ContributionUpsert {
                        id: Some(id),
                        name: name.unwrap_or(existing.name),
                        collection_name: None,
                        owner: existing.owner,
                        description: description.unwrap_or(existing.description),
                        abstract_text: abstract_text.unwrap_or(existing.abstract_text),
                    },
                )
                .await?;
                println!("Contribution {} '{}' updated.", contribution.id, contribution.name);
            }
            ContribAction::Show { id } => {
                let contribution = metadata::require_contribution(pool, id).await?;
                println!("{}", serde_json::to_string_pretty(&contribution)?);
            }
            ContribAction::Preview {
                id,
                archive,
                strategy,
            } => {
                let contribution = metadata::require_contribution(pool, id).await?;
                let collection =
                    metadata::require_collection_by_id(pool, contribution.collection_id).await?;
                let strategy = naming_strategy(cfg, strategy.as_deref())?;
                pipeline::stage_archive(cfg, &collection.name, contribution.id, &archive)?;

                let entries =
                    pipeline::preview(pool, cfg, &collection, &contribution, &strategy).await?;
                for entry in &entries {
                    match (&entry.handle, &entry.placement, &entry.message) {
                        (Some(handle), Some(placement), _) => {
                            println!(
                                "ok    {:<40} -> {}  as {} ({:?}, {} bytes, {})",
                                entry.name,
                                handle,
                                placement.file_name,
                                placement.mode,
                                entry.size,
                                entry.doc_type,
                            );
                        }
                        (_, _, Some(message)) => {
                            println!("FAIL  {:<40} {}", entry.name, message);
                        }
                        _ => {}
                    }
                }
                let failing = entries.iter().filter(|e| e.message.is_some()).count();
                println!("{} entries, {} failing.", entries.len(), failing);
            }
            ContribAction::Import {
                id,
                archive,
                strategy,
            } => {
                let contribution = metadata::require_contribution(pool, id).await?;
                let collection =
                    metadata::require_collection_by_id(pool, contribution.collection_id).await?;
                let strategy = naming_strategy(cfg, strategy.as_deref())?;
                if let Some(archive) = archive {
                    pipeline::stage_archive(cfg, &collection.name, contribution.id, &archive)?;
                }

                let report = pipeline::run_import(
                    pool,
                    locks,
                    cfg,
                    queue,
                    &collection,
                    &contribution,
                    &strategy,
                )
                .await?;
                println!(
                    "Imported {} document(s) into contribution {}.",
                    report.persisted, contribution.id
                );
                for failure in &report.failures {
                    println!("FAIL  {}", failure);
                }
            }
            ContribAction::Delete { id } => {
                let contribution = metadata::require_contribution(pool, id).await?;
                let collection =
                    metadata::require_collection_by_id(pool, contribution.collection_id).await?;
                let removed = cascade::delete_contribution(
                    pool,
                    locks,
                    cfg,
                    queue,
                    &collection,
                    &contribution,
                )
                .await?;
                println!(
                    "Deleted contribution {} ({} documents removed).",
                    id, removed
                );
            }
        },

        Commands::Search { query, limit } => {
            let hits = search::search_items(pool, &query, limit).await?;
            if hits.is_empty() {
                println!("No results.");
            }
            for hit in hits {
                println!("{:>7.3}  {:<30} {}", hit.score, hit.handle, hit.snippet);
            }
        }
    }

    Ok(())
}
