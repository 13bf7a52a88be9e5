//! Bulk-import pipeline for contribution archives.
//!
//! A batch walks `Validating -> Extracting -> Resolving -> Placing ->
//! Persisting -> CleaningUp -> Done`, with `Failed` reachable from any
//! step. Entry-level problems during Persisting are aggregated and
//! reported as data; only structural problems (corrupt archive, violated
//! invariants) or a fully unresolvable batch abort early. CleaningUp runs
//! on every path once extraction has begun.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::archive::{self, ScratchDir};
use crate::collision::{next_available_name, Binding, CollisionMode, Placement};
use crate::config::Config;
use crate::error::{EntryFailure, Result, VaultError};
use crate::graph::GraphLocks;
use crate::index::ReindexQueue;
use crate::metadata::{self, contribution_archive_path, contribution_dir};
use crate::models::{Collection, Contribution};
use crate::resolve::{resolve_item, NamingStrategy, Resolution};

/// Pipeline phases. `Failed` is terminal and reachable from any phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Validating,
    Extracting,
    Resolving,
    Placing,
    Persisting,
    CleaningUp,
    Done,
    Failed,
}

/// Per-entry outcome of the Validating phase, also used for previews.
#[derive(Debug, Clone)]
pub struct PreviewEntry {
    pub name: String,
    pub size: u64,
    pub doc_type: String,
    /// Resolved item name (the part after the colon), when resolved.
    pub item: Option<String>,
    pub handle: Option<String>,
    pub placement: Option<Placement>,
    /// No news is good news: `None` means the entry can be imported.
    pub message: Option<String>,
}

/// Result of a completed batch.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub state: BatchState,
    pub persisted: usize,
    pub failures: Vec<EntryFailure>,
}

/// Copies an uploaded archive to the contribution's deterministic pending
/// path, overwriting any previous pending archive.
pub fn stage_archive(
    config: &Config,
    collection_name: &str,
    contribution_id: i64,
    source: &Path,
) -> Result<PathBuf> {
    let dir = contribution_dir(config, collection_name, contribution_id);
    fs::create_dir_all(&dir)?;
    let dest = contribution_archive_path(config, collection_name, contribution_id);
    fs::copy(source, &dest)?;
    info!(archive = %dest.display(), "archive staged for import");
    Ok(dest)
}

/// Validates the contribution's pending archive: every entry must resolve
/// to an item, and collision placements are pre-computed against existing
/// bindings plus names claimed by earlier entries of this batch.
///
/// Pure lookup: nothing is extracted, moved, or persisted.
pub async fn preview(
    pool: &SqlitePool,
    config: &Config,
    collection: &Collection,
    contribution: &Contribution,
    strategy: &NamingStrategy,
) -> Result<Vec<PreviewEntry>> {
    let archive_path = contribution_archive_path(config, &collection.name, contribution.id);
    let entries = archive::list_entries(&archive_path)?;

    let owner = contribution.id.to_string();
    let mut bindings_by_item: HashMap<i64, Vec<Binding>> = HashMap::new();
    let mut previews = Vec::with_capacity(entries.len());

    for entry in entries {
        let (_, doc_type) = metadata::media_type_for_name(&entry.name);

        let resolution = resolve_item(
            pool,
            collection.id,
            &collection.name,
            &entry.name,
            strategy,
        )
        .await?;

        match resolution {
            Resolution::Resolved { item_id, handle } => {
                let bindings = match bindings_by_item.get(&item_id) {
                    Some(b) => b.clone(),
                    None => {
                        let b = metadata::item_bindings(pool, item_id).await?;
                        bindings_by_item.insert(item_id, b.clone());
                        b
                    }
                };

                // A non-terminating rename walk is an invariant violation,
                // not an entry failure
                let placement = next_available_name(&owner, &entry.name, &bindings)?;
                if placement.mode != CollisionMode::Overwrite {
                    bindings_by_item
                        .get_mut(&item_id)
                        .expect("bindings cached above")
                        .push((placement.file_name.clone(), owner.clone()));
                }

                let item_name = handle.rsplit(':').next().map(|s| s.to_string());
                previews.push(PreviewEntry {
                    name: entry.name,
                    size: entry.size,
                    doc_type,
                    item: item_name,
                    handle: Some(handle),
                    placement: Some(placement),
                    message: None,
                });
            }
            Resolution::NotFound { reason } => {
                previews.push(PreviewEntry {
                    name: entry.name,
                    size: entry.size,
                    doc_type,
                    item: None,
                    handle: None,
                    placement: None,
                    message: Some(reason),
                });
            }
            Resolution::Ambiguous { candidates } => {
                // Batch reports spell ambiguity exactly as the error
                // taxonomy does
                let reason = VaultError::Ambiguous {
                    name: entry.name.clone(),
                    candidates,
                }
                .to_string();
                previews.push(PreviewEntry {
                    name: entry.name,
                    size: entry.size,
                    doc_type,
                    item: None,
                    handle: None,
                    placement: None,
                    message: Some(reason),
                });
            }
        }
    }

    Ok(previews)
}

fn remove_archive_best_effort(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(archive = %path.display(), error = %e, "could not remove pending archive");
        }
    }
}

/// Moves a file, falling back to copy+remove across filesystems.
fn move_file(source: &Path, dest: &Path) -> std::io::Result<()> {
    match fs::rename(source, dest) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(source, dest)?;
            fs::remove_file(source)?;
            Ok(())
        }
    }
}

/// Runs the full import of the contribution's pending archive.
///
/// Failure contract:
/// - any unresolved entry fails the whole batch up front, listing every
///   failing name (`ValidationFailed`); the pending archive is kept so the
///   user can fix item naming and retry;
/// - a corrupt archive is a `StructuralFailure`; scratch space and the
///   archive are cleaned up;
/// - per-entry Placing/Persisting failures are recorded and processing
///   continues; the batch succeeds if at least one entry persisted,
///   otherwise the aggregate is returned as `Partial` with zero persisted.
pub async fn run_import(
    pool: &SqlitePool,
    locks: &GraphLocks,
    config: &Config,
    queue: &ReindexQueue,
    collection: &Collection,
    contribution: &Contribution,
    strategy: &NamingStrategy,
) -> Result<BatchReport> {
    let archive_path = contribution_archive_path(config, &collection.name, contribution.id);

    // Validating
    debug!(contribution = contribution.id, "batch state: {:?}", BatchState::Validating);
    let entries = preview(pool, config, collection, contribution, strategy).await?;
    if entries.is_empty() {
        return Err(VaultError::Structural(format!(
            "archive {} contains no file entries",
            archive_path.display()
        )));
    }

    let unresolved: Vec<EntryFailure> = entries
        .iter()
        .filter_map(|e| {
            e.message.as_ref().map(|m| EntryFailure {
                name: e.name.clone(),
                reason: m.clone(),
            })
        })
        .collect();
    if !unresolved.is_empty() {
        // No partial import of a batch with unresolved entries
        return Err(VaultError::ValidationFailed(unresolved));
    }

    // Extracting
    debug!(contribution = contribution.id, "batch state: {:?}", BatchState::Extracting);
    let scratch = ScratchDir::create(&config.storage.scratch_dir)?;
    let extracted = match archive::extract_all(&archive_path, scratch.path()) {
        Ok(extracted) => extracted,
        Err(e) => {
            // CleaningUp still runs on the abort path
            drop(scratch);
            remove_archive_best_effort(&archive_path);
            return Err(e);
        }
    };
    let mut extracted_by_name: HashMap<String, PathBuf> = HashMap::new();
    for file in extracted {
        extracted_by_name.entry(file.name).or_insert(file.path);
    }

    let dest_dir = contribution_dir(config, &collection.name, contribution.id);
    fs::create_dir_all(&dest_dir)?;
    let owner = contribution.id.to_string();

    let mut persisted = 0usize;
    let mut failures: Vec<EntryFailure> = Vec::new();

    // Entries are sequential on purpose: each placement depends on the
    // names claimed by the entries before it
    for entry in &entries {
        debug!(entry = %entry.name, "batch state: {:?}", BatchState::Resolving);
        let placement = entry
            .placement
            .clone()
            .expect("validated entries carry a placement");
        let handle = entry.handle.clone().expect("validated entries carry a handle");

        let source = match extracted_by_name.get(&entry.name) {
            Some(path) => path.clone(),
            None => {
                failures.push(EntryFailure {
                    name: entry.name.clone(),
                    reason: "listed in archive but missing after extraction".into(),
                });
                continue;
            }
        };

        // Placing: move, not copy; under rename mode the on-disk name
        // differs from the uploaded name
        debug!(entry = %entry.name, "batch state: {:?}", BatchState::Placing);
        let dest = dest_dir.join(&placement.file_name);
        if let Err(e) = move_file(&source, &dest) {
            warn!(entry = %entry.name, error = %e, "placing failed");
            failures.push(EntryFailure {
                name: entry.name.clone(),
                reason: format!("could not place file: {}", e),
            });
            continue;
        }

        // Persisting: store failures are recorded per entry, never thrown
        // past the pipeline boundary
        debug!(entry = %entry.name, "batch state: {:?}", BatchState::Persisting);
        let persist_result = async {
            let item = metadata::require_item_by_handle(pool, &handle).await?;
            metadata::add_document(
                pool,
                locks,
                config,
                queue,
                &item,
                &placement.file_name,
                &dest,
                Some(contribution.id),
                placement.mode == CollisionMode::Overwrite,
            )
            .await
        }
        .await;

        match persist_result {
            Ok(_) => persisted += 1,
            Err(e) => {
                warn!(entry = %entry.name, error = %e, "persisting failed");
                failures.push(EntryFailure {
                    name: entry.name.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    // CleaningUp: unconditional once Persisting has completed
    debug!(contribution = contribution.id, "batch state: {:?}", BatchState::CleaningUp);
    drop(scratch);
    remove_archive_best_effort(&archive_path);

    if persisted == 0 {
        return Err(VaultError::Partial {
            persisted: 0,
            failures,
        });
    }

    info!(
        contribution = %contribution.name,
        persisted,
        failed = failures.len(),
        "import finished"
    );
    Ok(BatchReport {
        state: BatchState::Done,
        persisted,
        failures,
    })
}
