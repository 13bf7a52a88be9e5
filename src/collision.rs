//! Collision resolution for uploaded file names.
//!
//! Given a candidate name and the set of file names already bound to the
//! target item (with their owning contribution), decides whether the upload
//! lands as-is, overwrites the owner's prior upload, or is renamed with an
//! owner suffix until a free name is found.

use crate::error::{Result, VaultError};

/// How the final name relates to what is already bound to the item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionMode {
    /// No binding claimed the candidate name.
    None,
    /// Same owner re-uploaded: the existing document is replaced in place.
    Overwrite,
    /// A different owner holds the name; the final name carries an owner
    /// suffix. Reported even when the suffixed probe itself found the name
    /// free or owned.
    Rename,
}

/// Final placement decision for one uploaded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub file_name: String,
    pub mode: CollisionMode,
}

/// A (file name, owner id) pair already bound to the target item. Owner is
/// the contribution id that brought the document in, or
/// [`COLLECTION_OWNER`] for collection-level documents.
pub type Binding = (String, String);

/// Owner scope used for documents that belong to the collection itself
/// rather than to any contribution.
pub const COLLECTION_OWNER: &str = "collection";

/// Computes the next available file name for `candidate` uploaded by
/// `owner_id` against the item's existing bindings.
///
/// Terminates in at most `bindings.len() + 1` probes: each rename appends
/// an owner-scoped suffix, and only finitely many bound names exist.
/// The explicit bound below guards against malformed binding data.
pub fn next_available_name(
    owner_id: &str,
    candidate: &str,
    bindings: &[Binding],
) -> Result<Placement> {
    let max_probes = bindings.len() + 2;
    let mut name = candidate.to_string();
    let mut renamed = false;

    for _ in 0..max_probes {
        let holder = bindings.iter().find(|(file, _)| *file == name);

        match holder {
            None => {
                return Ok(Placement {
                    file_name: name,
                    mode: if renamed {
                        CollisionMode::Rename
                    } else {
                        CollisionMode::None
                    },
                });
            }
            Some((_, owner)) if owner == owner_id => {
                return Ok(Placement {
                    file_name: name,
                    mode: if renamed {
                        CollisionMode::Rename
                    } else {
                        CollisionMode::Overwrite
                    },
                });
            }
            Some(_) => {
                let (stem, ext) = split_name(&name);
                name = format!("{}-c{}{}", stem, owner_id, ext);
                renamed = true;
            }
        }
    }

    Err(VaultError::Structural(format!(
        "rename resolution for '{}' did not terminate within {} probes",
        candidate, max_probes
    )))
}

/// Splits a file name into (stem, extension-with-dot). Names without an
/// extension, or starting with the only dot, keep the whole name as stem.
fn split_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) if pos > 0 => name.split_at(pos),
        _ => (name, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bindings(pairs: &[(&str, &str)]) -> Vec<Binding> {
        pairs
            .iter()
            .map(|(f, o)| (f.to_string(), o.to_string()))
            .collect()
    }

    #[test]
    fn test_free_name_passes_through() {
        let placement = next_available_name("7", "a.wav", &[]).unwrap();
        assert_eq!(placement.file_name, "a.wav");
        assert_eq!(placement.mode, CollisionMode::None);
    }

    #[test]
    fn test_cross_owner_collision_renames() {
        let placement =
            next_available_name("7", "a.wav", &bindings(&[("a.wav", "3")])).unwrap();
        assert_eq!(placement.file_name, "a-c7.wav");
        assert_eq!(placement.mode, CollisionMode::Rename);
    }

    #[test]
    fn test_same_owner_collision_overwrites() {
        let placement =
            next_available_name("7", "a.wav", &bindings(&[("a.wav", "7")])).unwrap();
        assert_eq!(placement.file_name, "a.wav");
        assert_eq!(placement.mode, CollisionMode::Overwrite);
    }

    #[test]
    fn test_rename_chain_reports_rename_even_when_final_probe_is_owned() {
        // "a.wav" held by owner 3; "a-c7.wav" already held by owner 7 from a
        // prior renamed upload. The final name is the owned one, but the
        // mode must stay Rename.
        let placement = next_available_name(
            "7",
            "a.wav",
            &bindings(&[("a.wav", "3"), ("a-c7.wav", "7")]),
        )
        .unwrap();
        assert_eq!(placement.file_name, "a-c7.wav");
        assert_eq!(placement.mode, CollisionMode::Rename);
    }

    #[test]
    fn test_rename_chain_walks_past_foreign_suffixed_names() {
        let placement = next_available_name(
            "7",
            "a.wav",
            &bindings(&[("a.wav", "3"), ("a-c7.wav", "5")]),
        )
        .unwrap();
        assert_eq!(placement.file_name, "a-c7-c7.wav");
        assert_eq!(placement.mode, CollisionMode::Rename);
    }

    #[test]
    fn test_collection_owner_collides_with_contribution() {
        let placement = next_available_name(
            "12",
            "reading.txt",
            &bindings(&[("reading.txt", COLLECTION_OWNER)]),
        )
        .unwrap();
        assert_eq!(placement.file_name, "reading-c12.txt");
        assert_eq!(placement.mode, CollisionMode::Rename);
    }

    #[test]
    fn test_name_without_extension() {
        let placement =
            next_available_name("2", "README", &bindings(&[("README", "9")])).unwrap();
        assert_eq!(placement.file_name, "README-c2");
    }

    #[test]
    fn test_returned_name_absent_from_bindings_unless_overwrite() {
        let existing = bindings(&[("x.txt", "1"), ("x-c4.txt", "2"), ("x-c4-c4.txt", "3")]);
        let placement = next_available_name("4", "x.txt", &existing).unwrap();
        assert!(existing.iter().all(|(f, _)| *f != placement.file_name));
        assert_eq!(placement.mode, CollisionMode::Rename);
    }

    #[test]
    fn test_terminates_within_bindings_plus_one_probes() {
        // Every probe name is claimed by a foreign owner; the walk must
        // still land on a free name before the bound runs out.
        let existing = bindings(&[
            ("x.txt", "1"),
            ("x-c9.txt", "2"),
            ("x-c9-c9.txt", "3"),
            ("x-c9-c9-c9.txt", "4"),
        ]);
        let placement = next_available_name("9", "x.txt", &existing).unwrap();
        assert_eq!(placement.file_name, "x-c9-c9-c9-c9.txt");
        assert_eq!(placement.mode, CollisionMode::Rename);
    }
}
