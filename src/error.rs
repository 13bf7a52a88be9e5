//! Error taxonomy for the multi-store engine.
//!
//! Per-entry problems inside a batch are carried as data ([`EntryFailure`])
//! and aggregated; they only become an error value when the whole batch is
//! unresolvable or when zero entries persisted.

use thiserror::Error;

/// A single failing file within a batch, with a human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryFailure {
    pub name: String,
    pub reason: String,
}

impl std::fmt::Display for EntryFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.reason)
    }
}

#[derive(Debug, Error)]
pub enum VaultError {
    /// Entity absent at a point where it is required to exist.
    #[error("{0} not found")]
    NotFound(String),

    /// User-correctable input problem. Carries every failing file name so
    /// callers can report the whole batch in one payload.
    #[error("validation failed: {}", summarize(.0))]
    ValidationFailed(Vec<EntryFailure>),

    /// Duplicate name at a scope that forbids collision.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A document-prefix resolution matched documents under more than one
    /// item. Candidates are the distinct item handles matched.
    #[error("ambiguous resolution for '{name}': candidate items {candidates:?}")]
    Ambiguous {
        name: String,
        candidates: Vec<String>,
    },

    /// Corrupt archive, unreachable store, or a violated internal
    /// invariant. Not user-correctable without retry.
    #[error("structural failure: {0}")]
    Structural(String),

    /// Batch-level outcome: some entries persisted, some did not.
    #[error("{persisted} entr(ies) persisted, {} failed: {}", failures.len(), summarize(failures))]
    Partial {
        persisted: usize,
        failures: Vec<EntryFailure>,
    },
}

fn summarize(failures: &[EntryFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<sqlx::Error> for VaultError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => VaultError::NotFound("record".to_string()),
            other => VaultError::Structural(format!("store error: {}", other)),
        }
    }
}

impl From<std::io::Error> for VaultError {
    fn from(e: std::io::Error) -> Self {
        VaultError::Structural(format!("io error: {}", e))
    }
}

pub type Result<T, E = VaultError> = std::result::Result<T, E>;
