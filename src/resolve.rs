//! Filename resolution: mapping an uploaded file to an existing item.
//!
//! Resolution is a pure lookup. No filesystem or index side effects happen
//! here; the ingestion pipeline acts on the returned [`Resolution`].

use anyhow::bail;
use sqlx::{Row, SqlitePool};

use crate::error::Result;
use crate::models::Item;

/// Configurable heuristic for deriving an item name from a file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamingStrategy {
    /// Split the base name on `delimiter`; the item name is the token at
    /// 1-based position `field`.
    Delimiter { delimiter: String, field: usize },
    /// Item name is the first `n` characters of the base name, or the whole
    /// base name when `n == -1`.
    Offset(i64),
    /// Item name equals the base name exactly.
    WholeName,
    /// Match existing document file names in the collection that start with
    /// the base name as a prefix.
    DocumentPrefix,
}

impl NamingStrategy {
    /// Parses the textual form used by configuration and the CLI:
    /// `delimiter:<d>:<field>`, `offset:<n>`, `whole-name`,
    /// `document-prefix`.
    pub fn parse(s: &str) -> anyhow::Result<Self> {
        if s == "whole-name" {
            return Ok(NamingStrategy::WholeName);
        }
        if s == "document-prefix" {
            return Ok(NamingStrategy::DocumentPrefix);
        }
        if let Some(rest) = s.strip_prefix("offset:") {
            let n: i64 = rest
                .parse()
                .map_err(|_| anyhow::anyhow!("offset is not numeric: '{}'", rest))?;
            return Ok(NamingStrategy::Offset(n));
        }
        if let Some(rest) = s.strip_prefix("delimiter:") {
            // The delimiter may be any string not containing ':'
            let mut parts = rest.rsplitn(2, ':');
            let field_str = parts.next().unwrap_or("");
            let delimiter = parts.next().unwrap_or("").to_string();
            if delimiter.is_empty() {
                bail!("delimiter strategy needs a non-empty delimiter");
            }
            let field: usize = field_str
                .parse()
                .map_err(|_| anyhow::anyhow!("delimiter field is not numeric: '{}'", field_str))?;
            return Ok(NamingStrategy::Delimiter { delimiter, field });
        }
        bail!(
            "unrecognized naming strategy '{}' (expected delimiter:<d>:<n>, offset:<n>, whole-name, document-prefix)",
            s
        )
    }
}

/// Outcome of resolving one file name against a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved { item_id: i64, handle: String },
    NotFound { reason: String },
    /// Document-prefix matches spanned more than one item. Candidates are
    /// the distinct handles matched, sorted.
    Ambiguous { candidates: Vec<String> },
}

/// Strips the last extension from a file name: `abc.wav` -> `abc`,
/// `archive.tar.gz` -> `archive.tar`, `README` -> `README`.
pub fn base_name(file_name: &str) -> &str {
    match file_name.rfind('.') {
        Some(pos) if pos > 0 => &file_name[..pos],
        _ => file_name,
    }
}

/// Computes the candidate item name for the non-query strategies. Returns
/// `None` when the strategy cannot produce a name from this file.
fn computed_item_name(base: &str, strategy: &NamingStrategy) -> Option<String> {
    match strategy {
        NamingStrategy::Delimiter { delimiter, field } => {
            let tokens: Vec<&str> = base.split(delimiter.as_str()).collect();
            if *field == 0 || *field > tokens.len() {
                return None;
            }
            let token = tokens[*field - 1];
            if token.is_empty() {
                None
            } else {
                Some(token.to_string())
            }
        }
        NamingStrategy::Offset(n) => match *n {
            -1 => Some(base.to_string()),
            n if n <= 0 => None,
            n => Some(base.chars().take(n as usize).collect()),
        },
        NamingStrategy::WholeName => Some(base.to_string()),
        NamingStrategy::DocumentPrefix => None,
    }
}

/// Resolves `file_name` to an item of the collection using `strategy`.
pub async fn resolve_item(
    pool: &SqlitePool,
    collection_id: i64,
    collection_name: &str,
    file_name: &str,
    strategy: &NamingStrategy,
) -> Result<Resolution> {
    let base = base_name(file_name);

    if let NamingStrategy::DocumentPrefix = strategy {
        return resolve_by_document_prefix(pool, collection_id, file_name, base).await;
    }

    let item_name = match computed_item_name(base, strategy) {
        Some(name) => name,
        None => {
            return Ok(Resolution::NotFound {
                reason: format!("no item name derivable from '{}'", file_name),
            })
        }
    };

    let handle = Item::make_handle(collection_name, &item_name);
    let row = sqlx::query("SELECT id FROM items WHERE handle = ?")
        .bind(&handle)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(row) => Ok(Resolution::Resolved {
            item_id: row.get("id"),
            handle,
        }),
        None => Ok(Resolution::NotFound {
            reason: format!("no item with handle '{}'", handle),
        }),
    }
}

/// Escapes LIKE wildcards so the base name matches literally.
fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

async fn resolve_by_document_prefix(
    pool: &SqlitePool,
    collection_id: i64,
    file_name: &str,
    base: &str,
) -> Result<Resolution> {
    // Document files abc.wav and abc_1.wav both start with "abc"; the dot
    // keeps "abc" from matching "abc_1.wav".
    let pattern = format!("{}.%", escape_like(base));

    let rows = sqlx::query(
        r#"
        SELECT DISTINCT i.id AS item_id, i.handle AS handle
        FROM items i
        JOIN documents d ON d.item_id = i.id
        WHERE i.collection_id = ? AND d.file_name LIKE ? ESCAPE '\'
        ORDER BY i.handle
        "#,
    )
    .bind(collection_id)
    .bind(&pattern)
    .fetch_all(pool)
    .await?;

    match rows.len() {
        0 => Ok(Resolution::NotFound {
            reason: format!("no existing document matches prefix of '{}'", file_name),
        }),
        1 => Ok(Resolution::Resolved {
            item_id: rows[0].get("item_id"),
            handle: rows[0].get("handle"),
        }),
        _ => Ok(Resolution::Ambiguous {
            candidates: rows.iter().map(|r| r.get("handle")).collect(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_name_strips_last_extension_only() {
        assert_eq!(base_name("abc.wav"), "abc");
        assert_eq!(base_name("archive.tar.gz"), "archive.tar");
        assert_eq!(base_name("README"), "README");
        assert_eq!(base_name(".profile"), ".profile");
    }

    #[test]
    fn test_parse_forms() {
        assert_eq!(
            NamingStrategy::parse("delimiter:-:1").unwrap(),
            NamingStrategy::Delimiter {
                delimiter: "-".into(),
                field: 1
            }
        );
        assert_eq!(
            NamingStrategy::parse("offset:-1").unwrap(),
            NamingStrategy::Offset(-1)
        );
        assert_eq!(
            NamingStrategy::parse("whole-name").unwrap(),
            NamingStrategy::WholeName
        );
        assert_eq!(
            NamingStrategy::parse("document-prefix").unwrap(),
            NamingStrategy::DocumentPrefix
        );
        assert!(NamingStrategy::parse("delimiter:-:x").is_err());
        assert!(NamingStrategy::parse("delimiter::1").is_err());
        assert!(NamingStrategy::parse("regex:.*").is_err());
    }

    #[test]
    fn test_delimiter_field_selection() {
        let strategy = NamingStrategy::Delimiter {
            delimiter: "-".into(),
            field: 1,
        };
        assert_eq!(
            computed_item_name("item42-speaker", &strategy),
            Some("item42".to_string())
        );
        let second = NamingStrategy::Delimiter {
            delimiter: "-".into(),
            field: 2,
        };
        assert_eq!(
            computed_item_name("item42-speaker", &second),
            Some("speaker".to_string())
        );
        let out_of_range = NamingStrategy::Delimiter {
            delimiter: "-".into(),
            field: 5,
        };
        assert_eq!(computed_item_name("item42-speaker", &out_of_range), None);
    }

    #[test]
    fn test_offset_variants() {
        assert_eq!(
            computed_item_name("item42speaker", &NamingStrategy::Offset(6)),
            Some("item42".to_string())
        );
        assert_eq!(
            computed_item_name("item42", &NamingStrategy::Offset(-1)),
            Some("item42".to_string())
        );
        assert_eq!(computed_item_name("item42", &NamingStrategy::Offset(0)), None);
        // Offset past the end yields the whole name
        assert_eq!(
            computed_item_name("ab", &NamingStrategy::Offset(10)),
            Some("ab".to_string())
        );
    }

    #[test]
    fn test_whole_name_uses_base_without_extension() {
        assert_eq!(
            computed_item_name("s203", &NamingStrategy::WholeName),
            Some("s203".to_string())
        );
    }

    #[test]
    fn test_escape_like_literalizes_wildcards() {
        assert_eq!(escape_like("a_b%c"), "a\\_b\\%c");
    }
}
