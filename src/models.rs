//! Core data models for collections, items, documents, and contributions.
//!
//! These mirror the relational rows; the RDF side of each entity lives in
//! the per-collection statement graph (see [`crate::graph`]).

use serde::Serialize;

/// Lifecycle status of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionStatus {
    Draft,
    Released,
    Finalised,
}

impl CollectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionStatus::Draft => "draft",
            CollectionStatus::Released => "released",
            CollectionStatus::Finalised => "finalised",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(CollectionStatus::Draft),
            "released" => Some(CollectionStatus::Released),
            "finalised" => Some(CollectionStatus::Finalised),
            _ => None,
        }
    }
}

/// Top-level grouping of items. Owns one named statement graph.
#[derive(Debug, Clone, Serialize)]
pub struct Collection {
    pub id: i64,
    pub name: String,
    pub uri: String,
    pub status: CollectionStatus,
    pub is_private: bool,
    pub owner: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A unit of content within a collection.
///
/// The handle (`collection-name:item-name`) is immutable once created.
#[derive(Debug, Clone, Serialize)]
pub struct Item {
    pub id: i64,
    pub collection_id: i64,
    pub name: String,
    pub handle: String,
    pub uri: String,
    /// Unix timestamp of the last index rebuild, or `None` when stale.
    pub indexed_at: Option<i64>,
}

impl Item {
    /// Builds the stable `collection:item` handle.
    pub fn make_handle(collection_name: &str, item_name: &str) -> String {
        format!("{}:{}", collection_name, item_name)
    }
}

/// A file attached to an item. File names are unique per item, not globally.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: i64,
    pub item_id: i64,
    pub file_name: String,
    pub file_path: String,
    /// Media family: audio, video, text, image, or application.
    pub doc_type: String,
    pub mime_type: String,
    pub source_uri: String,
}

/// A user-submitted document set scoped to one collection.
#[derive(Debug, Clone, Serialize)]
pub struct Contribution {
    pub id: i64,
    pub name: String,
    pub collection_id: i64,
    pub owner: String,
    pub description: String,
    pub abstract_text: String,
    pub created_at: i64,
}

/// Join recording which document, item, and contribution an uploaded file
/// resolved to.
#[derive(Debug, Clone, Serialize)]
pub struct ContributionMapping {
    pub id: i64,
    pub contribution_id: i64,
    pub item_id: i64,
    pub document_id: i64,
}

/// An RDF-style triple held in a collection's graph. Objects are opaque
/// strings; vocabulary semantics are not interpreted here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Statement {
    pub subject: String,
    pub predicate: String,
    pub object: String,
}

impl Statement {
    pub fn new(
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        Statement {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
        }
    }
}

/// Well-known predicate and type URIs asserted by the upsert layer.
///
/// The engine treats all of these as opaque; they are constants only so the
/// upsert and cascade modules agree on spelling.
pub mod vocab {
    pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
    pub const DCT_IDENTIFIER: &str = "http://purl.org/dc/terms/identifier";
    pub const DCT_TITLE: &str = "http://purl.org/dc/terms/title";
    pub const DCT_ABSTRACT: &str = "http://purl.org/dc/terms/abstract";
    pub const DCT_SOURCE: &str = "http://purl.org/dc/terms/source";
    pub const DCT_TYPE: &str = "http://purl.org/dc/terms/type";
    pub const DCT_CREATOR: &str = "http://purl.org/dc/terms/creator";
    pub const DCT_CREATED: &str = "http://purl.org/dc/terms/created";

    pub const VAULT_NS: &str = "http://corpus-vault.dev/schema/";
    /// Item -> document link. Multi-valued by default configuration.
    pub const HAS_DOCUMENT: &str = "http://corpus-vault.dev/schema/hasDocument";
    pub const TYPE_COLLECTION: &str = "http://corpus-vault.dev/schema/Collection";
    pub const TYPE_ITEM: &str = "http://corpus-vault.dev/schema/Item";
    pub const TYPE_DOCUMENT: &str = "http://corpus-vault.dev/schema/Document";
    pub const TYPE_CONTRIBUTION: &str = "http://corpus-vault.dev/schema/Contribution";
}
