//! # Corpus Vault
//!
//! A multi-store consistency and ingestion engine for research-data
//! collections.
//!
//! A collection lives in four representations at once: relational records
//! (SQLite), a per-collection statement graph, a full-text search index,
//! and corpus files on disk. Every mutation goes through this crate so the
//! four stay consistent, and bulk imports arrive as contribution archives
//! whose entries are resolved to items by configurable naming strategies.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌───────────────┐
//! │ Contribution │──▶│  Pipeline    │──▶│    SQLite      │
//! │   archives   │   │ Resolve+Place│   │ rows+graph+FTS │
//! └──────────────┘   └─────────────┘   └──────┬────────┘
//!                                             │
//!                                        ┌────┴─────┐
//!                                        │   CLI    │
//!                                        │ (cvault) │
//!                                        └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cvault init                                  # create database
//! cvault collection create mava --owner data@example.org
//! cvault item add mava s203
//! cvault contrib create "field recordings" --collection mava --owner jbh
//! cvault contrib import 1 ./batch.zip
//! cvault search "interview"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types and graph vocabulary |
//! | [`graph`] | Per-collection statement graph and merge modes |
//! | [`resolve`] | Filename-to-item naming strategies |
//! | [`collision`] | Deterministic file-name collision handling |
//! | [`archive`] | Zip listing, extraction, scratch space |
//! | [`pipeline`] | Contribution import batches |
//! | [`metadata`] | Entity upserts and URI minting |
//! | [`cascade`] | Entity deletion across all four stores |
//! | [`index`] | Search index maintenance and reindex queue |
//! | [`search`] | Keyword search over the item index |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod archive;
pub mod cascade;
pub mod collision;
pub mod config;
pub mod db;
pub mod error;
pub mod graph;
pub mod index;
pub mod metadata;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod resolve;
pub mod search;
