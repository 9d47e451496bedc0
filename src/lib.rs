//! # Lawdex
//!
//! Offline indexing and hybrid retrieval for Chinese legal corpora.
//!
//! Lawdex scans a directory of Markdown statutes, splits each file into
//! structure-aware chunks (articles under their chapter path, every chunk
//! stamped with a provenance header), stores them in SQLite, embeds them,
//! and answers queries by fusing semantic and lexical rankings.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────┐   ┌───────────────┐
//! │   Corpus    │──▶│  Build pipeline  │──▶│    SQLite     │
//! │  *.md files │   │ scan/parse/embed │   │ chunks + FTS5 │
//! └─────────────┘   └────────┬─────────┘   └───────┬───────┘
//!                            ▼                     │
//!                    ┌──────────────┐              │
//!                    │ vector index │              │
//!                    └──────┬───────┘              │
//!                           └──────────┬───────────┘
//!                                      ▼
//!                              ┌──────────────┐
//!                              │  RRF fusion  │
//!                              └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! lawdex init                       # create database
//! lawdex build                      # scan, parse, embed, index
//! lawdex build --limit 500          # vectorize at most 500 chunks
//! lawdex retrieve "合同无效的情形"
//! lawdex parse ./laws/民法典.md      # preview chunking of one file
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite chunk storage |
//! | [`fts`] | FTS5 lexical index |
//! | [`vector_index`] | Persisted semantic index |
//! | [`scan`] | Corpus scanner |
//! | [`embedding`] | Embedding providers |
//! | [`ingest`] | Build orchestration |
//! | [`search`] | Retrieval front end |
//! | [`progress`] | Build progress reporting |
//! | [`get`], [`stats`], [`parse_cmd`] | Inspection commands |
//! | [`logging`] | `tracing` subscriber setup |
//!
//! The chunker, change detection, and fusion engine live in `lawdex-core`.

pub mod config;
pub mod db;
pub mod embedding;
pub mod fts;
pub mod get;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod parse_cmd;
pub mod progress;
pub mod scan;
pub mod search;
pub mod sqlite_store;
pub mod stats;
pub mod vector_index;
