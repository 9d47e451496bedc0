//! # Lawdex Core
//!
//! Shared, I/O-free logic for Lawdex: the legal-text chunker, corpus change
//! detection, storage and index abstractions, and the hybrid rank-fusion
//! retrieval engine.
//!
//! This crate contains no tokio runtime, sqlx, or filesystem access. The
//! `lawdex` application crate supplies SQLite-backed implementations of the
//! traits defined here; the in-memory implementations in [`store::memory`],
//! [`index`], and [`lexical`] back the tests.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`chunk`] | State-machine parser: legal text → path-stamped chunks |
//! | [`changes`] | Diff a corpus scan against the file registry |
//! | [`embedding`] | Embedding provider trait and vector utilities |
//! | [`error`] | Typed build and retrieval errors |
//! | [`index`] | Semantic index trait and flat in-memory index |
//! | [`lexical`] | Lexical index trait, CJK-aware tokenizer, BM25 index |
//! | [`models`] | Documents, chunks, registry entries |
//! | [`search`] | Reciprocal rank fusion and category reweighting |
//! | [`store`] | Chunk storage trait and in-memory store |

pub mod changes;
pub mod chunk;
pub mod embedding;
pub mod error;
pub mod index;
pub mod lexical;
pub mod models;
pub mod search;
pub mod store;
