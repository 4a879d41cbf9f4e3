//! Store: durable, transactional persistence for the `tx` engine (§4.1).
//!
//! A SQLite-backed store in WAL mode with an FTS5 index over
//! `learnings(content)`. This crate owns the schema, the pool, and all
//! hand-written SQL; it performs no business-rule validation beyond what the
//! schema's constraints enforce — that belongs to `tx-core`.

pub mod config;
pub mod models;
pub mod pool;
pub mod queries;
