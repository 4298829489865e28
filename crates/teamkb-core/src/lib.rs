//! # TeamKB Core
//!
//! Runtime-agnostic logic for the TeamKB knowledge pipeline: data models,
//! text normalization, chunking, vector utilities, grounded prompt
//! construction, and the storage abstractions.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem dependencies.
//! The `teamkb` app crate supplies the SQLite store, blob storage, AI
//! providers, and the ingestion and answering services built on top.

pub mod chunk;
pub mod embedding;
pub mod models;
pub mod normalize;
pub mod prompt;
pub mod store;
