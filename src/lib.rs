//! # TeamKB
//!
//! Knowledge ingestion and grounded question answering for team projects.
//!
//! Documents (PDF, DOCX, TXT) and pasted emails are turned into normalized
//! text, split into overlapping chunks, embedded, and stored per project.
//! Questions are answered by retrieving the nearest chunks and asking a
//! chat model to answer only from that context, with numbered citations.
//! Every external AI call leaves exactly one audit record.
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────────┐   ┌──────────┐
//! │ Ingest       │──▶│ Pipeline             │──▶│  Store   │
//! │ doc / email  │   │ extract→chunk→embed  │   │ SQLite   │
//! └──────────────┘   └──────────────────────┘   └────┬─────┘
//!                                                    │
//!                     ┌──────────────────────────────┤
//!                     ▼                              ▼
//!               ┌────────────┐                ┌────────────┐
//!               │ Retrieval  │───────────────▶│  Answer    │
//!               │ top-8 kNN  │                │ chat + cite│
//!               └────────────┘                └────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and provider defaults |
//! | [`error`] | Error taxonomy |
//! | [`db`] / [`migrate`] | SQLite pool and schema |
//! | [`sqlite_store`] / [`blob`] | Persistent storage backends |
//! | [`extract`] | Text extraction from items |
//! | [`embedding`] / [`chat`] | Provider clients |
//! | [`audit`] / [`orchestrator`] | Audited AI calls |
//! | [`ingest`] / [`ingest_service`] / [`queue`] | Item creation and background processing |
//! | [`retrieval`] / [`answer`] | Semantic search and grounded answers |
//! | [`app`] | Wiring |

pub mod answer;
pub mod app;
pub mod audit;
pub mod blob;
pub mod chat;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod ingest_service;
pub mod migrate;
pub mod orchestrator;
pub mod provider;
pub mod queue;
pub mod retrieval;
pub mod sqlite_store;
