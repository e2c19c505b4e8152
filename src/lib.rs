//! # RagFin
//!
//! A retrieval-augmented assistant for Indian financial regulation.
//!
//! RagFin orchestrates scraper scripts that collect RBI and Income Tax
//! notifications, merges their JSON output, indexes the notification text
//! into a SQLite vector store, and serves a chat API that answers
//! questions grounded in the latest circulars (plus any document the user
//! uploads for the session).
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌───────────┐   ┌──────────────┐   ┌──────────┐
//! │ Scrapers  │──▶│ Combiner  │──▶│   Indexer     │──▶│  SQLite   │
//! │ (runner)  │   │ data.json │   │ Chunk+Embed  │   │ + vectors │
//! └───────────┘   └───────────┘   └──────────────┘   └────┬─────┘
//!                                                         │
//!                                     ┌───────────────────┤
//!                                     ▼                   ▼
//!                                ┌──────────┐       ┌──────────┐
//!                                │   CLI    │       │ HTTP API │
//!                                │ (ragfin) │       │  + LLM   │
//!                                └──────────┘       └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ragfin init                   # create database
//! ragfin scrape                 # run every scraper script
//! ragfin combine                # merge scraper output into data.json
//! ragfin index                  # chunk + embed into the store
//! ragfin pipeline               # scrape → combine → index in one go
//! ragfin query "latest TDS rates"
//! ragfin serve                  # start the chat API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`runner`] | Scraper process supervision |
//! | [`combiner`] | JSON output merging |
//! | [`chunk`] | Text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Notification indexing |
//! | [`retriever`] | Semantic retrieval |
//! | [`llm`] | Prompt assembly and chat completions |
//! | [`extract`] | Uploaded-document text extraction |
//! | [`sessions`] | Per-session document store |
//! | [`history`] | Chat history persistence |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunk;
pub mod combiner;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod history;
pub mod index;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod retriever;
pub mod runner;
pub mod server;
pub mod sessions;
