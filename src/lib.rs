//! # AskDocs
//!
//! A local-first retrieval-augmented question answering engine for
//! technical documentation.
//!
//! AskDocs indexes pre-chunked documentation into a SQLite-backed vector
//! store, retrieves the most relevant chunks for a question (cosine
//! similarity with optional MMR re-ranking), and answers it with a chat
//! completion model grounded in the retrieved context. Embeddings are
//! cached on disk so re-indexing the same corpus never re-calls the API,
//! and generation falls back across an ordered list of models when the
//! preferred one is unavailable.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────┐   ┌──────────┐
//! │ Chunked  │──▶│ Embed + Cache │──▶│  SQLite   │
//! │ JSON     │   │ (batch/retry) │   │  vectors  │
//! └──────────┘   └───────────────┘   └────┬─────┘
//!                                         │
//!                    ┌────────────────────┤
//!                    ▼                    ▼
//!              ┌───────────┐       ┌───────────┐
//!              │ Retriever │──────▶│ RAG chain  │
//!              │ MMR+filter│       │ + fallback │
//!              └───────────┘       └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! askdocs init                          # create the index database
//! askdocs index chunks.json            # embed and index documentation
//! askdocs ask "how do list slices work?"
//! askdocs chat                          # interactive session
//! askdocs stats                         # index statistics
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`embedding`] | Embedding backends, disk cache, batch generator |
//! | [`store`] | Vector index adapter (SQLite, in-memory) |
//! | [`retriever`] | Similarity search, relevance filter, MMR |
//! | [`prompts`] | Prompt templates |
//! | [`generation`] | Chat completion service |
//! | [`chain`] | RAG orchestration with model fallback |
//! | [`index_cmd`] | The `index` command |

pub mod chain;
pub mod config;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod index_cmd;
pub mod models;
pub mod prompts;
pub mod retriever;
pub mod store;
