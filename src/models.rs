//! Core data models used throughout askdocs.
//!
//! These types represent the chunks, retrieved documents, chat messages,
//! and query results that flow through the retrieval and generation
//! pipeline.

use serde::{Deserialize, Serialize};

/// Positional and provenance metadata attached to a chunk by the
/// (external) chunker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(default)]
    pub source_url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub chunk_index: usize,
    #[serde(default)]
    pub document_index: usize,
    #[serde(default)]
    pub total_chunks: usize,
    #[serde(default)]
    pub chunk_size: usize,
}

/// A bounded-size text segment produced by an external chunker.
///
/// Immutable once created; the embedding field is the only thing the
/// pipeline appends before the chunk is handed to the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    #[serde(default)]
    pub metadata: ChunkMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// A document returned from similarity search, created transiently per
/// query. `score = 1 - distance` under cosine distance.
#[derive(Debug, Clone)]
pub struct RetrievedDocument {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    pub score: f32,
    pub distance: f32,
}

/// Message role in a chat exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Capitalized label used when formatting conversation history.
    pub fn label(&self) -> &'static str {
        match self {
            Role::System => "System",
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

/// A role-tagged message, used both for prompts sent to the generation
/// service and for conversation history turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Attribution for one source document used to answer a query.
#[derive(Debug, Clone, Serialize)]
pub struct SourceAttribution {
    /// Truncated text preview (first 200 characters).
    pub text: String,
    pub source_url: String,
    pub title: String,
    pub score: f32,
}

/// The sole contract a presentation layer needs: the packaged answer to
/// one query, returned from `RagChain::invoke`.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub answer: String,
    pub sources: Vec<SourceAttribution>,
    /// Elapsed wall-clock time in seconds.
    pub response_time: f64,
    pub num_sources: usize,
    pub query: String,
    /// Raw error text when the query failed; `None` on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
