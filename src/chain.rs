//! The RAG chain: retrieval, prompt assembly, generation with model
//! fallback, and response packaging.
//!
//! [`RagChain`] owns one conversational session: its bounded history, its
//! currently selected model, and handles to the retriever and generation
//! service (all injected, no ambient globals). `invoke` never returns an
//! error — every failure is folded into a well-formed [`QueryResult`].
//!
//! Model fallback is an explicit finite state machine over an ordered,
//! de-duplicated candidate list: `Trying(i)` advances on a "model not
//! found" failure, terminates in `Succeeded(i)` or `Exhausted`, and never
//! revisits a candidate.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, warn};

use crate::config::GenerationConfig;
use crate::error::RagError;
use crate::generation::{collect_stream, GenerationService};
use crate::models::{ChatMessage, QueryResult, RetrievedDocument, SourceAttribution};
use crate::prompts::{
    format_conversation_history, format_followup_prompt, format_qa_prompt, NO_CONTEXT_ANSWER,
    SYSTEM_PROMPT,
};
use crate::retriever::Retriever;

/// Characters of chunk text kept in a source attribution preview.
const SOURCE_PREVIEW_CHARS: usize = 200;

// ============ Model-fallback state machine ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FallbackState {
    Trying(usize),
    Succeeded(usize),
    Exhausted,
}

#[derive(Debug, Clone, Copy)]
enum AttemptOutcome {
    Succeeded,
    ModelNotFound,
}

/// Pure transition function: success terminates, a missing model advances
/// to the next candidate or exhausts the list. Terminal states absorb.
fn next_state(state: FallbackState, outcome: AttemptOutcome, total: usize) -> FallbackState {
    match (state, outcome) {
        (FallbackState::Trying(i), AttemptOutcome::Succeeded) => FallbackState::Succeeded(i),
        (FallbackState::Trying(i), AttemptOutcome::ModelNotFound) => {
            if i + 1 < total {
                FallbackState::Trying(i + 1)
            } else {
                FallbackState::Exhausted
            }
        }
        (terminal, _) => terminal,
    }
}

/// Ordered-set builder: append each name once, first occurrence wins.
fn ordered_candidates<'a>(names: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for name in names {
        if !out.iter().any(|n| n == name) {
            out.push(name.to_string());
        }
    }
    out
}

// ============ RAG chain ============

/// Complete RAG chain over one conversational session.
pub struct RagChain {
    retriever: Retriever,
    service: Arc<dyn GenerationService>,
    /// Full candidate pool, preferred model first, no duplicates.
    model_candidates: Vec<String>,
    current_model: String,
    temperature: f32,
    mmr_diversity: f32,
    /// History cap in exchanges; the deque holds up to twice this.
    max_history: usize,
    history: VecDeque<ChatMessage>,
}

impl RagChain {
    pub fn new(
        retriever: Retriever,
        service: Arc<dyn GenerationService>,
        config: &GenerationConfig,
        mmr_diversity: f32,
    ) -> Self {
        let model_candidates = ordered_candidates(
            std::iter::once(config.model.as_str())
                .chain(config.fallback_models.iter().map(|s| s.as_str())),
        );
        Self {
            retriever,
            service,
            current_model: config.model.clone(),
            model_candidates,
            temperature: config.temperature,
            mmr_diversity,
            max_history: config.max_history,
            history: VecDeque::new(),
        }
    }

    /// Process one query end to end. Never returns an error: failures are
    /// packaged into the result's `answer`/`error` fields.
    pub async fn invoke(
        &mut self,
        query: &str,
        top_k: Option<usize>,
        use_mmr: bool,
        stream: bool,
    ) -> QueryResult {
        let start = Instant::now();

        let docs = self
            .retriever
            .retrieve(query, top_k, use_mmr, self.mmr_diversity)
            .await;

        // Deliberate short-circuit, not an error: nothing retrieved means
        // nothing to ground an answer in. History is left untouched; a
        // canned refusal is not a model exchange.
        if docs.is_empty() {
            return QueryResult {
                answer: NO_CONTEXT_ANSWER.to_string(),
                sources: Vec::new(),
                response_time: start.elapsed().as_secs_f64(),
                num_sources: 0,
                query: query.to_string(),
                error: None,
            };
        }

        let context = Retriever::format_context(&docs);
        let messages = self.build_messages(&context, query);

        match self.generate_with_fallback(&messages, stream).await {
            Ok(answer) => {
                self.history.push_back(ChatMessage::user(query));
                self.history.push_back(ChatMessage::assistant(&answer));
                while self.history.len() > self.max_history * 2 {
                    self.history.pop_front();
                }

                let sources = source_attributions(&docs);
                QueryResult {
                    answer,
                    num_sources: sources.len(),
                    sources,
                    response_time: start.elapsed().as_secs_f64(),
                    query: query.to_string(),
                    error: None,
                }
            }
            Err(e) => {
                error!("Error in RAG chain: {}", e);
                let error_str = e.to_string();
                let answer = if error_str.contains("404")
                    || error_str.to_lowercase().contains("not found")
                {
                    format!(
                        "The generation model is not available with your current API key. \
                         This might happen if:\n\
                         1. Your API key is for a different service\n\
                         2. The model name is not supported by your API version\n\
                         3. Your API key needs to be regenerated\n\n\
                         Technical error: {}",
                        truncate_chars(&error_str, 200)
                    )
                } else {
                    format!(
                        "I encountered an error processing your query: {}. Please try again.",
                        truncate_chars(&error_str, 200)
                    )
                };

                QueryResult {
                    answer,
                    sources: Vec::new(),
                    response_time: start.elapsed().as_secs_f64(),
                    num_sources: 0,
                    query: query.to_string(),
                    error: Some(error_str),
                }
            }
        }
    }

    /// Reset conversation state to empty. Idempotent.
    pub fn clear_history(&mut self) {
        self.history.clear();
        info!("Conversation history cleared");
    }

    /// Change the sampling temperature for subsequent calls, preserving
    /// the current model selection.
    pub fn update_temperature(&mut self, temperature: f32) {
        self.temperature = temperature;
        info!("Updated temperature to {}", temperature);
    }

    pub fn history(&self) -> &VecDeque<ChatMessage> {
        &self.history
    }

    pub fn current_model(&self) -> &str {
        &self.current_model
    }

    fn build_messages(&self, context: &str, question: &str) -> Vec<ChatMessage> {
        let history: Vec<ChatMessage> = self.history.iter().cloned().collect();
        let prompt_text = if history.is_empty() {
            format_qa_prompt(context, question)
        } else {
            let formatted = format_conversation_history(&history);
            format_followup_prompt(context, question, &formatted)
        };

        vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(prompt_text),
        ]
    }

    /// Drive the fallback state machine over the candidate list: the
    /// current model first, then every other candidate in order, each
    /// tried exactly once. A success promotes that model to current for
    /// the rest of the session.
    async fn generate_with_fallback(
        &mut self,
        messages: &[ChatMessage],
        stream: bool,
    ) -> Result<String, RagError> {
        let order = ordered_candidates(
            std::iter::once(self.current_model.as_str())
                .chain(self.model_candidates.iter().map(|s| s.as_str())),
        );

        let mut state = FallbackState::Trying(0);
        let mut answer: Option<String> = None;
        let mut last_err: Option<RagError> = None;

        loop {
            match state {
                FallbackState::Trying(i) => {
                    let model = &order[i];
                    let result = if stream {
                        match self
                            .service
                            .generate_stream(model, self.temperature, messages)
                            .await
                        {
                            Ok(rx) => collect_stream(rx).await,
                            Err(e) => Err(e),
                        }
                    } else {
                        self.service
                            .generate(model, self.temperature, messages)
                            .await
                    };

                    match result {
                        Ok(text) => {
                            answer = Some(text);
                            state = next_state(state, AttemptOutcome::Succeeded, order.len());
                        }
                        Err(e) if e.is_model_unavailable() => {
                            warn!("Model '{}' not available, trying alternative...", model);
                            last_err = Some(e);
                            state = next_state(state, AttemptOutcome::ModelNotFound, order.len());
                        }
                        // Unclassified failures are not retried on other models.
                        Err(e) => return Err(e),
                    }
                }
                FallbackState::Succeeded(i) => {
                    if self.current_model != order[i] {
                        info!("Switched to model: {}", order[i]);
                        self.current_model = order[i].clone();
                    }
                    return Ok(answer.take().unwrap_or_default());
                }
                FallbackState::Exhausted => {
                    let detail = last_err
                        .take()
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "no candidate models configured".to_string());
                    return Err(RagError::Generation(format!(
                        "All generation models failed. The configured models may not be \
                         supported by your API version, or the API key may be for a \
                         different service. Original error: {}",
                        detail
                    )));
                }
            }
        }
    }
}

fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

fn source_attributions(docs: &[RetrievedDocument]) -> Vec<SourceAttribution> {
    docs.iter()
        .map(|doc| SourceAttribution {
            text: format!("{}...", truncate_chars(&doc.text, SOURCE_PREVIEW_CHARS)),
            source_url: doc.metadata.source_url.clone(),
            title: if doc.metadata.title.is_empty() {
                "Untitled".to_string()
            } else {
                doc.metadata.title.clone()
            },
            score: doc.score,
        })
        .collect()
}
