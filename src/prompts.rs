//! Prompt templates for the RAG chain.
//!
//! The system prompt, first-turn QA template, follow-up template, and the
//! fixed no-context answer returned when retrieval comes back empty.

use crate::models::ChatMessage;

pub const SYSTEM_PROMPT: &str = "You are a helpful Technical Documentation Assistant. \
Your role is to answer questions accurately based on the provided documentation context.

Guidelines for your responses:
1. Answer questions based ONLY on the provided documentation context
2. If the information is not available in the context, clearly state that you don't have that information
3. ALWAYS include complete, working code examples when explaining concepts
4. Explain concepts clearly for both beginners and intermediate programmers
5. Be concise but thorough - provide enough detail to be helpful
6. Always cite which part of the documentation your answer comes from (mention the source URL or title)
7. Use proper markdown formatting for code blocks, lists, and emphasis
8. If a question is unclear, ask for clarification
9. Maintain a friendly and professional tone

Remember: your knowledge comes from the provided documentation context. \
Do not use placeholder comments - construct proper examples based on the context.";

/// Fixed answer returned by the no-context short-circuit, without calling
/// the generation service.
pub const NO_CONTEXT_ANSWER: &str = "I don't have relevant documentation to answer your question.

This could mean:
- The question is outside the scope of the indexed documentation
- The documentation doesn't cover this specific topic
- The query might need to be rephrased

Please try:
- Rephrasing your question
- Asking about a more general concept
- Checking if your question is about a topic covered in the indexed documentation

If you believe this is an error, please try asking your question differently.";

/// First-turn prompt: context plus question.
pub fn format_qa_prompt(context: &str, question: &str) -> String {
    format!(
        "You are answering questions based on the indexed documentation.\n\n\
         ## Documentation Context:\n\n{context}\n\n\
         ## User Question:\n\n{question}\n\n\
         ## Instructions:\n\n\
         1. Answer the question based on the documentation context provided above\n\
         2. If the answer is not in the context, say \"I don't have that information in the provided documentation\"\n\
         3. ALWAYS provide complete, working code examples based on the concepts described in the context\n\
         4. Cite the source by mentioning which document section you're referencing\n\
         5. Format your response using markdown (headers, lists, code blocks, etc.)\n\n\
         ## Response:"
    )
}

/// Follow-up prompt: recent conversation history, fresh context, question.
pub fn format_followup_prompt(context: &str, question: &str, history: &str) -> String {
    format!(
        "You are continuing a conversation. Previous context is provided below.\n\n\
         ## Previous Conversation:\n\n{history}\n\n\
         ## Current Documentation Context:\n\n{context}\n\n\
         ## Current User Question:\n\n{question}\n\n\
         ## Instructions:\n\n\
         1. Consider the conversation history to understand context and follow-up questions\n\
         2. Answer based on the current documentation context provided\n\
         3. If this is a follow-up question, reference previous answers when relevant\n\
         4. Include code examples when helpful, using proper markdown formatting\n\
         5. Cite sources from the documentation\n\
         6. Be concise but complete\n\n\
         ## Response:"
    )
}

/// Format conversation turns as "Role: content" pairs, most recent five.
pub fn format_conversation_history(messages: &[ChatMessage]) -> String {
    if messages.is_empty() {
        return "No previous conversation.".to_string();
    }

    let start = messages.len().saturating_sub(5);
    messages[start..]
        .iter()
        .map(|m| format!("{}: {}", m.role.label(), m.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}
