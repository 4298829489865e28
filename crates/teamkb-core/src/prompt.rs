//! Grounded prompt construction for knowledge-base answers.

use serde::{Deserialize, Serialize};

use crate::models::{display_title, RetrievedChunk};

/// Context placeholder used when retrieval found nothing.
pub const NO_CONTEXT: &str = "No relevant context found in the knowledge base.";

/// System instruction for grounded answers.
pub const GROUNDED_SYSTEM_PROMPT: &str = "Answer based ONLY on the provided context from the knowledge base. \
If the context does not contain enough information to answer, say so clearly. \
When you use information from the context, refer to the source by its number in brackets (e.g. [1], [2]).";

/// Characters of chunk text kept in a citation excerpt.
pub const EXCERPT_CHARS: usize = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
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
}

/// Render retrieved chunks as numbered context blocks.
///
/// Block `n` (1-based) reads `--- [n] (from: <title>) ---` followed by the
/// chunk text on the next line; blocks are separated by a blank line.
pub fn build_context_prompt(chunks: &[RetrievedChunk]) -> String {
    if chunks.is_empty() {
        return NO_CONTEXT.to_string();
    }

    chunks
        .iter()
        .enumerate()
        .map(|(i, c)| {
            format!(
                "--- [{}] (from: {}) ---\n{}",
                i + 1,
                display_title(c.source_title.as_deref()),
                c.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// The system + user message pair sent to the chat model.
pub fn grounded_messages(context: &str, question: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(GROUNDED_SYSTEM_PROMPT),
        ChatMessage::user(format!(
            "Context:\n\n{}\n\n---\n\nQuestion: {}",
            context, question
        )),
    ]
}

/// First [`EXCERPT_CHARS`] characters of `text`, with an ellipsis when cut.
pub fn excerpt(text: &str) -> String {
    if text.chars().count() > EXCERPT_CHARS {
        let mut out: String = text.chars().take(EXCERPT_CHARS).collect();
        out.push('…');
        out
    } else {
        text.to_string()
    }
}
