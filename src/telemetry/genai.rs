//! GenAI semantic convention span helpers for completion calls.
//!
//! Uses the OpenTelemetry GenAI attribute names:
//! - `gen_ai.operation.name`
//! - `gen_ai.request.model`
//! - `gen_ai.provider.name`
//! - `gen_ai.conversation.id`

use tracing::Span;

/// Start a span for a chat completion on behalf of one conversation.
pub fn start_chat_span(model: &str, provider: &str, conversation: &str) -> Span {
    tracing::info_span!(
        "gen_ai.chat",
        "gen_ai.operation.name" = "chat",
        "gen_ai.request.model" = model,
        "gen_ai.provider.name" = provider,
        "gen_ai.conversation.id" = conversation,
    )
}
