//! Assistant completions via rig-core.
//!
//! [`anthropic_client`] builds an Anthropic client from a
//! [`SecretString`]-wrapped key; [`AssistantCompletion`] wraps any rig
//! agent as the relay's [`Completion`], carrying each key's recent
//! exchanges along as chat history.
//!
//! # Example
//! ```no_run
//! use keyq::llm::{AssistantCompletion, anthropic_client};
//! use rig::client::CompletionClient;
//! use secrecy::SecretString;
//!
//! let key = SecretString::from("sk-ant-...");
//! let client = anthropic_client(&key).expect("failed to create Anthropic client");
//! let agent = client
//!     .agent("claude-sonnet-4-20250514")
//!     .preamble("You are a helpful assistant.")
//!     .max_tokens(1024)
//!     .build();
//! let completion = AssistantCompletion::new(agent, "claude-sonnet-4-20250514");
//! ```
//!
//! [`SecretString`]: secrecy::SecretString
//! [`Completion`]: crate::relay::Completion

pub mod transcript;

pub use transcript::{Transcript, Turn};

use rig::agent::Agent;
use rig::completion::{Chat, CompletionModel};
use secrecy::{ExposeSecret, SecretString};
use tracing::Instrument;

use crate::error::ProcessError;
use crate::model::Key;
use crate::relay::Completion;
use crate::telemetry::genai::start_chat_span;

/// Create an Anthropic client from a secret API key.
///
/// # Errors
/// Returns an error if the underlying HTTP client cannot be constructed.
pub fn anthropic_client(
    api_key: &SecretString,
) -> Result<rig::providers::anthropic::Client, rig::http_client::Error> {
    rig::providers::anthropic::Client::new(api_key.expose_secret())
}

/// A rig agent holding one conversation per key.
pub struct AssistantCompletion<M: CompletionModel> {
    agent: Agent<M>,
    model: String,
    provider: String,
    transcript: Transcript,
}

impl<M: CompletionModel> AssistantCompletion<M> {
    pub fn new(agent: Agent<M>, model: impl Into<String>) -> Self {
        Self {
            agent,
            model: model.into(),
            provider: "anthropic".to_string(),
            transcript: Transcript::default(),
        }
    }

    /// Keep at most `turns` exchanges per conversation; 0 disables history.
    pub fn history_turns(mut self, turns: usize) -> Self {
        self.transcript = Transcript::new(turns);
        self
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Provider name reported on completion spans.
    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }
}

impl<M: CompletionModel + 'static> Completion for AssistantCompletion<M> {
    async fn complete(&self, conversation: &Key, prompt: &str) -> Result<String, ProcessError> {
        let span = start_chat_span(&self.model, &self.provider, conversation.as_str());
        let history = self.transcript.messages(conversation);
        // Items of one key never run concurrently, so no other turn can be
        // recorded between reading the history and recording this one.
        let reply = async { self.agent.chat(prompt.to_string(), history).await }
            .instrument(span)
            .await
            .map_err(|e| ProcessError::Completion(e.to_string()))?;
        self.transcript.record(conversation, prompt, reply.as_str());
        Ok(reply)
    }
}
