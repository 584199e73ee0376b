//! Offline collaborators: an echoing completion and a stdout sink.

use tokio::io::{AsyncWriteExt, Stdout};
use tokio::sync::Mutex;

use crate::error::ProcessError;
use crate::model::Key;

use super::{Completion, DeliverySink};

/// Replies with the prompt itself. For running the relay without an
/// assistant.
#[derive(Debug, Clone, Default)]
pub struct EchoCompletion;

impl Completion for EchoCompletion {
    async fn complete(&self, _conversation: &Key, prompt: &str) -> Result<String, ProcessError> {
        Ok(format!("You said:\n\n{prompt}"))
    }
}

/// Writes each delivery as one `<recipient>\t<text>` line on stdout.
pub struct ConsoleSink {
    out: Mutex<Stdout>,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self {
            out: Mutex::new(tokio::io::stdout()),
        }
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new()
    }
}

impl DeliverySink for ConsoleSink {
    async fn deliver(&self, recipient: &Key, text: &str) -> Result<(), ProcessError> {
        let line = format!("{recipient}\t{}\n", text.replace('\n', " "));
        let mut out = self.out.lock().await;
        out.write_all(line.as_bytes())
            .await
            .map_err(|e| ProcessError::Delivery(e.to_string()))?;
        out.flush()
            .await
            .map_err(|e| ProcessError::Delivery(e.to_string()))
    }
}
