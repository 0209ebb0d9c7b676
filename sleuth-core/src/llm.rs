use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::tool::ToolSpec;

/// A tool call requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub args: serde_json::Value,
}

/// A chat-with-tools completion as the engine consumes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Text content from the assistant (may be empty when only tools are called).
    pub content: String,
    /// Tool calls requested by the assistant, in the order the model emitted them.
    pub tool_calls: Vec<ToolCallRequest>,
    /// Reasoning trace, when the provider exposes one.
    pub thinking: Option<String>,
}

impl ChatResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
            thinking: None,
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    pub fn with_thinking(mut self, thinking: impl Into<String>) -> Self {
        self.thinking = Some(thinking.into());
        self
    }

    pub fn with_tool_call(mut self, id: &str, name: &str, args: serde_json::Value) -> Self {
        self.tool_calls.push(ToolCallRequest {
            id: id.to_string(),
            name: name.to_string(),
            args,
        });
        self
    }
}

/// Abstraction over LLM completion. Decouples the state machine from any
/// specific provider; the concrete client lives outside this workspace.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        tools: &[ToolSpec],
    ) -> Result<ChatResponse, LlmError>;
}

/// A scripted LLM client for tests: returns queued responses in order.
pub struct MockLlmClient {
    responses: std::sync::Mutex<Vec<ChatResponse>>,
}

impl MockLlmClient {
    pub fn new(responses: Vec<ChatResponse>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses),
        }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn chat(
        &self,
        _system_prompt: &str,
        _user_prompt: &str,
        _tools: &[ToolSpec],
    ) -> Result<ChatResponse, LlmError> {
        let mut responses = self.responses.lock().expect("mock lock");
        if responses.is_empty() {
            Ok(ChatResponse::text("No more scripted responses"))
        } else {
            Ok(responses.remove(0))
        }
    }
}

/// Like [`MockLlmClient`] but interleaves errors into the script.
pub enum SequenceItem {
    Response(ChatResponse),
    Error(LlmError),
}

pub struct SequenceLlmClient {
    items: std::sync::Mutex<Vec<SequenceItem>>,
}

impl SequenceLlmClient {
    pub fn new(items: Vec<SequenceItem>) -> Self {
        Self {
            items: std::sync::Mutex::new(items),
        }
    }
}

#[async_trait]
impl LlmClient for SequenceLlmClient {
    async fn chat(
        &self,
        _system_prompt: &str,
        _user_prompt: &str,
        _tools: &[ToolSpec],
    ) -> Result<ChatResponse, LlmError> {
        let mut items = self.items.lock().expect("sequence lock");
        if items.is_empty() {
            return Ok(ChatResponse::text("sequence empty"));
        }
        match items.remove(0) {
            SequenceItem::Response(response) => Ok(response),
            SequenceItem::Error(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_client_drains_script_then_falls_back() {
        let client = MockLlmClient::new(vec![
            ChatResponse::text("first").with_tool_call("c1", "search_logs", serde_json::json!({})),
            ChatResponse::text("second"),
        ]);

        let first = client.chat("sys", "user", &[]).await.unwrap();
        assert!(first.has_tool_calls());
        assert_eq!(first.tool_calls[0].name, "search_logs");

        let second = client.chat("sys", "user", &[]).await.unwrap();
        assert_eq!(second.content, "second");
        assert!(!second.has_tool_calls());

        let empty = client.chat("sys", "user", &[]).await.unwrap();
        assert!(empty.content.contains("No more"));
    }

    #[tokio::test]
    async fn sequence_client_yields_errors_in_order() {
        let client = SequenceLlmClient::new(vec![
            SequenceItem::Error(LlmError::InvalidResponse {
                reason: "truncated".into(),
            }),
            SequenceItem::Response(ChatResponse::text("recovered")),
        ]);

        assert!(client.chat("s", "u", &[]).await.is_err());
        let ok = client.chat("s", "u", &[]).await.unwrap();
        assert_eq!(ok.content, "recovered");
    }
}
