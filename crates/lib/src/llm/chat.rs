//! Normal chat against /v1/chat/completions, non-streaming or SSE streaming.
//!
//! Unlike model management, chat errors are returned: the user is waiting on the reply.

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

use crate::config::ChatConfig;
use crate::llm::client::{ApiClient, ApiError, CompletionRequest, WireMessage};
use crate::llm::endpoints::CHAT_COMPLETIONS;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }
}

/// Sampling options for a chat request.
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl From<&ChatConfig> for ChatOptions {
    fn from(c: &ChatConfig) -> Self {
        Self {
            max_tokens: c.max_tokens,
            temperature: c.temperature,
        }
    }
}

impl ApiClient {
    fn chat_request<'a>(
        &self,
        model: Option<&'a str>,
        messages: &'a [ChatMessage],
        options: &ChatOptions,
        stream: bool,
    ) -> CompletionRequest<'a> {
        CompletionRequest {
            model,
            messages: messages
                .iter()
                .map(|m| WireMessage {
                    role: &m.role,
                    content: &m.content,
                })
                .collect(),
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            stream,
        }
    }

    /// Non-streaming chat with the loaded model (or the server's default when none is known).
    pub async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<String, ApiError> {
        let model = self.state().loaded_id();
        let request = self.chat_request(model.as_deref(), messages, options, false);
        let res = self.complete(&request, self.settings().chat_timeout).await?;
        if !res.has_choices() {
            return Err(ApiError::Protocol("completion had no choices".to_string()));
        }
        Ok(res.content())
    }

    /// Streaming chat (SSE). Calls `on_chunk` for each content delta; returns the full reply.
    pub async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<String, ApiError> {
        let model = self.state().loaded_id();
        let request = self.chat_request(model.as_deref(), messages, options, true);
        let body = serde_json::to_value(&request).map_err(|e| ApiError::Protocol(e.to_string()))?;
        let res = self
            .send_ok(
                CHAT_COMPLETIONS.verb,
                CHAT_COMPLETIONS.path,
                Some(&body),
                self.settings().chat_timeout,
            )
            .await?;

        let mut stream = res.bytes_stream();
        let mut buffer = Vec::new();
        let mut content = String::new();
        'read: while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            buffer.extend_from_slice(&chunk);
            for data in drain_sse_data(&mut buffer) {
                if data == "[DONE]" {
                    break 'read;
                }
                match serde_json::from_str::<StreamChunk>(&data) {
                    Ok(ev) => {
                        if let Some(delta) = ev.delta_content() {
                            on_chunk(delta);
                            content.push_str(delta);
                        }
                    }
                    Err(e) => log::debug!("skipping unparseable stream event: {}", e),
                }
            }
        }
        Ok(content)
    }
}

/// Remove complete SSE events from `buffer` and return their `data:` payloads.
/// A trailing partial event stays in the buffer. Events may be separated by `\n\n` or
/// `\r\n\r\n`.
pub(crate) fn drain_sse_data(buffer: &mut Vec<u8>) -> Vec<String> {
    strip_cr_before_lf(buffer);
    let mut out = Vec::new();
    while let Some(pos) = buffer.windows(2).position(|w| w == b"\n\n") {
        let event: Vec<u8> = buffer.drain(..pos).collect();
        buffer.drain(..2);
        let event = String::from_utf8_lossy(&event);
        for line in event.lines() {
            let line = line.trim();
            if let Some(data) = line.strip_prefix("data:") {
                out.push(data.trim_start().to_string());
            }
        }
    }
    out
}

/// Turn `\r\n` into `\n`. A lone trailing `\r` is kept until its `\n` arrives.
fn strip_cr_before_lf(buffer: &mut Vec<u8>) {
    if !buffer.contains(&b'\r') {
        return;
    }
    let mut out = Vec::with_capacity(buffer.len());
    for (i, &b) in buffer.iter().enumerate() {
        if b == b'\r' && buffer.get(i + 1) == Some(&b'\n') {
            continue;
        }
        out.push(b);
    }
    *buffer = out;
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Option<Vec<StreamChoice>>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Option<StreamDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

impl StreamChunk {
    fn delta_content(&self) -> Option<&str> {
        self.choices
            .as_ref()?
            .first()?
            .delta
            .as_ref()?
            .content
            .as_deref()
            .filter(|c| !c.is_empty())
    }
}
