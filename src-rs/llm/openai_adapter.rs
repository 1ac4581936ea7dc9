use serde_json::{json, Value};

use super::sse::SseLineBuffer;
use super::types::{
    ChunkParser, GenerationSettings, Message, ProviderAdapter, ProviderError, WireRequest,
};

pub const DONE_SENTINEL: &str = "[DONE]";

/// Generic chat-completion adapter for OpenRouter and any OpenAI-compatible
/// endpoint a user configures.
pub struct OpenAICompatAdapter {
    endpoint: String,
}

impl OpenAICompatAdapter {
    /// `endpoint` is the full chat-completions URL, query string included.
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Maps any role onto the three this wire format accepts.
pub fn normalize_role(role: &str) -> &'static str {
    match role {
        "system" => "system",
        "user" => "user",
        "assistant" | "model" => "assistant",
        _ => "user",
    }
}

pub fn format_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|msg| {
            json!({
                "role": normalize_role(&msg.role),
                "content": msg.content,
            })
        })
        .collect()
}

impl ProviderAdapter for OpenAICompatAdapter {
    fn translate_request(
        &self,
        model: &str,
        messages: &[Message],
        settings: &GenerationSettings,
        credential: &str,
    ) -> Result<WireRequest, ProviderError> {
        if self.endpoint.trim().is_empty() {
            return Err(ProviderError::InvalidRequest(
                "provider endpoint is empty".to_string(),
            ));
        }
        let body = json!({
            "model": model,
            "messages": format_messages(messages),
            "temperature": settings.temperature(),
            "stream": true,
        });
        Ok(WireRequest {
            url: self.endpoint.clone(),
            headers: vec![("Authorization", format!("Bearer {}", credential))],
            body,
            model: model.to_string(),
            grounding: false,
        })
    }

    fn chunk_parser(&self) -> Box<dyn ChunkParser> {
        Box::new(ChatCompletionParser::default())
    }
}

#[derive(Debug, Default)]
pub struct ChatCompletionParser {
    lines: SseLineBuffer,
    done: bool,
}

impl ChatCompletionParser {
    fn decode(&mut self, payload: &str) -> Option<String> {
        if self.done {
            return None;
        }
        if payload == DONE_SENTINEL {
            self.done = true;
            return None;
        }
        // Keep-alive frames and vendor extensions that are not JSON are ignored.
        let parsed: Value = serde_json::from_str(payload).ok()?;
        let text = parsed
            .pointer("/choices/0/delta/content")
            .and_then(Value::as_str)?;
        if text.is_empty() {
            None
        } else {
            Some(text.to_string())
        }
    }
}

impl ChunkParser for ChatCompletionParser {
    fn parse_chunk(&mut self, raw: &[u8]) -> Vec<String> {
        self.lines
            .push(raw)
            .iter()
            .filter_map(|payload| self.decode(payload))
            .collect()
    }

    fn finish(&mut self) -> Vec<String> {
        match self.lines.flush() {
            Some(payload) => self.decode(&payload).into_iter().collect(),
            None => Vec::new(),
        }
    }

    fn is_done(&self) -> bool {
        self.done
    }
}
