use serde_json::{json, Value};

use super::sse::SseLineBuffer;
use super::types::{
    AttachmentKind, ChunkParser, GenerationSettings, Message, ProviderAdapter, ProviderError,
    WireRequest,
};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";
pub const SEARCH_FALLBACK_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_DYNAMIC_THRESHOLD: f64 = 0.6;
pub const MAX_OUTPUT_TOKENS: u32 = 8192;

const SEARCH_CAPABLE_MODELS: [&str; 5] = [
    "gemini-1.5-flash",
    "gemini-1.5-pro",
    "gemini-2.5-flash",
    "gemini-2.5-pro",
    "gemini-2.0-flash",
];

const PROMPT_ACK: &str = "Understood, I will follow these instructions in all of my replies.";
const ATTACHMENTS_ONLY_PROMPT: &str = "Analyze the attachments:";
const GROUNDING_UNSUPPORTED_MARKER: &str = "search grounding is not supported";

#[derive(Clone, Debug)]
pub struct GeminiConfig {
    pub base_url: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

/// Chat-turn adapter for the Gemini streaming API.
pub struct GeminiAdapter {
    cfg: GeminiConfig,
}

impl GeminiAdapter {
    pub fn new(mut cfg: GeminiConfig) -> Self {
        if cfg.base_url.is_empty() {
            cfg.base_url = DEFAULT_BASE_URL.to_string();
        }
        Self { cfg }
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.cfg.base_url.trim_end_matches('/'),
            model
        )
    }
}

pub fn supports_search(model: &str) -> bool {
    SEARCH_CAPABLE_MODELS.iter().any(|m| *m == model)
}

fn is_legacy_search_model(model: &str) -> bool {
    model.starts_with("gemini-1.5") || model.starts_with("gemini-2.0")
}

/// True when the caller asked for search and the Gemini search tool is the
/// configured browsing backend.
pub fn search_enabled(settings: &GenerationSettings) -> bool {
    settings.web_browsing_requested()
        && settings.browsing_mode.as_deref().unwrap_or("gemini") == "gemini"
}

/// The model that will actually be called, substituting a search-capable one
/// when search was requested for a model without it.
pub fn effective_model(requested: &str, use_search: bool) -> String {
    let chosen = if requested.trim().is_empty() {
        DEFAULT_MODEL
    } else {
        requested
    };
    if use_search && !supports_search(chosen) {
        return SEARCH_FALLBACK_MODEL.to_string();
    }
    chosen.to_string()
}

pub fn search_tools(model: &str, dynamic_threshold: Option<f64>) -> Value {
    if is_legacy_search_model(model) {
        let threshold = dynamic_threshold
            .filter(|t| t.is_finite())
            .map(|t| t.clamp(0.0, 1.0))
            .unwrap_or(DEFAULT_DYNAMIC_THRESHOLD);
        json!([{
            "googleSearchRetrieval": {
                "dynamicRetrievalConfig": {
                    "mode": "MODE_DYNAMIC",
                    "dynamicThreshold": threshold
                }
            }
        }])
    } else {
        json!([{ "googleSearch": {} }])
    }
}

fn native_role(role: &str) -> &'static str {
    // The streaming path has no system role, so system turns are spoken by the user.
    match role {
        "user" | "system" => "user",
        _ => "model",
    }
}

fn build_parts(msg: &Message) -> Vec<Value> {
    let mut parts = Vec::new();
    if !msg.content.is_empty() {
        parts.push(json!({ "text": msg.content }));
    }
    for file in &msg.attachments {
        match file.kind {
            AttachmentKind::Image => {
                if let Some(uri) = file.file_url.as_deref().filter(|u| !u.is_empty()) {
                    parts.push(json!({
                        "fileData": { "mimeType": file.mime_type, "fileUri": uri }
                    }));
                }
            }
            AttachmentKind::Text => {
                if let Some(content) = file.content.as_deref().filter(|c| !c.is_empty()) {
                    let name = file.name.as_deref().unwrap_or("attachment");
                    parts.push(json!({
                        "text": format!(
                            "\n\n--- File content: {} ---\n{}\n--- End of file ---",
                            name, content
                        )
                    }));
                }
            }
            AttachmentKind::Binary => {}
        }
    }
    if !parts.is_empty() && parts.iter().all(|p| p.get("text").is_none()) {
        parts.insert(0, json!({ "text": ATTACHMENTS_ONLY_PROMPT }));
    }
    if parts.is_empty() {
        parts.push(json!({ "text": "" }));
    }
    parts
}

pub fn build_contents(messages: &[Message], custom_prompt: Option<&str>) -> Vec<Value> {
    let mut contents = Vec::with_capacity(messages.len() + 2);
    if let Some(prompt) = custom_prompt {
        contents.push(json!({ "role": "user", "parts": [{ "text": prompt }] }));
        contents.push(json!({ "role": "model", "parts": [{ "text": PROMPT_ACK }] }));
    }
    for msg in messages {
        contents.push(json!({
            "role": native_role(&msg.role),
            "parts": build_parts(msg),
        }));
    }
    contents
}

/// The same call without tools, for configurations the provider refuses to ground.
pub fn without_grounding(request: &WireRequest) -> WireRequest {
    let mut fallback = request.clone();
    if let Some(body) = fallback.body.as_object_mut() {
        body.remove("tools");
        if let Some(config) = body
            .get_mut("generationConfig")
            .and_then(Value::as_object_mut)
        {
            config.remove("maxOutputTokens");
        }
    }
    fallback.grounding = false;
    fallback
}

/// Maps a failed upstream response onto an error, recognizing grounding refusals.
pub fn classify_failure(status: u16, body: String) -> ProviderError {
    if body.to_lowercase().contains(GROUNDING_UNSUPPORTED_MARKER) {
        ProviderError::GroundingUnsupported(body)
    } else {
        ProviderError::UpstreamHttp { status, body }
    }
}

impl ProviderAdapter for GeminiAdapter {
    fn translate_request(
        &self,
        model: &str,
        messages: &[Message],
        settings: &GenerationSettings,
        credential: &str,
    ) -> Result<WireRequest, ProviderError> {
        if messages.is_empty() {
            return Err(ProviderError::InvalidRequest(
                "chat history is empty".to_string(),
            ));
        }
        let use_search = search_enabled(settings);
        let model = effective_model(model, use_search);

        let mut body = json!({
            "contents": build_contents(messages, settings.custom_prompt()),
            "generationConfig": {
                "temperature": settings.temperature(),
                "maxOutputTokens": MAX_OUTPUT_TOKENS
            }
        });
        if use_search {
            body["tools"] = search_tools(&model, settings.dynamic_threshold);
        }

        Ok(WireRequest {
            url: self.endpoint(&model),
            headers: vec![("x-goog-api-key", credential.to_string())],
            body,
            model,
            grounding: use_search,
        })
    }

    fn chunk_parser(&self) -> Box<dyn ChunkParser> {
        Box::new(GeminiStreamParser::default())
    }
}

/// Decodes `alt=sse` frames of `GenerateContentResponse` objects.
#[derive(Debug, Default)]
pub struct GeminiStreamParser {
    lines: SseLineBuffer,
    grounding: Option<Value>,
}

impl GeminiStreamParser {
    fn decode(&mut self, payload: &str) -> Vec<String> {
        let parsed: Value = match serde_json::from_str(payload) {
            Ok(value) => value,
            Err(_) => return Vec::new(),
        };
        let candidate = match parsed.pointer("/candidates/0") {
            Some(candidate) => candidate,
            None => return Vec::new(),
        };
        if let Some(meta) = candidate.get("groundingMetadata") {
            if meta.as_object().map(|o| !o.is_empty()).unwrap_or(false) {
                self.grounding = Some(meta.clone());
            }
        }
        candidate
            .pointer("/content/parts")
            .and_then(Value::as_array)
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|part| part.get("text").and_then(Value::as_str))
                    .filter(|text| !text.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl ChunkParser for GeminiStreamParser {
    fn parse_chunk(&mut self, raw: &[u8]) -> Vec<String> {
        let mut tokens = Vec::new();
        for payload in self.lines.push(raw) {
            tokens.extend(self.decode(&payload));
        }
        tokens
    }

    fn finish(&mut self) -> Vec<String> {
        match self.lines.flush() {
            Some(payload) => self.decode(&payload),
            None => Vec::new(),
        }
    }

    fn grounding_metadata(&self) -> Option<&Value> {
        self.grounding.as_ref()
    }
}
