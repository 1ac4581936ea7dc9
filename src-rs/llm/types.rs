use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

pub const DEFAULT_TEMPERATURE: f64 = 0.7;

/// One transcript turn as the caller sent it.
///
/// `role` stays a plain string: callers send `user`, `assistant` and `system`,
/// but stored transcripts also carry provider-native values such as `model`,
/// which each adapter normalizes on its own terms.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub content: String,
    #[serde(
        default,
        deserialize_with = "lenient_attachments",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub attachments: Vec<Attachment>,
}

impl Message {
    pub fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
            attachments: Vec::new(),
        }
    }

    pub fn user(content: &str) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: &str) -> Self {
        Self::new("assistant", content)
    }

    pub fn system(content: &str) -> Self {
        Self::new("system", content)
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    Text,
    Binary,
}

/// An already-resolved upload: images point at remote storage, text files are
/// carried inline, anything else is only described.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(rename = "dataType", alias = "kind")]
    pub kind: AttachmentKind,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub mime_type: String,
    #[serde(default, alias = "originalName")]
    pub name: Option<String>,
    #[serde(default, alias = "uri")]
    pub file_url: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

impl Attachment {
    pub fn image(mime_type: &str, uri: &str) -> Self {
        Self {
            kind: AttachmentKind::Image,
            mime_type: mime_type.to_string(),
            name: None,
            file_url: Some(uri.to_string()),
            content: None,
        }
    }

    pub fn text(name: &str, mime_type: &str, content: &str) -> Self {
        Self {
            kind: AttachmentKind::Text,
            mime_type: mime_type.to_string(),
            name: Some(name.to_string()),
            file_url: None,
            content: Some(content.to_string()),
        }
    }

    pub fn binary(name: &str, mime_type: &str) -> Self {
        Self {
            kind: AttachmentKind::Binary,
            mime_type: mime_type.to_string(),
            name: Some(name.to_string()),
            file_url: None,
            content: None,
        }
    }
}

/// A credential as the settings screen stores it: either a bare string or a
/// `{ "key": ... }` record.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ApiKeyEntry {
    Bare(String),
    Keyed {
        #[serde(default)]
        key: Option<String>,
    },
}

impl ApiKeyEntry {
    pub fn key(&self) -> Option<&str> {
        let raw = match self {
            ApiKeyEntry::Bare(key) => key.as_str(),
            ApiKeyEntry::Keyed { key } => key.as_deref()?,
        };
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    }
}

/// Non-blank credentials, in the order the caller listed them.
pub fn collect_keys(entries: &[ApiKeyEntry]) -> Vec<String> {
    entries
        .iter()
        .filter_map(|entry| entry.key().map(str::to_string))
        .collect()
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CustomProviderConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub base_url: String,
    #[serde(default)]
    pub api_keys: Vec<ApiKeyEntry>,
}

/// Per-request generation settings. Treated as read-only once parsed.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationSettings {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub provider: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub custom_prompt: Option<String>,
    #[serde(default)]
    pub enable_web_browsing: Option<bool>,
    #[serde(default)]
    pub browsing_mode: Option<String>,
    #[serde(default)]
    pub show_sources: Option<bool>,
    #[serde(default)]
    pub dynamic_threshold: Option<f64>,
    #[serde(default)]
    pub api_key_retry_strategy: Option<String>,
    #[serde(default)]
    pub custom_providers: Vec<CustomProviderConfig>,
    #[serde(default)]
    pub gemini_api_keys: Vec<ApiKeyEntry>,
    #[serde(default)]
    pub openrouter_api_keys: Vec<ApiKeyEntry>,
    /// Set from request metadata when the user asked for a web search explicitly.
    #[serde(default)]
    pub force_web_browsing: Option<bool>,
}

impl GenerationSettings {
    pub fn temperature(&self) -> f64 {
        self.temperature.unwrap_or(DEFAULT_TEMPERATURE)
    }

    pub fn web_browsing_requested(&self) -> bool {
        self.enable_web_browsing.unwrap_or(false) || self.force_web_browsing.unwrap_or(false)
    }

    pub fn show_sources(&self) -> bool {
        self.show_sources.unwrap_or(false)
    }

    pub fn custom_prompt(&self) -> Option<&str> {
        self.custom_prompt
            .as_deref()
            .filter(|prompt| !prompt.trim().is_empty())
    }

    pub fn custom_provider(&self, id: &str) -> Option<&CustomProviderConfig> {
        self.custom_providers.iter().find(|p| p.id == id)
    }

    /// The subset a team seat runs with: temperature, credentials and custom
    /// providers. Search, sources and the custom prompt stay single-chat only.
    pub fn for_team_turn(&self) -> GenerationSettings {
        GenerationSettings {
            custom_prompt: None,
            enable_web_browsing: None,
            force_web_browsing: None,
            browsing_mode: None,
            show_sources: None,
            dynamic_threshold: None,
            ..self.clone()
        }
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("no API keys available for provider: {provider}")]
    NoCredentials { provider: String },

    #[error("unsupported provider: {0}")]
    UnsupportedProvider(String),

    #[error("custom provider settings not found: {0}")]
    UnknownCustomProvider(String),

    #[error("API error: {status} - {body}")]
    UpstreamHttp { status: u16, body: String },

    #[error("search grounding is not supported: {0}")]
    GroundingUnsupported(String),

    #[error("transport error: {0}")]
    UpstreamTransport(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The upstream body failed after text was already forwarded. The cause is
    /// kept out of the message so the rotation pool never replays the turn.
    #[error("upstream stream interrupted after partial output")]
    StreamInterrupted { cause: String },

    #[error("output stream closed")]
    SinkClosed,
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::UpstreamTransport(err.to_string())
    }
}

/// Receives streamed text in production order.
#[async_trait]
pub trait TokenSink: Send {
    async fn send_token(&mut self, token: &str) -> Result<(), ProviderError>;
}

#[async_trait]
impl TokenSink for Vec<String> {
    async fn send_token(&mut self, token: &str) -> Result<(), ProviderError> {
        self.push(token.to_string());
        Ok(())
    }
}

#[async_trait]
impl TokenSink for String {
    async fn send_token(&mut self, token: &str) -> Result<(), ProviderError> {
        self.push_str(token);
        Ok(())
    }
}

#[async_trait]
impl TokenSink for mpsc::Sender<String> {
    async fn send_token(&mut self, token: &str) -> Result<(), ProviderError> {
        self.send(token.to_string())
            .await
            .map_err(|_| ProviderError::SinkClosed)
    }
}

/// Adapts a plain per-token callback.
pub struct FnSink<F>(pub F);

#[async_trait]
impl<F> TokenSink for FnSink<F>
where
    F: FnMut(&str) + Send,
{
    async fn send_token(&mut self, token: &str) -> Result<(), ProviderError> {
        (self.0)(token);
        Ok(())
    }
}

/// A fully translated upstream call.
#[derive(Clone)]
pub struct WireRequest {
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: Value,
    /// The model actually asked for, after any substitution.
    pub model: String,
    pub grounding: bool,
}

pub trait ChunkParser: Send {
    /// Tokens completed by this read. Partial trailing data stays buffered.
    fn parse_chunk(&mut self, raw: &[u8]) -> Vec<String>;

    /// Tokens from whatever is still buffered when the body ends.
    fn finish(&mut self) -> Vec<String>;

    fn grounding_metadata(&self) -> Option<&Value> {
        None
    }

    /// True once the stream carried its own end marker; the rest of the body
    /// is not read.
    fn is_done(&self) -> bool {
        false
    }
}

pub trait ProviderAdapter: Send + Sync {
    fn translate_request(
        &self,
        model: &str,
        messages: &[Message],
        settings: &GenerationSettings,
        credential: &str,
    ) -> Result<WireRequest, ProviderError>;

    fn chunk_parser(&self) -> Box<dyn ChunkParser>;
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

// Stored transcripts may carry attachment references as plain strings; only
// resolved records are useful to the adapters.
fn lenient_attachments<'de, D>(deserializer: D) -> Result<Vec<Attachment>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .filter_map(|value| serde_json::from_value(value).ok())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_tolerates_null_content_and_string_attachments() {
        let msg: Message = serde_json::from_value(json!({
            "role": "user",
            "content": null,
            "attachments": ["https://cdn.example/a.png", {"dataType": "image", "mimeType": "image/png", "fileUrl": "https://cdn.example/b.png"}]
        }))
        .unwrap();
        assert_eq!(msg.content, "");
        assert_eq!(msg.attachments.len(), 1);
        assert_eq!(msg.attachments[0].kind, AttachmentKind::Image);
    }

    #[test]
    fn api_key_entries_accept_both_shapes_and_drop_blanks() {
        let entries: Vec<ApiKeyEntry> =
            serde_json::from_value(json!(["k1", {"key": "k2"}, {"key": "  "}, "", {}])).unwrap();
        assert_eq!(collect_keys(&entries), vec!["k1".to_string(), "k2".to_string()]);
    }

    #[test]
    fn settings_defaults() {
        let settings: GenerationSettings =
            serde_json::from_value(json!({"provider": "gemini", "temperature": null})).unwrap();
        assert_eq!(settings.temperature(), DEFAULT_TEMPERATURE);
        assert!(!settings.web_browsing_requested());
        assert!(settings.custom_prompt().is_none());

        let forced = GenerationSettings {
            force_web_browsing: Some(true),
            ..GenerationSettings::default()
        };
        assert!(forced.web_browsing_requested());
    }

    #[test]
    fn team_turn_settings_drop_search_and_prompt() {
        let settings: GenerationSettings = serde_json::from_value(json!({
            "temperature": 0.3,
            "enableWebBrowsing": true,
            "showSources": true,
            "customPrompt": "Answer in French",
            "geminiApiKeys": ["g-1"],
            "customProviders": [{"id": "custom_a", "baseUrl": "http://local/v1"}]
        }))
        .unwrap();
        let team_turn = settings.for_team_turn();
        assert!(!team_turn.web_browsing_requested());
        assert!(!team_turn.show_sources());
        assert!(team_turn.custom_prompt().is_none());
        assert_eq!(team_turn.temperature(), 0.3);
        assert_eq!(collect_keys(&team_turn.gemini_api_keys), vec!["g-1".to_string()]);
        assert!(team_turn.custom_provider("custom_a").is_some());
    }

    #[tokio::test]
    async fn fn_sink_forwards_each_token() {
        let mut seen = Vec::new();
        {
            let mut sink = FnSink(|token: &str| seen.push(token.to_string()));
            sink.send_token("a").await.unwrap();
            sink.send_token("b").await.unwrap();
        }
        assert_eq!(seen, vec!["a", "b"]);
    }
}
