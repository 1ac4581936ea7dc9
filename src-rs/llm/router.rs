use std::sync::Arc;

use super::gemini_adapter::{GeminiAdapter, GeminiConfig};
use super::openai_adapter::OpenAICompatAdapter;
use super::types::{collect_keys, GenerationSettings, ProviderAdapter, ProviderError};

pub const GEMINI: &str = "gemini";
pub const OPENROUTER: &str = "openrouter";
pub const CUSTOM_PREFIX: &str = "custom_";
pub const DEFAULT_OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Provider families the relay can talk to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProviderKind {
    Gemini,
    OpenRouter,
    Custom { id: String, base_url: String },
}

/// A provider identifier resolved against the request's settings.
#[derive(Clone, Debug)]
pub struct ResolvedProvider {
    pub kind: ProviderKind,
    /// Key under which the rotation pool tracks this provider.
    pub pool_key: String,
    /// Request-supplied credentials, blanks dropped. Empty means "use the global pool".
    pub credentials: Vec<String>,
}

impl ResolvedProvider {
    pub fn is_gemini(&self) -> bool {
        self.kind == ProviderKind::Gemini
    }
}

pub fn resolve(
    provider: &str,
    settings: &GenerationSettings,
) -> Result<ResolvedProvider, ProviderError> {
    match provider {
        GEMINI => Ok(ResolvedProvider {
            kind: ProviderKind::Gemini,
            pool_key: GEMINI.to_string(),
            credentials: collect_keys(&settings.gemini_api_keys),
        }),
        OPENROUTER => Ok(ResolvedProvider {
            kind: ProviderKind::OpenRouter,
            pool_key: OPENROUTER.to_string(),
            credentials: collect_keys(&settings.openrouter_api_keys),
        }),
        id if id.starts_with(CUSTOM_PREFIX) => {
            let custom = settings
                .custom_provider(id)
                .ok_or_else(|| ProviderError::UnknownCustomProvider(id.to_string()))?;
            Ok(ResolvedProvider {
                kind: ProviderKind::Custom {
                    id: id.to_string(),
                    base_url: custom.base_url.clone(),
                },
                pool_key: id.to_string(),
                credentials: collect_keys(&custom.api_keys),
            })
        }
        other => Err(ProviderError::UnsupportedProvider(other.to_string())),
    }
}

/// Lookup table from provider family to adapter. The Gemini and OpenRouter
/// adapters are built once; custom endpoints get a fresh adapter per request.
pub struct LLMRouter {
    gemini: Arc<GeminiAdapter>,
    openrouter: Arc<OpenAICompatAdapter>,
}

impl LLMRouter {
    pub fn new(gemini: GeminiConfig, openrouter_url: &str) -> Self {
        Self {
            gemini: Arc::new(GeminiAdapter::new(gemini)),
            openrouter: Arc::new(OpenAICompatAdapter::new(openrouter_url)),
        }
    }

    pub fn adapter(&self, kind: &ProviderKind) -> Arc<dyn ProviderAdapter> {
        match kind {
            ProviderKind::Gemini => self.gemini.clone() as Arc<dyn ProviderAdapter>,
            ProviderKind::OpenRouter => self.openrouter.clone() as Arc<dyn ProviderAdapter>,
            ProviderKind::Custom { base_url, .. } => Arc::new(OpenAICompatAdapter::new(base_url)),
        }
    }
}

impl Default for LLMRouter {
    fn default() -> Self {
        Self::new(GeminiConfig::default(), DEFAULT_OPENROUTER_URL)
    }
}
