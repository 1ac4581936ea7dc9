use std::collections::HashMap;

use crate::llm::gemini_adapter::DEFAULT_BASE_URL;
use crate::llm::router::DEFAULT_OPENROUTER_URL;

#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub port: u16,
    pub gemini_base_url: String,
    pub openrouter_url: String,
    pub allowed_origin: Option<String>,
    pub log_filter: String,
    /// Global credential pools keyed by provider identifier.
    pub key_pools: HashMap<String, Vec<String>>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            gemini_base_url: DEFAULT_BASE_URL.to_string(),
            openrouter_url: DEFAULT_OPENROUTER_URL.to_string(),
            allowed_origin: None,
            log_filter: "info".to_string(),
            key_pools: HashMap::new(),
        }
    }
}
