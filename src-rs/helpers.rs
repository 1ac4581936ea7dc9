use std::collections::HashMap;
use std::env;
use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::RelayConfig;
use crate::llm::gemini_adapter::GeminiConfig;
use crate::llm::relay::StreamingRelay;
use crate::llm::rotation::Rotator;
use crate::llm::router::{LLMRouter, GEMINI, OPENROUTER};

/// Comma-separated keys from `primary`, then `<prefix>_2` through `<prefix>_10`.
fn load_keys_from_env<F>(lookup: &F, primary: &str, prefix: &str) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut keys = Vec::new();
    if let Some(raw) = lookup(primary) {
        for item in raw.split(',') {
            let trimmed = item.trim();
            if !trimmed.is_empty() {
                keys.push(trimmed.to_string());
            }
        }
    }
    for idx in 2..=10 {
        let key = format!("{}_{}", prefix, idx);
        if let Some(value) = lookup(&key) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                keys.push(trimmed.to_string());
            }
        }
    }
    keys
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl RelayConfig {
    /// Builds the configuration from a variable lookup; unset or unparsable
    /// values keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = RelayConfig::default();
        let port = match non_blank(lookup("PORT")) {
            Some(raw) => raw.parse::<u16>().unwrap_or_else(|_| {
                warn!(value = %raw, "invalid PORT, using default");
                defaults.port
            }),
            None => defaults.port,
        };

        let mut key_pools = HashMap::new();
        key_pools.insert(
            GEMINI.to_string(),
            load_keys_from_env(&lookup, "GEMINI_API_KEYS", "GEMINI_API_KEY"),
        );
        key_pools.insert(
            OPENROUTER.to_string(),
            load_keys_from_env(&lookup, "OPENROUTER_API_KEYS", "OPENROUTER_API_KEY"),
        );

        RelayConfig {
            port,
            gemini_base_url: non_blank(lookup("GEMINI_BASE_URL"))
                .unwrap_or(defaults.gemini_base_url),
            openrouter_url: non_blank(lookup("OPENROUTER_URL"))
                .unwrap_or(defaults.openrouter_url),
            allowed_origin: non_blank(lookup("ALLOWED_ORIGIN")),
            log_filter: non_blank(lookup("RUST_LOG")).unwrap_or(defaults.log_filter),
            key_pools,
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }
}

pub fn init_logging(filter: &str) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

pub fn build_rotator(cfg: &RelayConfig) -> Rotator {
    for (provider, keys) in &cfg.key_pools {
        if keys.is_empty() {
            warn!(provider = %provider, "no global API keys configured");
        } else {
            info!(provider = %provider, keys = keys.len(), "loaded global API keys");
        }
    }
    Rotator::new(cfg.key_pools.clone())
}

pub fn build_relay(cfg: &RelayConfig) -> StreamingRelay {
    let router = LLMRouter::new(
        GeminiConfig {
            base_url: cfg.gemini_base_url.clone(),
        },
        &cfg.openrouter_url,
    );
    StreamingRelay::new(Arc::new(build_rotator(cfg)), router)
}
