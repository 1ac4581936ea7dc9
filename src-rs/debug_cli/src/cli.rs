use std::env;

use crate::models::CLIConfig;

const DEFAULT_URL: &str = "http://localhost:3000";
const DEFAULT_PROVIDER: &str = "gemini";
const DEFAULT_MODEL: &str = "gemini-2.5-flash";
const DEFAULT_USER: &str = "debug-cli";

pub fn parse_config() -> CLIConfig {
    let mut cfg = CLIConfig {
        base_url: env_or("CHAT_RELAY_URL", DEFAULT_URL),
        provider: env_or("CHAT_RELAY_PROVIDER", DEFAULT_PROVIDER),
        model: env_or("CHAT_RELAY_MODEL", DEFAULT_MODEL),
        system_prompt: env_opt("CHAT_RELAY_SYSTEM_PROMPT"),
        temperature: env_float("CHAT_RELAY_TEMPERATURE", 0.7),
        web_search: env_bool("CHAT_RELAY_SEARCH", false),
        team_mode: env_bool("CHAT_RELAY_TEAM", false),
        members: Vec::new(),
        user_id: env_or("CHAT_RELAY_USER", DEFAULT_USER),
    };
    let args: Vec<String> = env::args().collect();
    apply_args(&mut cfg, &args);
    cfg
}

pub fn apply_args(cfg: &mut CLIConfig, args: &[String]) {
    let mut idx = 1;
    while idx < args.len() {
        let value = args.get(idx + 1);
        let consumed = match (args[idx].as_str(), value) {
            ("--base", Some(v)) => {
                cfg.base_url = v.clone();
                true
            }
            ("--provider", Some(v)) => {
                cfg.provider = v.clone();
                true
            }
            ("--model", Some(v)) => {
                cfg.model = v.clone();
                true
            }
            ("--system", Some(v)) => {
                cfg.system_prompt = Some(v.clone());
                true
            }
            ("--temp", Some(v)) => {
                if let Ok(parsed) = v.parse::<f64>() {
                    cfg.temperature = parsed;
                }
                true
            }
            ("--user", Some(v)) => {
                cfg.user_id = v.clone();
                true
            }
            ("--search", _) => {
                cfg.web_search = true;
                false
            }
            ("--team", _) => {
                cfg.team_mode = true;
                false
            }
            _ => false,
        };
        idx += if consumed { 2 } else { 1 };
    }
}

fn env_or(key: &str, fallback: &str) -> String {
    env_opt(key).unwrap_or_else(|| fallback.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => None,
    }
}

fn env_bool(key: &str, fallback: bool) -> bool {
    match env::var(key) {
        Ok(value) => value.parse::<bool>().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_float(key: &str, fallback: f64) -> f64 {
    match env::var(key) {
        Ok(value) => value.parse::<f64>().unwrap_or(fallback),
        Err(_) => fallback,
    }
}
