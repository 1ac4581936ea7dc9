use std::io;

use chat_relay_rs::llm::types::{GenerationSettings, Message};
use chat_relay_rs::team::markers::{Demuxer, MarkerEvent};
use chat_relay_rs::team::types::{TeamConfig, TeamMember};
use serde_json::{json, Value};

use crate::client::HTTPClient;
use crate::models::CLIConfig;
use crate::render;

pub struct REPL {
    pub config: CLIConfig,
    pub client: HTTPClient,
    pub history: Vec<Message>,
}

impl REPL {
    pub fn new(config: CLIConfig, client: HTTPClient) -> Self {
        Self {
            config,
            client,
            history: Vec::new(),
        }
    }

    pub fn run(&mut self) {
        render::banner(&self.config);
        loop {
            render::prompt();
            let mut line = String::new();
            match io::stdin().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }
            if line.starts_with('/') {
                if self.handle_command(&line) {
                    break;
                }
                continue;
            }
            self.send(&line);
        }
    }

    fn handle_command(&mut self, line: &str) -> bool {
        let mut parts = line.splitn(2, ' ');
        let cmd = parts.next().unwrap_or("").trim_start_matches('/');
        let rest = parts.next().unwrap_or("").trim();
        match cmd {
            "exit" | "quit" => return true,
            "help" => render::help(),
            "system" => {
                if rest.is_empty() {
                    render::info(&format!("custom prompt: {:?}", self.config.system_prompt));
                } else {
                    self.config.system_prompt = Some(rest.to_string());
                    render::info("custom prompt updated");
                }
            }
            "provider" => {
                if rest.is_empty() {
                    render::info(&format!("provider: {}", self.config.provider));
                } else {
                    self.config.provider = rest.to_string();
                    render::info("provider updated");
                }
            }
            "model" => {
                if rest.is_empty() {
                    render::info(&format!("model: {}", self.config.model));
                } else {
                    self.config.model = rest.to_string();
                    render::info("model updated");
                }
            }
            "temp" => {
                if rest.is_empty() {
                    render::info(&format!("temperature: {:.2}", self.config.temperature));
                } else if let Ok(val) = rest.parse::<f64>() {
                    self.config.temperature = val;
                    render::info("temperature updated");
                } else {
                    render::error("invalid temperature");
                }
            }
            "search" => match toggle(self.config.web_search, rest) {
                Some(flag) => {
                    self.config.web_search = flag;
                    render::info(&format!("search: {}", flag));
                }
                None => render::error("invalid search flag"),
            },
            "team" => match toggle(self.config.team_mode, rest) {
                Some(flag) => {
                    self.config.team_mode = flag;
                    render::info(&format!("team mode: {}", flag));
                }
                None => render::error("invalid team flag"),
            },
            "member" => match parse_member(rest) {
                Some(member) => {
                    self.config.members.push(member);
                    render::info(&format!("{} members", self.config.members.len()));
                }
                None => render::error("usage: /member <name>|<role>|<provider>|<model>"),
            },
            "members" => {
                if rest == "clear" {
                    self.config.members.clear();
                    render::info("members cleared");
                } else {
                    render::members(&self.config.members);
                }
            }
            "history" => render::history(&self.history),
            "reset" => {
                self.history.clear();
                render::info("history cleared");
            }
            "config" => render::config(&self.config),
            "base" => {
                if rest.is_empty() {
                    render::info(&format!("base: {}", self.config.base_url));
                } else {
                    self.config.base_url = rest.to_string();
                    self.client = HTTPClient::new(&self.config.base_url, &self.config.user_id);
                    render::info("base url updated");
                }
            }
            "user" => {
                if rest.is_empty() {
                    match self.client.user() {
                        Ok(user) => render::info(&user.to_string()),
                        Err(err) => render::error(&err),
                    }
                } else {
                    self.config.user_id = rest.to_string();
                    self.client = HTTPClient::new(&self.config.base_url, &self.config.user_id);
                    render::info("user updated");
                }
            }
            _ => render::info("unknown command, type /help"),
        }
        false
    }

    fn settings(&self) -> GenerationSettings {
        GenerationSettings {
            provider: self.config.provider.clone(),
            model: self.config.model.clone(),
            temperature: Some(self.config.temperature),
            custom_prompt: self.config.system_prompt.clone(),
            enable_web_browsing: Some(self.config.web_search),
            show_sources: Some(true),
            ..GenerationSettings::default()
        }
    }

    fn request_body(&self) -> Result<Value, String> {
        let mut settings = serde_json::to_value(self.settings()).map_err(|err| err.to_string())?;
        if self.config.team_mode {
            let team = TeamConfig {
                coordinator: None,
                members: self.config.members.clone(),
            };
            settings["team"] = serde_json::to_value(team).map_err(|err| err.to_string())?;
        }
        Ok(json!({
            "chatHistory": self.history,
            "settings": settings,
        }))
    }

    fn send(&mut self, line: &str) {
        self.history.push(Message::user(line));
        let body = match self.request_body() {
            Ok(body) => body,
            Err(err) => {
                render::error(&err);
                return;
            }
        };

        let reply = if self.config.team_mode {
            let mut demuxer = Demuxer::new();
            let mut last_speech = String::new();
            let mut on_event = |event: MarkerEvent| {
                match &event {
                    MarkerEvent::Begin { .. } => last_speech.clear(),
                    MarkerEvent::Text(text) => last_speech.push_str(text),
                    MarkerEvent::End => {}
                }
                render::marker(&event);
            };
            let result = self.client.stream("/api/team_chat", &body, |chunk| {
                for event in demuxer.push(chunk) {
                    on_event(event);
                }
            });
            for event in demuxer.finish() {
                on_event(event);
            }
            // Only the closing summary goes back into the transcript.
            result.map(|_| last_speech)
        } else {
            self.client.stream("/api/chat", &body, render::text)
        };
        println!();

        match reply {
            Ok(text) if !text.is_empty() => self.history.push(Message::assistant(&text)),
            Ok(_) => {}
            Err(err) => render::error(&err),
        }
    }
}

fn toggle(current: bool, value: &str) -> Option<bool> {
    if value.is_empty() {
        return Some(!current);
    }
    match value.to_lowercase().as_str() {
        "on" | "true" | "1" | "yes" => Some(true),
        "off" | "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

fn parse_member(spec: &str) -> Option<TeamMember> {
    let fields: Vec<&str> = spec.split('|').map(str::trim).collect();
    if fields.is_empty() || fields[0].is_empty() || fields.len() > 4 {
        return None;
    }
    let field = |i: usize| fields.get(i).copied().unwrap_or("");
    Some(TeamMember::new(field(0), field(1), field(2), field(3)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_spec_allows_trailing_defaults() {
        let member = parse_member("Ann | QA | openrouter | meta/llama").unwrap();
        assert_eq!(member.name, "Ann");
        assert_eq!(member.model, "meta/llama");

        let member = parse_member("Bo|Dev").unwrap();
        assert_eq!(member.provider, "");
        assert!(parse_member("").is_none());
        assert!(parse_member("a|b|c|d|e").is_none());
    }

    #[test]
    fn toggle_flips_or_parses() {
        assert_eq!(toggle(false, ""), Some(true));
        assert_eq!(toggle(true, "off"), Some(false));
        assert_eq!(toggle(true, "maybe"), None);
    }
}
