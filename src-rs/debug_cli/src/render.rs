use std::io::{self, Write};

use chat_relay_rs::llm::types::Message;
use chat_relay_rs::team::markers::MarkerEvent;
use chat_relay_rs::team::types::TeamMember;

use crate::models::CLIConfig;

pub fn banner(cfg: &CLIConfig) {
    println!("Chat Relay Debug CLI");
    println!("API: {}", cfg.base_url);
    println!(
        "Provider: {}  Model: {}  Temp: {:.2}",
        cfg.provider, cfg.model, cfg.temperature
    );
    println!("Type /help for commands.");
}

pub fn prompt() {
    print!("> ");
    let _ = io::stdout().flush();
}

pub fn help() {
    println!("Commands:");
    println!("  /help                                   Show commands");
    println!("  /exit | /quit                           Exit");
    println!("  /system <prompt>                        Set custom prompt");
    println!("  /provider <name>                        Set provider");
    println!("  /model <name>                           Set model");
    println!("  /temp <float>                           Set temperature");
    println!("  /search [on|off]                        Toggle web search");
    println!("  /team [on|off]                          Toggle team mode");
    println!("  /member <name>|<role>|<provider>|<model>  Add a team member");
    println!("  /members [clear]                        List or clear team members");
    println!("  /history                                Show chat history");
    println!("  /reset                                  Clear chat history");
    println!("  /config                                 Show current config");
    println!("  /base <url>                             Update base URL");
    println!("  /user [id]                              Show caller or set user id");
}

pub fn text(text: &str) {
    print!("{}", text);
    let _ = io::stdout().flush();
}

pub fn marker(event: &MarkerEvent) {
    match event {
        MarkerEvent::Begin { speaker, role } => println!("\n── {} ({}) ──", speaker, role),
        MarkerEvent::Text(body) => text(body),
        MarkerEvent::End => println!(),
    }
}

pub fn config(cfg: &CLIConfig) {
    println!("config:");
    println!("  base: {}", cfg.base_url);
    println!("  user: {}", cfg.user_id);
    println!("  provider: {}", cfg.provider);
    println!("  model: {}", cfg.model);
    println!("  temp: {:.2}", cfg.temperature);
    println!("  search: {}", cfg.web_search);
    println!("  team: {} ({} members)", cfg.team_mode, cfg.members.len());
    if let Some(system) = &cfg.system_prompt {
        println!("  system: {}", system);
    }
}

pub fn members(members: &[TeamMember]) {
    if members.is_empty() {
        println!("no team members");
        return;
    }
    for (i, m) in members.iter().enumerate() {
        println!("{}. {} [{}] {}/{}", i + 1, m.name, m.role, m.provider, m.model);
    }
}

pub fn history(items: &[Message]) {
    if items.is_empty() {
        println!("no history");
        return;
    }
    for msg in items {
        println!("{}> {}", msg.role, msg.content);
    }
}

pub fn info(msg: &str) {
    println!("{}", msg);
}

pub fn error(msg: &str) {
    eprintln!("error: {}", msg);
}
