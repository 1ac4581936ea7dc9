use chat_relay_rs::team::types::TeamMember;

#[derive(Clone, Debug)]
pub struct CLIConfig {
    pub base_url: String,
    pub provider: String,
    pub model: String,
    pub system_prompt: Option<String>,
    pub temperature: f64,
    pub web_search: bool,
    pub team_mode: bool,
    pub members: Vec<TeamMember>,
    pub user_id: String,
}
