use serde::{Deserialize, Serialize};

pub const BEGIN_PREFIX: &str = "⟦AGENT:BEGIN|";
pub const MARKER_CLOSE: &str = "⟧";
pub const END_MARKER: &str = "⟦AGENT:END⟧";
pub const SUMMARY_ROLE: &str = "Summary";

pub const NO_MEMBERS_NOTICE: &str = "❌ No team members configured for team mode.\n";

/// One participant of a team turn. Empty fields fall back to the defaults of
/// the seat the participant occupies.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TeamMember {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub persona: Option<String>,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub model: String,
}

impl TeamMember {
    pub fn new(name: &str, role: &str, provider: &str, model: &str) -> Self {
        Self {
            name: name.to_string(),
            role: role.to_string(),
            persona: None,
            provider: provider.to_string(),
            model: model.to_string(),
        }
    }

    pub fn with_persona(mut self, persona: &str) -> Self {
        self.persona = Some(persona.to_string());
        self
    }

    pub fn persona(&self) -> Option<&str> {
        self.persona.as_deref().filter(|p| !p.trim().is_empty())
    }

    /// Copy with every blank field replaced by the matching field of `defaults`.
    pub fn or_defaults(&self, defaults: &TeamMember) -> TeamMember {
        fn pick(value: &str, fallback: &str) -> String {
            if value.trim().is_empty() {
                fallback.to_string()
            } else {
                value.to_string()
            }
        }
        TeamMember {
            name: pick(&self.name, &defaults.name),
            role: pick(&self.role, &defaults.role),
            persona: self.persona().map(str::to_string),
            provider: pick(&self.provider, &defaults.provider),
            model: pick(&self.model, &defaults.model),
        }
    }

    pub fn default_coordinator() -> Self {
        Self::new("Agent", "Coordinator", "gemini", "gemini-1.5-pro")
    }

    pub fn default_member() -> Self {
        Self::new("Member", "Participant", "gemini", "gemini-1.5-flash")
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TeamConfig {
    #[serde(default)]
    pub coordinator: Option<TeamMember>,
    #[serde(default)]
    pub members: Vec<TeamMember>,
}

impl TeamConfig {
    pub fn coordinator(&self) -> TeamMember {
        let defaults = TeamMember::default_coordinator();
        match &self.coordinator {
            Some(coordinator) => coordinator.or_defaults(&defaults),
            None => defaults,
        }
    }

    pub fn members(&self) -> Vec<TeamMember> {
        let defaults = TeamMember::default_member();
        self.members.iter().map(|m| m.or_defaults(&defaults)).collect()
    }
}

fn marker_field(value: &str) -> String {
    value
        .chars()
        .filter(|c| *c != '|' && *c != '⟧' && *c != '⟦')
        .collect()
}

pub fn begin_marker(name: &str, role: &str) -> String {
    format!(
        "{}{}|{}{}",
        BEGIN_PREFIX,
        marker_field(name),
        marker_field(role),
        MARKER_CLOSE
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn blank_fields_take_seat_defaults() {
        let team: TeamConfig = serde_json::from_value(json!({
            "coordinator": {"name": "Lead", "persona": "   "},
            "members": [{"role": "Reviewer", "model": "openai/gpt-4o", "provider": "openrouter"}, {}]
        }))
        .unwrap();

        let coordinator = team.coordinator();
        assert_eq!(coordinator.name, "Lead");
        assert_eq!(coordinator.role, "Coordinator");
        assert_eq!(coordinator.model, "gemini-1.5-pro");
        assert_eq!(coordinator.persona, None);

        let members = team.members();
        assert_eq!(members[0].name, "Member");
        assert_eq!(members[0].role, "Reviewer");
        assert_eq!(members[0].provider, "openrouter");
        assert_eq!(members[1], TeamMember::default_member());
    }

    #[test]
    fn missing_coordinator_uses_defaults() {
        let team = TeamConfig::default();
        assert_eq!(team.coordinator(), TeamMember::default_coordinator());
        assert!(team.members().is_empty());
    }

    #[test]
    fn begin_marker_strips_delimiters() {
        assert_eq!(begin_marker("Ann", "QA"), "⟦AGENT:BEGIN|Ann|QA⟧");
        assert_eq!(begin_marker("A|n⟧", "Q⟦A"), "⟦AGENT:BEGIN|An|QA⟧");
    }
}
