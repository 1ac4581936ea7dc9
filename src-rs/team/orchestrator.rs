use async_trait::async_trait;
use tracing::{error, info};

use super::types::{
    begin_marker, TeamConfig, TeamMember, END_MARKER, NO_MEMBERS_NOTICE, SUMMARY_ROLE,
};
use crate::llm::relay::StreamingRelay;
use crate::llm::types::{GenerationSettings, Message, ProviderError, TokenSink};

const COORDINATION_RULES: &str = "You are coordinating a team of real experts. Rules:
- The discussion is strictly sequential: one member speaks, then stops so the next one can react.
- Every member sees the whole team thread up to their turn.
- Respect each member's persona and role.
- The goal is short, practical solutions with code or steps where needed.";

const RECENT_CONTEXT_TURNS: usize = 10;

/// Anything that can stream one model turn into a sink.
#[async_trait]
pub trait TurnRunner: Send + Sync {
    async fn run_turn(
        &self,
        provider: &str,
        model: &str,
        messages: &[Message],
        settings: &GenerationSettings,
        sink: &mut dyn TokenSink,
    ) -> Result<(), ProviderError>;
}

#[async_trait]
impl TurnRunner for StreamingRelay {
    async fn run_turn(
        &self,
        provider: &str,
        model: &str,
        messages: &[Message],
        settings: &GenerationSettings,
        sink: &mut dyn TokenSink,
    ) -> Result<(), ProviderError> {
        self.relay(provider, model, messages, settings, sink)
            .await
            .map(|_| ())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TeamState {
    CoordinatorPlan,
    Member(usize),
    CoordinatorSummary,
    Done,
}

impl TeamState {
    fn next(self, members: usize) -> TeamState {
        match self {
            TeamState::CoordinatorPlan if members == 0 => TeamState::CoordinatorSummary,
            TeamState::CoordinatorPlan => TeamState::Member(0),
            TeamState::Member(i) if i + 1 < members => TeamState::Member(i + 1),
            TeamState::Member(_) => TeamState::CoordinatorSummary,
            TeamState::CoordinatorSummary | TeamState::Done => TeamState::Done,
        }
    }
}

/// How a team turn ended. Upstream failures are reported inline and end the
/// turn; only a failing sink is returned as an error.
#[derive(Debug, PartialEq, Eq)]
pub enum TeamOutcome {
    Completed { turns: usize },
    NoMembers,
    Failed { state: TeamState, message: String },
}

pub struct TeamOrchestrator<'a, R: TurnRunner + ?Sized> {
    runner: &'a R,
    settings: GenerationSettings,
    coordinator: TeamMember,
    members: Vec<TeamMember>,
}

impl<'a, R: TurnRunner + ?Sized> TeamOrchestrator<'a, R> {
    pub fn new(runner: &'a R, team: &TeamConfig, settings: &GenerationSettings) -> Self {
        Self {
            runner,
            settings: settings.for_team_turn(),
            coordinator: team.coordinator(),
            members: team.members(),
        }
    }

    /// Seed of the shared thread: coordination rules plus the user's task.
    pub fn seed_thread(history: &[Message]) -> Vec<Message> {
        let last_user = history
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .unwrap_or("");
        let recent = &history[history.len().saturating_sub(RECENT_CONTEXT_TURNS)..];
        let recent = serde_json::to_string(recent).unwrap_or_else(|_| "[]".to_string());
        vec![
            Message::system(COORDINATION_RULES),
            Message::user(&format!(
                "User task:\n{}\n\nRecent conversation:\n{}",
                last_user, recent
            )),
        ]
    }

    fn speaker(&self, state: TeamState) -> Option<&TeamMember> {
        match state {
            TeamState::CoordinatorPlan | TeamState::CoordinatorSummary => Some(&self.coordinator),
            TeamState::Member(i) => self.members.get(i),
            TeamState::Done => None,
        }
    }

    fn persona_turn(&self, state: TeamState, speaker: &TeamMember) -> Message {
        let text = match state {
            TeamState::CoordinatorSummary => format!(
                "Requested: final summary from {} ({})\nInstructions: summarize the team's output as short actionable points, including any code or commands needed.",
                speaker.name, speaker.role
            ),
            _ => {
                let seat = if state == TeamState::CoordinatorPlan {
                    "Coordinator"
                } else {
                    "Member"
                };
                let mut text = format!("{}: {}\nRole: {}\n", seat, speaker.name, speaker.role);
                if let Some(persona) = speaker.persona() {
                    text.push_str(&format!("Description: {}", persona));
                }
                text
            }
        };
        Message::system(&text)
    }

    fn placeholder(state: TeamState, speaker: &TeamMember) -> Option<Message> {
        match state {
            TeamState::CoordinatorPlan => Some(Message::assistant("(coordinator plan streamed)")),
            TeamState::Member(_) => Some(Message::assistant(&format!(
                "(reply from {} streamed)",
                speaker.name
            ))),
            _ => None,
        }
    }

    /// Runs plan, every member and the summary in order, each fully streamed
    /// into `sink` between BEGIN/END markers before the next one starts.
    pub async fn run(
        &self,
        history: &[Message],
        sink: &mut dyn TokenSink,
    ) -> Result<TeamOutcome, ProviderError> {
        if self.members.is_empty() {
            sink.send_token(NO_MEMBERS_NOTICE).await?;
            return Ok(TeamOutcome::NoMembers);
        }

        let mut thread = Self::seed_thread(history);
        let mut state = TeamState::CoordinatorPlan;
        let mut turns = 0;
        while let Some(speaker) = self.speaker(state) {
            let role = if state == TeamState::CoordinatorSummary {
                SUMMARY_ROLE
            } else {
                speaker.role.as_str()
            };
            info!(
                ?state,
                speaker = %speaker.name,
                provider = %speaker.provider,
                model = %speaker.model,
                "team turn"
            );

            let mut messages = thread.clone();
            messages.push(self.persona_turn(state, speaker));

            sink.send_token(&begin_marker(&speaker.name, role)).await?;
            let result = self
                .runner
                .run_turn(&speaker.provider, &speaker.model, &messages, &self.settings, sink)
                .await;
            sink.send_token(END_MARKER).await?;
            turns += 1;

            if let Err(err) = result {
                if matches!(err, ProviderError::SinkClosed) {
                    return Err(err);
                }
                error!(?state, speaker = %speaker.name, error = %err, "team turn failed");
                let message = err.to_string();
                sink.send_token(&format!("\n❌ Error: {}", message)).await?;
                return Ok(TeamOutcome::Failed { state, message });
            }

            if let Some(ack) = Self::placeholder(state, speaker) {
                thread.push(ack);
            }
            state = state.next(self.members.len());
        }
        Ok(TeamOutcome::Completed { turns })
    }
}
