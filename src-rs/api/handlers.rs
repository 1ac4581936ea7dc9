use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::api::identity::CallerIdentity;
use crate::api::stream::{frame_channel, Frame, TextStream};
use crate::llm::relay::StreamingRelay;
use crate::llm::types::{Attachment, CustomProviderConfig, GenerationSettings, Message};
use crate::team::orchestrator::TeamOrchestrator;
use crate::team::types::TeamConfig;

#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<StreamingRelay>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMeta {
    #[serde(default)]
    pub force_web_browsing: Option<bool>,
}

/// Body shared by the single-model and team endpoints.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest<S> {
    #[serde(default)]
    pub chat_history: Option<Vec<Message>>,
    #[serde(default)]
    pub history: Option<Vec<Message>>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub settings: Option<S>,
    #[serde(default)]
    pub meta: Option<RequestMeta>,
    #[serde(default)]
    pub custom_providers: Vec<CustomProviderConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamChatSettings {
    #[serde(flatten)]
    pub generation: GenerationSettings,
    #[serde(default)]
    pub team: Option<TeamConfig>,
}

impl AsMut<GenerationSettings> for GenerationSettings {
    fn as_mut(&mut self) -> &mut GenerationSettings {
        self
    }
}

impl AsMut<GenerationSettings> for TeamChatSettings {
    fn as_mut(&mut self) -> &mut GenerationSettings {
        &mut self.generation
    }
}

impl<S: AsMut<GenerationSettings>> ChatRequest<S> {
    /// Folds request-level attachments, metadata and custom providers into
    /// the transcript and settings.
    pub fn into_parts(self) -> (Vec<Message>, Option<S>) {
        let mut messages = self.chat_history.or(self.history).unwrap_or_default();
        if !self.attachments.is_empty() {
            match messages.last_mut() {
                Some(last) => last.attachments.extend(self.attachments),
                None => messages.push(Message::user("").with_attachments(self.attachments)),
            }
        }

        let mut settings = self.settings;
        if let Some(generation) = settings.as_mut().map(AsMut::<GenerationSettings>::as_mut) {
            if self
                .meta
                .as_ref()
                .and_then(|m| m.force_web_browsing)
                .unwrap_or(false)
            {
                generation.force_web_browsing = Some(true);
            }
            if generation.custom_providers.is_empty() {
                generation.custom_providers = self.custom_providers;
            }
        }
        (messages, settings)
    }
}

/// Failures reported before any response bytes were committed.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Upstream(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Upstream(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub async fn handle_health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok", "version": env!("CARGO_PKG_VERSION")}))
}

pub async fn handle_user(caller: CallerIdentity) -> Json<serde_json::Value> {
    Json(json!({"loggedIn": true, "user": caller}))
}

pub async fn handle_chat(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Json(req): Json<ChatRequest<GenerationSettings>>,
) -> Result<TextStream, ApiError> {
    let (messages, settings) = req.into_parts();
    let settings =
        settings.ok_or_else(|| ApiError::BadRequest("settings are required".to_string()))?;
    if settings.provider.trim().is_empty() {
        return Err(ApiError::BadRequest("provider is required".to_string()));
    }
    info!(
        user = %caller.id,
        provider = %settings.provider,
        model = %settings.model,
        "chat request"
    );

    let (mut sink, mut rx) = frame_channel();
    let relay = state.relay.clone();
    tokio::spawn(async move {
        let provider = settings.provider.clone();
        let model = settings.model.clone();
        if let Err(err) = relay
            .relay(&provider, &model, &messages, &settings, &mut sink)
            .await
        {
            sink.fail(err.to_string()).await;
        }
    });

    // Headers go out with the first token; a failure before that is still a
    // proper error response.
    match rx.recv().await {
        Some(Frame::Token(first)) => Ok(TextStream::new(Some(first), rx)),
        Some(Frame::Failed(message)) => {
            error!(user = %caller.id, error = %message, "chat failed before streaming");
            Err(ApiError::Upstream(message))
        }
        None => Ok(TextStream::new(None, rx)),
    }
}

pub async fn handle_team_chat(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Json(req): Json<ChatRequest<TeamChatSettings>>,
) -> TextStream {
    let (messages, settings) = req.into_parts();
    let TeamChatSettings { generation, team } = settings.unwrap_or_default();
    let team = team.unwrap_or_default();
    info!(user = %caller.id, members = team.members.len(), "team chat request");

    let (mut sink, rx) = frame_channel();
    let relay = state.relay.clone();
    tokio::spawn(async move {
        let orchestrator = TeamOrchestrator::new(&*relay, &team, &generation);
        match orchestrator.run(&messages, &mut sink).await {
            Ok(outcome) => info!(?outcome, "team chat finished"),
            Err(err) => warn!(error = %err, "team chat stream closed early"),
        }
    });
    TextStream::new(None, rx)
}
