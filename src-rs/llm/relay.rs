use std::sync::Arc;

use chrono::Utc;
use futures::{FutureExt, StreamExt};
use reqwest::Client;
use serde_json::Value;
use tracing::{info, warn};

use super::gemini_adapter::{self, without_grounding};
use super::rotation::Rotator;
use super::router::{self, LLMRouter, ResolvedProvider};
use super::sources::{extract_sources, render_sources, SOURCES_UNAVAILABLE_NOTE};
use super::types::{
    GenerationSettings, Message, ProviderAdapter, ProviderError, TokenSink, WireRequest,
};
use crate::result::TurnSummary;

pub const GROUNDING_DISABLED_NOTE: &str =
    "\n\n*Note: web search was temporarily disabled for this response*";

/// Drives one model turn through key rotation and forwards its text to a sink.
pub struct StreamingRelay {
    client: Client,
    rotator: Arc<Rotator>,
    router: LLMRouter,
}

#[derive(Debug, Default)]
struct StreamOutcome {
    characters: usize,
    grounded: bool,
    grounding_disabled: bool,
    grounding: Option<Value>,
}

impl StreamingRelay {
    pub fn new(rotator: Arc<Rotator>, router: LLMRouter) -> Self {
        Self {
            client: Client::new(),
            rotator,
            router,
        }
    }

    pub fn rotator(&self) -> &Rotator {
        &self.rotator
    }

    /// Streams one full turn into `sink` and returns once the provider stream
    /// has ended or failed for good.
    pub async fn relay(
        &self,
        provider: &str,
        model: &str,
        messages: &[Message],
        settings: &GenerationSettings,
        sink: &mut dyn TokenSink,
    ) -> Result<TurnSummary, ProviderError> {
        if messages.is_empty() {
            return Err(ProviderError::InvalidRequest(
                "chat history is empty".to_string(),
            ));
        }
        let resolved = router::resolve(provider, settings)?;
        let adapter = self.router.adapter(&resolved.kind);
        let started_at = Utc::now();
        info!(provider, model, messages = messages.len(), "relaying turn");

        let mut attempt = Attempt {
            relay: self,
            adapter: adapter.as_ref(),
            provider: &resolved,
            model,
            messages,
            settings,
            sink,
        };
        let (effective_model, outcome) = self
            .rotator
            .select_and_try(
                &resolved.pool_key,
                &resolved.credentials,
                &mut attempt,
                |attempt, credential| attempt.run(credential).boxed(),
            )
            .await?;

        let mut sources = 0;
        if outcome.grounded && !outcome.grounding_disabled && settings.show_sources() {
            sources = append_sources(outcome.grounding.as_ref(), attempt.sink).await?;
        }

        let elapsed_ms = (Utc::now() - started_at).num_milliseconds();
        info!(
            provider,
            model = %effective_model,
            characters = outcome.characters,
            sources,
            elapsed_ms,
            "turn complete"
        );
        Ok(TurnSummary {
            provider: provider.to_string(),
            model: effective_model,
            characters: outcome.characters,
            sources,
            grounding_disabled: outcome.grounding_disabled,
            started_at,
            elapsed_ms,
        })
    }

    async fn stream(
        &self,
        request: &WireRequest,
        adapter: &dyn ProviderAdapter,
        sink: &mut (dyn TokenSink + '_),
    ) -> Result<StreamOutcome, ProviderError> {
        let mut builder = self.client.post(&request.url).json(&request.body);
        for (name, value) in &request.headers {
            builder = builder.header(*name, value);
        }
        let response = builder.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(if request.grounding {
                gemini_adapter::classify_failure(status.as_u16(), body)
            } else {
                ProviderError::UpstreamHttp {
                    status: status.as_u16(),
                    body,
                }
            });
        }

        let mut parser = adapter.chunk_parser();
        let mut body = response.bytes_stream();
        let mut outcome = StreamOutcome {
            grounded: request.grounding,
            ..StreamOutcome::default()
        };
        let mut forwarded = false;
        while let Some(chunk) = body.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(err) if forwarded => {
                    return Err(ProviderError::StreamInterrupted {
                        cause: err.to_string(),
                    })
                }
                Err(err) => return Err(err.into()),
            };
            for token in parser.parse_chunk(&bytes) {
                outcome.characters += token.chars().count();
                forwarded = true;
                sink.send_token(&token).await?;
            }
            if parser.is_done() {
                break;
            }
        }
        for token in parser.finish() {
            outcome.characters += token.chars().count();
            sink.send_token(&token).await?;
        }
        outcome.grounding = parser.grounding_metadata().cloned();
        Ok(outcome)
    }
}

/// Everything one credential attempt needs, borrowed for the whole rotation.
struct Attempt<'r, 's> {
    relay: &'r StreamingRelay,
    adapter: &'r dyn ProviderAdapter,
    provider: &'r ResolvedProvider,
    model: &'r str,
    messages: &'r [Message],
    settings: &'r GenerationSettings,
    sink: &'r mut (dyn TokenSink + 's),
}

impl Attempt<'_, '_> {
    async fn run(&mut self, credential: String) -> Result<(String, StreamOutcome), ProviderError> {
        let request =
            self.adapter
                .translate_request(self.model, self.messages, self.settings, &credential)?;
        match self.relay.stream(&request, self.adapter, self.sink).await {
            // Grounding refusals get one more try on the same credential, outside
            // the rotation budget.
            Err(ProviderError::GroundingUnsupported(reason)) if request.grounding => {
                warn!(
                    provider = %self.provider.pool_key,
                    model = %request.model,
                    %reason,
                    "grounding unsupported, retrying without search tools"
                );
                let fallback = without_grounding(&request);
                let mut outcome = self.relay.stream(&fallback, self.adapter, self.sink).await?;
                self.sink.send_token(GROUNDING_DISABLED_NOTE).await?;
                outcome.grounding_disabled = true;
                Ok((fallback.model, outcome))
            }
            Ok(outcome) => Ok((request.model, outcome)),
            Err(err) => Err(err),
        }
    }
}

async fn append_sources(
    metadata: Option<&Value>,
    sink: &mut (dyn TokenSink + '_),
) -> Result<usize, ProviderError> {
    let metadata = match metadata {
        Some(metadata) => metadata,
        None => return Ok(0),
    };
    match extract_sources(metadata) {
        Ok(sources) if sources.is_empty() => Ok(0),
        Ok(sources) => {
            sink.send_token(&render_sources(&sources)).await?;
            Ok(sources.len())
        }
        Err(err) => {
            warn!(error = %err, "could not extract sources");
            sink.send_token(SOURCES_UNAVAILABLE_NOTE).await?;
            Ok(0)
        }
    }
}
