use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::api::handlers::{handle_chat, handle_health, handle_team_chat, handle_user, AppState};
use crate::config::RelayConfig;
use crate::helpers::build_relay;
use crate::llm::relay::StreamingRelay;

pub struct RelayServer {
    pub port: u16,
    pub allowed_origin: Option<String>,
    pub relay: Arc<StreamingRelay>,
}

impl RelayServer {
    pub fn new(cfg: &RelayConfig, relay: Option<Arc<StreamingRelay>>) -> Self {
        let relay = relay.unwrap_or_else(|| Arc::new(build_relay(cfg)));
        Self {
            port: cfg.port,
            allowed_origin: cfg.allowed_origin.clone(),
            relay,
        }
    }

    fn cors(&self) -> Result<CorsLayer, String> {
        match &self.allowed_origin {
            Some(origin) => {
                let origin = origin
                    .parse::<HeaderValue>()
                    .map_err(|err| format!("invalid ALLOWED_ORIGIN: {}", err))?;
                Ok(CorsLayer::new()
                    .allow_origin(origin)
                    .allow_credentials(true)
                    .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                    .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]))
            }
            None => Ok(CorsLayer::permissive()),
        }
    }

    pub fn router(&self) -> Result<Router, String> {
        let state = AppState {
            relay: self.relay.clone(),
        };
        Ok(Router::new()
            .route("/health", get(handle_health))
            .route("/api/user", get(handle_user))
            .route("/api/chat", post(handle_chat))
            .route("/api/team_chat", post(handle_team_chat))
            .layer(self.cors()?)
            .with_state(state))
    }

    pub async fn start(&self) -> Result<(), String> {
        let app = self.router()?;
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!(%addr, "chat relay listening");
        axum::Server::bind(&addr)
            .serve(app.into_make_service())
            .await
            .map_err(|err| err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::gemini_adapter::GeminiConfig;
    use crate::llm::rotation::Rotator;
    use crate::llm::router::LLMRouter;
    use crate::team::markers::demux;
    use crate::team::types::NO_MEMBERS_NOTICE;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use tower::ServiceExt;
    use wiremock::matchers::{header as header_is, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn app(upstream: &MockServer, openrouter_keys: &[&str]) -> Router {
        let mut pools = HashMap::new();
        pools.insert(
            "openrouter".to_string(),
            openrouter_keys.iter().map(|k| k.to_string()).collect(),
        );
        let relay = StreamingRelay::new(
            Arc::new(Rotator::new(pools)),
            LLMRouter::new(
                GeminiConfig {
                    base_url: upstream.uri(),
                },
                &format!("{}/chat/completions", upstream.uri()),
            ),
        );
        let cfg = RelayConfig::default();
        RelayServer::new(&cfg, Some(Arc::new(relay))).router().unwrap()
    }

    fn sse_reply(text: &str) -> ResponseTemplate {
        let body = format!(
            "data: {}\n\ndata: [DONE]\n\n",
            json!({"choices": [{"delta": {"content": text}}]})
        );
        ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")
    }

    fn post(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .header("x-user-id", "user-1")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(resp: axum::response::Response) -> String {
        let bytes = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn health_reports_version() {
        let upstream = MockServer::start().await;
        let resp = app(&upstream, &[])
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn user_requires_identity() {
        let upstream = MockServer::start().await;
        let resp = app(&upstream, &[])
            .oneshot(Request::builder().uri("/api/user").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body: Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(body, json!({"loggedIn": false, "message": "No token provided."}));

        let resp = app(&upstream, &[])
            .oneshot(
                Request::builder()
                    .uri("/api/user")
                    .header("x-user-id", "u-7")
                    .header("x-user-email", "ada@example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body: Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(body["loggedIn"], true);
        assert_eq!(body["user"]["id"], "u-7");
        assert_eq!(body["user"]["email"], "ada@example.com");
    }

    #[tokio::test]
    async fn chat_streams_plain_text() {
        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header_is("Authorization", "Bearer or-1"))
            .respond_with(sse_reply("Hello there"))
            .expect(1)
            .mount(&upstream)
            .await;

        let resp = app(&upstream, &["or-1"])
            .oneshot(post(
                "/api/chat",
                json!({
                    "chatHistory": [{"role": "user", "content": "hi"}],
                    "settings": {"provider": "openrouter", "model": "meta/llama"}
                }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
        assert_eq!(body_text(resp).await, "Hello there");
    }

    #[tokio::test]
    async fn chat_failure_before_first_token_is_json() {
        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid key"))
            .expect(1)
            .mount(&upstream)
            .await;

        let resp = app(&upstream, &["or-1", "or-2"])
            .oneshot(post(
                "/api/chat",
                json!({
                    "history": [{"role": "user", "content": "hi"}],
                    "settings": {"provider": "openrouter", "model": "m"}
                }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(body["error"], "API error: 401 - invalid key");
    }

    #[tokio::test]
    async fn chat_without_provider_is_rejected() {
        let upstream = MockServer::start().await;
        let resp = app(&upstream, &["or-1"])
            .oneshot(post(
                "/api/chat",
                json!({"history": [{"role": "user", "content": "hi"}], "settings": {"model": "m"}}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn team_chat_without_members_writes_notice() {
        let upstream = MockServer::start().await;
        let resp = app(&upstream, &["or-1"])
            .oneshot(post(
                "/api/team_chat",
                json!({"history": [{"role": "user", "content": "hi"}], "settings": {"team": {"members": []}}}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_text(resp).await, NO_MEMBERS_NOTICE);
    }

    #[tokio::test]
    async fn team_chat_streams_framed_segments() {
        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(sse_reply("ok"))
            .expect(4)
            .mount(&upstream)
            .await;

        let seat = |name: &str| json!({"name": name, "provider": "openrouter", "model": "m"});
        let resp = app(&upstream, &["or-1"])
            .oneshot(post(
                "/api/team_chat",
                json!({
                    "chatHistory": [{"role": "user", "content": "plan a trip"}],
                    "settings": {
                        "team": {
                            "coordinator": seat("Lead"),
                            "members": [seat("Ann"), seat("Bo")]
                        }
                    }
                }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let segments = demux(&body_text(resp).await);
        let speakers: Vec<(&str, &str)> = segments
            .iter()
            .map(|s| (s.speaker.as_deref().unwrap(), s.role.as_deref().unwrap()))
            .collect();
        assert_eq!(
            speakers,
            vec![
                ("Lead", "Coordinator"),
                ("Ann", "Participant"),
                ("Bo", "Participant"),
                ("Lead", "Summary"),
            ]
        );
        assert!(segments.iter().all(|s| s.text == "ok"));
    }
}
