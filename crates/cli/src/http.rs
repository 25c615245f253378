//! HTTP facade: `POST /chat` and `GET /health`.
//!
//! Every failure, including malformed bodies and handler panics, is answered
//! with a `{"error": ...}` object.

use std::any::Any;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::service::ChatService;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub query: String,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ChatReply {
    Answer { answer: String },
    Error { error: String },
}

impl ChatReply {
    fn error(status: StatusCode, error: impl Into<String>) -> Response {
        (status, Json(Self::Error { error: error.into() })).into_response()
    }
}

/// `Json` whose rejections are reported as [`ChatReply::Error`].
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> std::result::Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => {
                warn!(status = %rejection.status(), error = %rejection.body_text(), "Rejected request body");
                Err(ChatReply::error(rejection.status(), rejection.body_text()))
            }
        }
    }
}

pub fn router(service: Arc<dyn ChatService>) -> Router {
    Router::new()
        .route("/chat", post(chat))
        .route("/health", get(health))
        .fallback(not_found)
        .method_not_allowed_fallback(method_not_allowed)
        .layer(CatchPanicLayer::custom(panic_reply))
        .with_state(service)
}

pub async fn serve(bind: &str, service: Arc<dyn ChatService>) -> Result<()> {
    let listener = TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "HTTP facade listening");
    axum::serve(listener, router(service)).await?;
    Ok(())
}

async fn chat(
    State(service): State<Arc<dyn ChatService>>,
    JsonBody(request): JsonBody<ChatRequest>,
) -> (StatusCode, Json<ChatReply>) {
    let span = info_span!("chat", request_id = %Uuid::new_v4());
    async move {
        info!(query = %request.query, "Chat request");
        match service.answer(&request.query).await {
            Ok(answer) => (StatusCode::OK, Json(ChatReply::Answer { answer })),
            Err(e) => {
                let status = match e {
                    Error::EmptyQuery => StatusCode::BAD_REQUEST,
                    _ => StatusCode::BAD_GATEWAY,
                };
                error!(error = %e, %status, "Chat request failed");
                (
                    status,
                    Json(ChatReply::Error {
                        error: e.to_string(),
                    }),
                )
            }
        }
    }
    .instrument(span)
    .await
}

async fn health() -> &'static str {
    "ok"
}

async fn not_found() -> Response {
    ChatReply::error(StatusCode::NOT_FOUND, "no such route")
}

async fn method_not_allowed() -> Response {
    ChatReply::error(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
}

fn panic_reply(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!(%detail, "Request handler panicked");
    ChatReply::error(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use runtime::ModelError;

    struct Fixed;

    #[async_trait]
    impl ChatService for Fixed {
        async fn answer(&self, query: &str) -> Result<String> {
            match query.trim() {
                "" => Err(Error::EmptyQuery),
                "fail" => Err(runtime::Error::Model(ModelError::Network("unreachable".into())).into()),
                "explode" => panic!("service blew up"),
                _ => Ok("Final: 96".to_string()),
            }
        }
    }

    async fn post_chat(query: &str) -> (StatusCode, serde_json::Value) {
        let service: Arc<dyn ChatService> = Arc::new(Fixed);
        let (status, Json(reply)) = chat(
            State(service),
            JsonBody(ChatRequest {
                query: query.to_string(),
            }),
        )
        .await;
        (status, serde_json::to_value(reply).unwrap())
    }

    #[tokio::test]
    async fn answers_queries() {
        let (status, body) = post_chat("what's (3 + 5) x 12?").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({"answer": "Final: 96"}));
    }

    #[tokio::test]
    async fn empty_query_is_bad_request() {
        let (status, body) = post_chat("  ").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "query must not be empty");
    }

    #[tokio::test]
    async fn failures_are_structured_bad_gateway() {
        let (status, body) = post_chat("fail").await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], "model error: network: unreachable");
    }

    #[tokio::test]
    async fn health_is_ok() {
        assert_eq!(health().await, "ok");
    }

    /// Serve the facade on an ephemeral port.
    async fn spawn_facade() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router(Arc::new(Fixed))).await });
        format!("http://{addr}")
    }

    async fn error_body(response: reqwest::Response) -> String {
        let body: serde_json::Value = response.json().await.unwrap();
        body["error"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn malformed_bodies_get_json_errors() {
        let base = spawn_facade().await;
        let client = reqwest::Client::new();

        let broken = client
            .post(format!("{base}/chat"))
            .header("content-type", "application/json")
            .body("{\"query\": ")
            .send()
            .await
            .unwrap();
        assert_eq!(broken.status(), StatusCode::BAD_REQUEST);
        assert!(!error_body(broken).await.is_empty());

        let missing_field = client
            .post(format!("{base}/chat"))
            .json(&serde_json::json!({"question": "hi"}))
            .send()
            .await
            .unwrap();
        assert_eq!(missing_field.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(error_body(missing_field).await.contains("query"));

        let no_content_type = client
            .post(format!("{base}/chat"))
            .body("{\"query\": \"hi\"}")
            .send()
            .await
            .unwrap();
        assert_eq!(no_content_type.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert!(!error_body(no_content_type).await.is_empty());
    }

    #[tokio::test]
    async fn panicking_service_gets_json_error() {
        let base = spawn_facade().await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("{base}/chat"))
            .json(&serde_json::json!({"query": "explode"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error_body(response).await, "internal server error");

        // The server keeps answering after a panic.
        let response = client
            .post(format!("{base}/chat"))
            .json(&serde_json::json!({"query": "1 + 1"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_routes_and_methods_get_json_errors() {
        let base = spawn_facade().await;
        let client = reqwest::Client::new();

        let missing = client.get(format!("{base}/nowhere")).send().await.unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        assert_eq!(error_body(missing).await, "no such route");

        let wrong_method = client.get(format!("{base}/chat")).send().await.unwrap();
        assert_eq!(wrong_method.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(error_body(wrong_method).await, "method not allowed");
    }
}
