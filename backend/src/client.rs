use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use draw_core::EquitySummary;
use http_body_util::BodyExt;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::de::DeserializeOwned;
use serde_json::json;
use tower::ServiceExt;

use crate::service::{Assignment, DrawState};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to build request: {0}")]
    Request(#[from] axum::http::Error),
    #[error("failed to read response body: {0}")]
    Body(#[from] axum::Error),
    #[error("server answered {status}: {message}")]
    Status { status: StatusCode, message: String },
    #[error("unexpected response payload: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Typed access to the draw routes, one method per route.
///
/// Requests are dispatched straight into the router, so callers inside the
/// process go through the same validation and error mapping as HTTP clients.
#[derive(Clone)]
pub struct ControllerClient {
    router: Router,
}

impl ControllerClient {
    pub fn new(router: Router) -> Self {
        Self { router }
    }

    pub async fn state(&self) -> Result<DrawState, ClientError> {
        self.send(Method::GET, "/draw/state".to_string(), None).await
    }

    pub async fn perform_draw(&self, seed: Option<u64>) -> Result<DrawState, ClientError> {
        let uri = match seed {
            Some(seed) => format!("/draw/perform?seed={seed}"),
            None => "/draw/perform".to_string(),
        };
        self.send(Method::POST, uri, None).await
    }

    pub async fn mark_played(&self, participant_id: &str) -> Result<DrawState, ClientError> {
        let body = json!({ "participantId": participant_id });
        self.send(Method::POST, "/draw/mark-played".to_string(), Some(body))
            .await
    }

    pub async fn reset(&self) -> Result<DrawState, ClientError> {
        self.send(Method::POST, "/draw/reset".to_string(), None).await
    }

    pub async fn equity(&self) -> Result<EquitySummary, ClientError> {
        self.send(Method::GET, "/draw/equity".to_string(), None).await
    }

    pub async fn assignments(&self, participant_id: &str) -> Result<Assignment, ClientError> {
        self.send(
            Method::GET,
            format!(
                "/draw/assignments/{}",
                utf8_percent_encode(participant_id, NON_ALPHANUMERIC)
            ),
            None,
        )
        .await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        uri: String,
        body: Option<serde_json::Value>,
    ) -> Result<T, ClientError> {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))?,
            None => builder.body(Body::empty())?,
        };

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .unwrap_or_else(|never| match never {});
        let status = response.status();
        let bytes = response.into_body().collect().await?.to_bytes();

        if !status.is_success() {
            return Err(ClientError::Status {
                status,
                message: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
        Ok(serde_json::from_slice(&bytes)?)
    }
}
