//! Upstream calls: chat session creation and the completion request.

use futures::StreamExt;
use reqwest::{header, Client, StatusCode};
use serde_json::Value;

use super::classify::CallFailure;
use super::{ChatBody, ChatRequest, Dispatcher};
use crate::utils::http::truncate_body;
use qwenpool_types::models::SessionCookies;

const NEW_CHAT_PATH: &str = "/api/v2/chats/new";
const COMPLETIONS_PATH: &str = "/api/v2/chat/completions";
const ERROR_BODY_LIMIT: usize = 500;

/// Header set shared by both calls.
pub(super) fn build_headers(
    access_token: &str,
    cookies: Option<&SessionCookies>,
) -> Result<header::HeaderMap, String> {
    let mut headers = header::HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, header::HeaderValue::from_static("application/json"));
    headers.insert(header::CONNECTION, header::HeaderValue::from_static("keep-alive"));
    headers.insert(
        header::AUTHORIZATION,
        header::HeaderValue::from_str(&format!("Bearer {}", access_token))
            .map_err(|e| e.to_string())?,
    );
    if let Some(cookies) = cookies {
        headers.insert(
            header::COOKIE,
            header::HeaderValue::from_str(&cookies.header_value()).map_err(|e| e.to_string())?,
        );
    }
    Ok(headers)
}

/// Both calls succeed only on `200 OK`; any other status is reported with its code.
async fn status_failure(response: reqwest::Response) -> CallFailure {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    CallFailure::Status { status, body: truncate_body(&body, ERROR_BODY_LIMIT) }
}

impl Dispatcher {
    /// Ask the upstream for a fresh chat id scoped to `model`.
    pub(super) async fn create_session(
        &self,
        client: &Client,
        headers: header::HeaderMap,
        model: &str,
    ) -> Result<String, CallFailure> {
        let body = serde_json::json!({
            "title": "New Chat",
            "models": [model],
            "chat_mode": "local",
            "chat_type": "t2i",
            "timestamp": chrono::Utc::now().timestamp_millis(),
        });

        let response = client
            .post(format!("{}{}", self.chat_base_url, NEW_CHAT_PATH))
            .headers(headers)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| CallFailure::from_reqwest(&e))?;

        if response.status() != StatusCode::OK {
            return Err(status_failure(response).await);
        }

        let data: Value = response.json().await.map_err(|e| CallFailure::from_reqwest(&e))?;
        data.pointer("/data/id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                CallFailure::Malformed(format!(
                    "session response carried no id: {}",
                    truncate_body(&data.to_string(), ERROR_BODY_LIMIT)
                ))
            })
    }

    /// Issue the completion call against `chat_id`, buffered or streamed.
    ///
    /// The timeout bounds the whole exchange for buffered calls and the
    /// time to response headers for streamed ones.
    pub(super) async fn complete(
        &self,
        client: &Client,
        headers: header::HeaderMap,
        chat_id: &str,
        request: &ChatRequest,
    ) -> Result<ChatBody, CallFailure> {
        let builder = client
            .post(format!("{}{}", self.chat_base_url, COMPLETIONS_PATH))
            .query(&[("chat_id", chat_id)])
            .headers(headers)
            .json(&request.upstream_body());

        if request.stream {
            let response = tokio::time::timeout(self.timeout, builder.send())
                .await
                .map_err(|_| CallFailure::Transport("completion timed out".to_string()))?
                .map_err(|e| CallFailure::from_reqwest(&e))?;
            if response.status() != StatusCode::OK {
                return Err(status_failure(response).await);
            }
            return Ok(ChatBody::Stream(response.bytes_stream().boxed()));
        }

        let response =
            builder.timeout(self.timeout).send().await.map_err(|e| CallFailure::from_reqwest(&e))?;
        if response.status() != StatusCode::OK {
            return Err(status_failure(response).await);
        }
        let body: Value = response.json().await.map_err(|e| CallFailure::from_reqwest(&e))?;
        Ok(ChatBody::Json(body))
    }
}
