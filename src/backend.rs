//! Client for the published conversation API of the chat backend.
//!
//! `POST /conversation` submits a prompt; `GET /conversation/{id}` reads the
//! conversation tree back. Replies appear only after the backend finishes
//! generating, so callers poll (see [`crate::relay`]).

use crate::error::BackendError;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Per-request timeout for every backend call.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Content type of textual content blocks.
pub const TEXT_CONTENT_TYPE: &str = "text";

/// Identifiers returned by a successful submission.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub conversation_id: String,
    pub message_id: String,
}

/// Conversation document as returned by `GET /conversation/{id}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub create_time: Option<f64>,
    pub message_map: HashMap<String, MessageNode>,
    #[serde(default)]
    pub last_message_id: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default)]
    pub should_continue: Option<bool>,
}

/// One turn of the backend's reply tree.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageNode {
    pub role: String,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub children: Vec<String>,
    #[serde(default)]
    pub parent: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentBlock {
    pub content_type: String,
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub body: String,
}

impl MessageNode {
    /// Body of the first textual content block, if any.
    pub fn first_text(&self) -> Option<&str> {
        self.content
            .iter()
            .find(|block| block.content_type == TEXT_CONTENT_TYPE)
            .map(|block| block.body.as_str())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PostMessageRequest<'a> {
    message: PostMessageBody<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PostMessageBody<'a> {
    content: Vec<PostContent<'a>>,
    model: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PostContent<'a> {
    content_type: &'static str,
    body: &'a str,
}

/// Operations the relay needs from the backend.
pub trait ConversationBackend: Send + Sync {
    /// Create a conversation whose root message is `prompt`.
    fn submit(
        &self,
        prompt: &str,
        model: &str,
    ) -> impl std::future::Future<Output = Result<Submission, BackendError>> + Send;

    /// Read the current state of a conversation.
    fn conversation(
        &self,
        conversation_id: &str,
    ) -> impl std::future::Future<Output = Result<Conversation, BackendError>> + Send;
}

/// HTTP implementation of [`ConversationBackend`].
#[derive(Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl BackendClient {
    /// `http` is the process-wide client; endpoint and key come from the trigger.
    pub fn new(http: reqwest::Client, endpoint: &url::Url, api_key: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.as_str().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint, path)
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, BackendError> {
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(BackendError::NotFound);
        }
        if !status.is_success() {
            let body = error_body(response.text().await);
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|error| BackendError::Decode(error.to_string()))
    }
}

/// Body text for a non-success status, or a marker when it could not be read.
fn error_body<E: std::fmt::Display>(body: Result<String, E>) -> String {
    body.unwrap_or_else(|error| format!("<unreadable body: {error}>"))
}

impl ConversationBackend for BackendClient {
    async fn submit(&self, prompt: &str, model: &str) -> Result<Submission, BackendError> {
        let request = PostMessageRequest {
            message: PostMessageBody {
                content: vec![PostContent {
                    content_type: TEXT_CONTENT_TYPE,
                    body: prompt,
                }],
                model,
            },
        };

        let response = self
            .http
            .post(self.url("conversation"))
            .header("x-api-key", &self.api_key)
            .timeout(REQUEST_TIMEOUT)
            .json(&request)
            .send()
            .await?;

        let submission: Submission = Self::read_json(response).await?;
        if submission.conversation_id.is_empty() || submission.message_id.is_empty() {
            return Err(BackendError::Decode(
                "empty conversationId or messageId".into(),
            ));
        }
        Ok(submission)
    }

    async fn conversation(&self, conversation_id: &str) -> Result<Conversation, BackendError> {
        let response = self
            .http
            .get(self.url(&format!("conversation/{conversation_id}")))
            .header("x-api-key", &self.api_key)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        Self::read_json(response).await
    }
}
