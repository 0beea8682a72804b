//! Relay worker: runs one complete cycle for a validated trigger.

use crate::backend::{BackendClient, ConversationBackend};
use crate::context::ContextAssembler;
use crate::dispatch::{Preamble, PostedReply, ReplyDispatcher};
use crate::error::{Error, Result};
use crate::messaging::ChatPlatform;
use crate::relay::{self, RelayOutcome, Sleeper, TokioSleeper};
use crate::template::Template;
use crate::trigger::{PromptSource, RelayRequest};

use anyhow::Context as _;
use std::sync::Arc;

/// Result of a delivered relay cycle.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub outcome: RelayOutcome,
    pub posted: PostedReply,
}

/// Runs relay cycles against a shared Slack client and HTTP client.
pub struct RelayWorker<P, S = TokioSleeper> {
    platform: Arc<P>,
    http: reqwest::Client,
    sleeper: S,
}

impl<P: ChatPlatform> RelayWorker<P, TokioSleeper> {
    pub fn new(platform: Arc<P>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self::with_parts(platform, http, TokioSleeper))
    }
}

impl<P: ChatPlatform, S: Sleeper> RelayWorker<P, S> {
    pub fn with_parts(platform: Arc<P>, http: reqwest::Client, sleeper: S) -> Self {
        Self {
            platform,
            http,
            sleeper,
        }
    }

    /// Run one cycle using the HTTP backend named in the request.
    pub async fn run(&self, request: RelayRequest) -> Result<Delivery> {
        let backend = BackendClient::new(self.http.clone(), &request.api_endpoint, &request.api_key);
        self.run_with_backend(&backend, request).await
    }

    /// Run one cycle against the given backend.
    pub async fn run_with_backend<B: ConversationBackend>(
        &self,
        backend: &B,
        request: RelayRequest,
    ) -> Result<Delivery> {
        tracing::info!(
            api_endpoint = %request.api_endpoint,
            api_key = %request.masked_api_key(),
            model = %request.model,
            destination = ?request.destination,
            parse_markdown = request.parse_markdown,
            "starting relay cycle"
        );

        let (prompt, preamble) = self.prepare(&request).await?;

        let outcome = relay::relay(backend, &self.sleeper, &prompt, &request.model).await?;

        let posted = ReplyDispatcher::new(self.platform.as_ref())
            .dispatch(
                &outcome.reply_text,
                preamble.as_ref(),
                request.parse_markdown,
                &request.destination,
            )
            .await?;

        Ok(Delivery { outcome, posted })
    }

    /// Produce the final prompt and preamble, assembling message context when
    /// the prompt is a template.
    async fn prepare(&self, request: &RelayRequest) -> Result<(String, Option<Preamble>)> {
        match &request.prompt {
            PromptSource::Rendered(prompt) => Ok((prompt.clone(), request.preamble.clone())),
            PromptSource::Template {
                message_url,
                reference,
                template,
                fetch_thread_limit,
            } => {
                // Parse before any network call so a broken template fails fast.
                let prompt_template = Template::parse(template)?;
                let preamble_template = match &request.preamble {
                    Some(Preamble::Text(text)) => Some(Template::parse(text)?),
                    _ => None,
                };

                let context = ContextAssembler::new(self.platform.as_ref())
                    .template_context(message_url, reference, *fetch_thread_limit)
                    .await?;

                let prompt = prompt_template.render(&context)?;
                let preamble = match preamble_template {
                    Some(template) => Some(Preamble::Text(template.render(&context)?)),
                    None => request.preamble.clone(),
                };
                tracing::debug!(prompt_len = prompt.len(), "rendered prompt template");
                Ok((prompt, preamble))
            }
        }
    }
}

/// Log a failed background cycle. Failures are never dropped silently.
pub fn report_failure(error: &Error) {
    match error {
        Error::Timeout { elapsed_secs } => {
            tracing::error!(elapsed_secs, %error, "relay cycle timed out");
        }
        error if error.is_validation() => {
            tracing::error!(%error, "relay cycle rejected");
        }
        error => {
            tracing::error!(%error, "relay cycle failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::{FakePlatform, message};
    use crate::dispatch::UserIdPattern;
    use crate::error::BackendError;
    use crate::relay::tests::{RecordingSleeper, ScriptedBackend, answered, pending};
    use crate::trigger::TriggerPayload;
    use serde_json::json;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    fn platform() -> FakePlatform {
        FakePlatform::default()
            .with_thread(
                "1700000000.000100",
                vec![
                    message("1700000000.000100", Some("U1"), "What is Rust?"),
                    message("1700000001.000100", Some("U2"), "A language."),
                ],
            )
            .with_member("U1", "Alice")
            .with_member("U2", "Bob")
    }

    fn request(value: serde_json::Value) -> RelayRequest {
        serde_json::from_value::<TriggerPayload>(value)
            .unwrap()
            .validate(&UserIdPattern::default())
            .unwrap()
    }

    fn worker(platform: FakePlatform) -> RelayWorker<FakePlatform, RecordingSleeper> {
        RelayWorker::with_parts(
            Arc::new(platform),
            reqwest::Client::new(),
            RecordingSleeper::default(),
        )
    }

    #[tokio::test]
    async fn template_cycle_posts_reply_into_thread() {
        let worker = worker(platform());
        let backend = ScriptedBackend::new(vec![Ok(pending()), Ok(answered(&[("text", "Hello")]))]);
        let request = request(json!({
            "apiEndpoint": "https://bot.example.com",
            "apiKey": "k",
            "model": "m",
            "messageUrl": "https://x/archives/C1/p1700000000000100",
            "promptTemplate": "{{user}} asks: {{message}}",
            "preamble": "Question from {{user}}",
            "replyTo": "https://x/archives/C1/p1700000000000100",
            "fetchThreadLimit": 10
        }));

        let delivery = assert_ok!(worker.run_with_backend(&backend, request).await);

        assert_eq!(delivery.outcome.reply_text, "Hello");
        assert_eq!(delivery.outcome.attempts, 2);
        assert_eq!(worker.sleeper.total(), Duration::from_secs(6));
        assert_eq!(delivery.posted.channel, "C1");
        assert_eq!(delivery.posted.thread_ts.as_deref(), Some("1700000000.000100"));

        let posted = worker.platform.posted.lock().unwrap();
        assert_eq!(posted.len(), 1);
        let blocks = serde_json::to_value(&posted[0].blocks).unwrap();
        assert_eq!(blocks[0]["text"]["text"], "Question from Alice");
        assert_eq!(blocks[1]["text"]["type"], "mrkdwn");
        assert_eq!(blocks[1]["text"]["text"], "Hello");
    }

    #[tokio::test]
    async fn timeout_posts_nothing() {
        let worker = worker(platform());
        let backend = ScriptedBackend::new((0..6).map(|_| Ok(pending())).collect());
        let request = request(json!({
            "apiEndpoint": "https://bot.example.com",
            "apiKey": "k",
            "model": "m",
            "prompt": "already rendered",
            "replyTo": "U2"
        }));

        let error = assert_err!(worker.run_with_backend(&backend, request).await);

        assert!(matches!(error, Error::Timeout { elapsed_secs: 126 }));
        assert!(worker.platform.posted.lock().unwrap().is_empty());
        assert!(worker.platform.opened.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_message_fails_before_submission() {
        let worker = worker(platform());
        let backend = ScriptedBackend::new(vec![]);
        let request = request(json!({
            "apiEndpoint": "https://bot.example.com",
            "apiKey": "k",
            "model": "m",
            "messageUrl": "https://x/archives/C1/p1700000005000000?thread_ts=1700000000.000100",
            "promptTemplate": "{{message}}",
            "channel": "C1",
            "threadTs": "1700000000.000100"
        }));

        let error = assert_err!(worker.run_with_backend(&backend, request).await);

        assert!(matches!(error, Error::MessageNotFound { .. }));
        assert!(backend.submission.lock().unwrap().is_some());
    }

    #[tokio::test]
    async fn broken_template_fails_before_any_call() {
        let worker = worker(platform());
        let backend = ScriptedBackend::new(vec![]);
        let mut request = request(json!({
            "apiEndpoint": "https://bot.example.com",
            "apiKey": "k",
            "model": "m",
            "messageUrl": "https://x/archives/C1/p1700000000000100",
            "promptTemplate": "{{message}}",
            "replyTo": "U1"
        }));
        if let PromptSource::Template { template, .. } = &mut request.prompt {
            *template = "{{#thread}}unclosed".into();
        }

        let error = assert_err!(worker.run_with_backend(&backend, request).await);

        assert!(matches!(error, Error::Template(_)));
        assert!(worker.platform.queries().is_empty());
        assert!(backend.submission.lock().unwrap().is_some());
    }

    #[tokio::test]
    async fn rendered_prompt_with_block_preamble_goes_to_dm() {
        let worker = worker(platform());
        let backend = ScriptedBackend::new(vec![
            Err(BackendError::NotFound),
            Ok(answered(&[("text", "plain *text*")])),
        ]);
        let request = request(json!({
            "apiEndpoint": "https://bot.example.com",
            "apiKey": "k",
            "model": "m",
            "prompt": "hi",
            "preamble": [{"type": "divider"}],
            "replyTo": "W0DM",
            "parseMarkdown": false
        }));

        let delivery = assert_ok!(worker.run_with_backend(&backend, request).await);

        assert_eq!(delivery.posted.channel, "D-W0DM");
        assert_eq!(delivery.posted.thread_ts, None);
        let posted = worker.platform.posted.lock().unwrap();
        let blocks = serde_json::to_value(&posted[0].blocks).unwrap();
        assert_eq!(blocks[0]["type"], "divider");
        assert_eq!(blocks[1]["text"]["type"], "plain_text");
    }
}
