//! Trigger payloads and their validation.
//!
//! [`TriggerPayload`] is the loosely-typed JSON handed to the relay worker.
//! [`TriggerPayload::validate`] turns it into a [`RelayRequest`] or fails with
//! a validation error before anything touches the network.
//! [`IngressInputs`] is the Slack-workflow-function shape accepted by the HTTP
//! ingress; missing values are filled from [`RelayDefaults`].

use crate::config::RelayDefaults;
use crate::context::MAX_FETCH_THREAD_LIMIT;
use crate::dispatch::{Destination, Preamble, UserIdPattern};
use crate::messaging::slack::parse_blocks;
use crate::error::{Error, Result};
use crate::reference::{self, MessageReference};
use crate::template::Template;

use serde::{Deserialize, Serialize};

/// Raw trigger payload as received from the ingress or the CLI.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerPayload {
    pub api_endpoint: String,
    pub api_key: String,
    pub model: String,
    /// A fully rendered prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Permalink whose context is assembled into `prompt_template`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preamble: Option<PreambleInput>,
    /// A user id (reply by DM) or a permalink (reply in its thread).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch_thread_limit: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_markdown: Option<bool>,
}

/// Preamble as it arrives on the wire: a template string or raw Block Kit JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PreambleInput {
    Text(String),
    Blocks(Vec<serde_json::Value>),
}

/// How the prompt is obtained.
#[derive(Debug, Clone, PartialEq)]
pub enum PromptSource {
    Rendered(String),
    /// Assemble the referenced message's context and render `template`.
    Template {
        message_url: String,
        reference: MessageReference,
        template: String,
        fetch_thread_limit: u16,
    },
}

/// A validated request for one relay cycle.
#[derive(Debug, Clone)]
pub struct RelayRequest {
    pub api_endpoint: url::Url,
    pub api_key: String,
    pub model: String,
    pub prompt: PromptSource,
    pub preamble: Option<Preamble>,
    pub destination: Destination,
    pub parse_markdown: bool,
}

impl RelayRequest {
    /// The key with every character masked, for logging.
    pub fn masked_api_key(&self) -> String {
        "*".repeat(self.api_key.chars().count())
    }
}

impl TriggerPayload {
    /// Parse a JSON document into a payload.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|error| Error::Validation(error.to_string()))
    }

    pub fn validate(self, user_ids: &UserIdPattern) -> Result<RelayRequest> {
        let api_endpoint = url::Url::parse(&self.api_endpoint)
            .map_err(|error| invalid(format!("apiEndpoint: {error}")))?;
        if !matches!(api_endpoint.scheme(), "http" | "https") {
            return Err(invalid("apiEndpoint: must be an http(s) URL"));
        }
        let api_key = required("apiKey", Some(self.api_key))?;
        let model = required("model", Some(self.model))?;

        let fetch_thread_limit = match self.fetch_thread_limit {
            None => 0,
            Some(limit) if (0..=i64::from(MAX_FETCH_THREAD_LIMIT)).contains(&limit) => limit as u16,
            Some(limit) => {
                return Err(invalid(format!(
                    "fetchThreadLimit: {limit} is outside 0..={MAX_FETCH_THREAD_LIMIT}"
                )));
            }
        };

        let prompt = match (self.prompt, self.message_url) {
            (Some(_), Some(_)) => {
                return Err(invalid("prompt and messageUrl are mutually exclusive"));
            }
            (Some(prompt), None) => PromptSource::Rendered(required("prompt", Some(prompt))?),
            (None, Some(message_url)) => {
                let reference = reference::resolve(&message_url)
                    .map_err(|error| invalid(format!("messageUrl: {error}")))?;
                PromptSource::Template {
                    message_url,
                    reference,
                    template: required("promptTemplate", self.prompt_template)?,
                    fetch_thread_limit,
                }
            }
            (None, None) => return Err(invalid("one of prompt or messageUrl is required")),
        };

        let destination = match (self.reply_to, self.channel, self.thread_ts) {
            (Some(descriptor), None, None) => Destination::from_descriptor(&descriptor, user_ids)
                .map_err(|error| invalid(format!("replyTo: {error}")))?,
            (None, Some(channel), Some(thread_ts)) => Destination::Thread {
                channel: required("channel", Some(channel))?,
                thread_ts: required("threadTs", Some(thread_ts))?,
            },
            (Some(_), _, _) => {
                return Err(invalid("replyTo cannot be combined with channel/threadTs"));
            }
            _ => return Err(invalid("either replyTo or channel and threadTs are required")),
        };

        let preamble = self.preamble.map(validate_preamble).transpose()?;
        // Template syntax errors are caller errors; surface them before the hand-off.
        if let PromptSource::Template { template, .. } = &prompt {
            Template::parse(template)?;
            if let Some(Preamble::Text(text)) = &preamble {
                Template::parse(text)?;
            }
        }

        Ok(RelayRequest {
            api_endpoint,
            api_key,
            model,
            prompt,
            preamble,
            destination,
            parse_markdown: self.parse_markdown.unwrap_or(true),
        })
    }
}

/// Blocks are parsed into typed Block Kit here so a malformed block is
/// rejected before the relay runs, not by `chat.postMessage` afterwards.
fn validate_preamble(preamble: PreambleInput) -> Result<Preamble> {
    match preamble {
        PreambleInput::Text(text) if text.is_empty() => {
            Err(invalid("preamble: must not be empty"))
        }
        PreambleInput::Text(text) => Ok(Preamble::Text(text)),
        PreambleInput::Blocks(values) => parse_blocks(&values)
            .map(Preamble::Blocks)
            .map_err(|error| invalid(format!("preamble: {error}"))),
    }
}

fn required(field: &str, value: Option<String>) -> Result<String> {
    match value {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(invalid(format!("{field}: must be a non-empty string"))),
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::Validation(message.into())
}

/// Inputs of the Slack workflow function that triggers a relay.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IngressInputs {
    #[serde(default)]
    pub api_endpoint: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    pub message_url: String,
    #[serde(default)]
    pub prompt_text: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub preamble: Option<String>,
    /// Defaults to `message_url`, i.e. reply in the message's thread.
    #[serde(default)]
    pub reply_to: Option<String>,
    #[serde(default)]
    pub fetch_thread_limit: Option<i64>,
    #[serde(default)]
    pub parse_markdown: Option<bool>,
}

impl IngressInputs {
    /// Fill missing inputs from `defaults` and produce the worker payload.
    pub fn into_payload(self, defaults: &RelayDefaults) -> Result<TriggerPayload> {
        let non_empty = |value: Option<String>| value.filter(|v| !v.is_empty());

        let api_endpoint = non_empty(self.api_endpoint)
            .or_else(|| defaults.api_endpoint.clone())
            .ok_or_else(|| invalid("api_endpoint: not given and no default configured"))?;
        let api_key = non_empty(self.api_key)
            .or_else(|| defaults.api_key.clone())
            .ok_or_else(|| invalid("api_key: not given and no default configured"))?;

        Ok(TriggerPayload {
            api_endpoint,
            api_key,
            model: non_empty(self.model).unwrap_or_else(|| defaults.model.clone()),
            prompt: None,
            prompt_template: Some(
                non_empty(self.prompt_text).unwrap_or_else(|| defaults.prompt_template.clone()),
            ),
            preamble: non_empty(self.preamble).map(PreambleInput::Text),
            reply_to: Some(non_empty(self.reply_to).unwrap_or_else(|| self.message_url.clone())),
            message_url: Some(self.message_url),
            channel: None,
            thread_ts: None,
            fetch_thread_limit: self.fetch_thread_limit,
            parse_markdown: Some(self.parse_markdown.unwrap_or(true)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: serde_json::Value) -> TriggerPayload {
        serde_json::from_value(value).unwrap()
    }

    fn base() -> serde_json::Value {
        json!({
            "apiEndpoint": "https://bot.example.com/api",
            "apiKey": "k3y",
            "model": "claude-v3.5-sonnet",
            "prompt": "hello",
            "channel": "C1",
            "threadTs": "1700000000.000100"
        })
    }

    fn with(mut value: serde_json::Value, key: &str, field: serde_json::Value) -> serde_json::Value {
        value[key] = field;
        value
    }

    fn without(mut value: serde_json::Value, key: &str) -> serde_json::Value {
        value.as_object_mut().unwrap().remove(key);
        value
    }

    #[test]
    fn validates_rendered_prompt_into_thread() {
        let request = payload(base()).validate(&UserIdPattern::default()).unwrap();

        assert_eq!(request.api_endpoint.as_str(), "https://bot.example.com/api");
        assert_eq!(request.prompt, PromptSource::Rendered("hello".into()));
        assert_eq!(
            request.destination,
            Destination::Thread {
                channel: "C1".into(),
                thread_ts: "1700000000.000100".into(),
            }
        );
        assert!(request.parse_markdown);
        assert_eq!(request.masked_api_key(), "***");
    }

    #[test]
    fn validates_message_url_with_template() {
        let value = without(without(base(), "prompt"), "channel");
        let value = without(value, "threadTs");
        let value = with(value, "messageUrl", json!("https://x/archives/C1/p1700000000123456"));
        let value = with(value, "promptTemplate", json!("{{message}}"));
        let value = with(value, "replyTo", json!("U123"));
        let value = with(value, "fetchThreadLimit", json!(20));
        let value = with(value, "parseMarkdown", json!(false));

        let request = payload(value).validate(&UserIdPattern::default()).unwrap();

        match request.prompt {
            PromptSource::Template {
                reference,
                template,
                fetch_thread_limit,
                ..
            } => {
                assert_eq!(reference.ts, "1700000000.123456");
                assert_eq!(template, "{{message}}");
                assert_eq!(fetch_thread_limit, 20);
            }
            other => panic!("unexpected prompt source {other:?}"),
        }
        assert_eq!(
            request.destination,
            Destination::DirectMessage {
                user_id: "U123".into()
            }
        );
        assert!(!request.parse_markdown);
    }

    #[test]
    fn rejects_invalid_payloads() {
        let cases = [
            with(base(), "apiEndpoint", json!("not a url")),
            with(base(), "apiEndpoint", json!("ftp://bot.example.com")),
            with(base(), "apiKey", json!("")),
            with(base(), "model", json!("")),
            with(base(), "prompt", json!("")),
            without(base(), "prompt"),
            with(base(), "messageUrl", json!("https://x/archives/C1/p1700000000123456")),
            with(base(), "fetchThreadLimit", json!(1001)),
            with(base(), "fetchThreadLimit", json!(-1)),
            without(base(), "threadTs"),
            with(base(), "replyTo", json!("U1")),
            with(base(), "preamble", json!("")),
            with(base(), "preamble", json!([{"text": "no type"}])),
            with(
                without(without(base(), "channel"), "threadTs"),
                "replyTo",
                json!("https://x/files/F1"),
            ),
        ];
        for value in cases {
            let error = payload(value.clone())
                .validate(&UserIdPattern::default())
                .unwrap_err();
            assert!(matches!(error, Error::Validation(_)), "{value}");
        }
    }

    #[test]
    fn message_url_requires_template() {
        let value = with(
            without(base(), "prompt"),
            "messageUrl",
            json!("https://x/archives/C1/p1700000000123456"),
        );
        let error = payload(value).validate(&UserIdPattern::default()).unwrap_err();
        assert!(error.to_string().contains("promptTemplate"));
    }

    #[test]
    fn broken_templates_are_rejected() {
        let value = without(without(base(), "prompt"), "channel");
        let value = without(value, "threadTs");
        let value = with(value, "messageUrl", json!("https://x/archives/C1/p1700000000123456"));
        let value = with(value, "replyTo", json!("U123"));

        for (template, preamble) in [
            ("{{#thread}}{{text}}", json!(null)),
            ("{{message}}", json!("Asked by {{user")),
        ] {
            let value = with(value.clone(), "promptTemplate", json!(template));
            let value = with(value, "preamble", preamble);
            let error = payload(value).validate(&UserIdPattern::default()).unwrap_err();
            assert!(matches!(error, Error::Template(_)), "{template}");
            assert!(error.is_validation());
        }
    }

    #[test]
    fn preamble_blocks_are_parsed_at_validation() {
        let value = with(
            base(),
            "preamble",
            json!([
                {"type": "divider"},
                {"type": "section", "text": {"type": "mrkdwn", "text": "*ctx*"}}
            ]),
        );
        let request = payload(value).validate(&UserIdPattern::default()).unwrap();
        match request.preamble {
            Some(Preamble::Blocks(blocks)) => assert_eq!(blocks.len(), 2),
            other => panic!("unexpected preamble {other:?}"),
        }

        let request = payload(with(base(), "preamble", json!("Asked by Alice")))
            .validate(&UserIdPattern::default())
            .unwrap();
        assert!(matches!(request.preamble, Some(Preamble::Text(ref text)) if text == "Asked by Alice"));
    }

    #[test]
    fn malformed_preamble_blocks_are_rejected() {
        for blocks in [
            json!([{"type": "section", "text": 42}]),
            json!([{"type": "divider"}, {"type": "headr", "text": {"type": "plain_text", "text": "x"}}]),
            json!([{"text": "no type"}]),
        ] {
            let error = payload(with(base(), "preamble", blocks.clone()))
                .validate(&UserIdPattern::default())
                .unwrap_err();
            assert!(matches!(error, Error::Validation(_)), "{blocks}");
            assert!(error.to_string().contains("preamble"), "{error}");
        }
    }

    #[test]
    fn malformed_json_is_a_validation_error() {
        assert!(matches!(
            TriggerPayload::from_json("{\"apiEndpoint\": 3}"),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            TriggerPayload::from_json(&with(base(), "fetchThreadLimit", json!("ten")).to_string()),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn ingress_inputs_take_defaults() {
        let defaults = RelayDefaults {
            api_endpoint: Some("https://bot.example.com/api".into()),
            api_key: Some("default-key".into()),
            ..RelayDefaults::default()
        };
        let inputs: IngressInputs = serde_json::from_value(json!({
            "message_url": "https://x/archives/C1/p1700000000123456",
            "preamble": "Asked via workflow"
        }))
        .unwrap();

        let payload = inputs.into_payload(&defaults).unwrap();

        assert_eq!(payload.api_key, "default-key");
        assert_eq!(payload.model, defaults.model);
        assert_eq!(payload.prompt_template.as_deref(), Some(defaults.prompt_template.as_str()));
        assert_eq!(payload.reply_to, payload.message_url);
        assert_eq!(payload.preamble, Some(PreambleInput::Text("Asked via workflow".into())));

        let request = payload.validate(&UserIdPattern::default()).unwrap();
        assert_eq!(
            request.destination,
            Destination::Thread {
                channel: "C1".into(),
                thread_ts: "1700000000.123456".into(),
            }
        );
    }

    #[test]
    fn ingress_inputs_need_an_endpoint() {
        let inputs = IngressInputs {
            message_url: "https://x/archives/C1/p1700000000123456".into(),
            ..IngressInputs::default()
        };
        let error = inputs.into_payload(&RelayDefaults::default()).unwrap_err();
        assert!(error.is_validation());
    }
}
