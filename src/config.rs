//! Configuration loading and validation.
//!
//! Values come from an optional TOML file, overridden by environment
//! variables. Every field has a default except the Slack bot token, which is
//! only required by commands that talk to Slack.

use crate::dispatch::{DEFAULT_USER_ID_PATTERN, UserIdPattern};
use crate::error::{ConfigError, Result};

use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Prompt used when a trigger does not supply one.
pub const DEFAULT_PROMPT_TEMPLATE: &str = "<message>\n{{message}}\n</message>\nPlease answer the question in the message tag. Markdown formatting is available.";

pub const DEFAULT_MODEL: &str = "claude-v3.5-sonnet";

pub const DEFAULT_BIND: &str = "127.0.0.1:8787";

/// threadrelay configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub slack: SlackConfig,
    pub api: ApiConfig,
    pub defaults: RelayDefaults,
    pub reply: ReplyConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Default)]
pub struct SlackConfig {
    pub bot_token: Option<String>,
}

/// HTTP ingress settings.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind: SocketAddr,
}

/// Values used for trigger inputs the caller leaves out.
#[derive(Debug, Clone)]
pub struct RelayDefaults {
    pub api_endpoint: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
    pub prompt_template: String,
}

impl Default for RelayDefaults {
    fn default() -> Self {
        Self {
            api_endpoint: None,
            api_key: None,
            model: DEFAULT_MODEL.into(),
            prompt_template: DEFAULT_PROMPT_TEMPLATE.into(),
        }
    }
}

/// Reply routing settings.
#[derive(Debug, Clone)]
pub struct ReplyConfig {
    /// Reply descriptors matching this pattern are treated as user ids.
    pub user_id_pattern: String,
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            user_id_pattern: DEFAULT_USER_ID_PATTERN.into(),
        }
    }
}

/// OpenTelemetry export settings. Export is disabled without an endpoint.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub otlp_endpoint: Option<String>,
    pub otlp_headers: HashMap<String, String>,
    pub service_name: String,
    pub sample_rate: f64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            otlp_headers: HashMap::new(),
            service_name: "threadrelay".into(),
            sample_rate: 1.0,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TomlConfig {
    #[serde(default)]
    slack: TomlSlack,
    #[serde(default)]
    api: TomlApi,
    #[serde(default)]
    defaults: TomlDefaults,
    #[serde(default)]
    reply: TomlReply,
    #[serde(default)]
    telemetry: TomlTelemetry,
}

#[derive(Debug, Default, Deserialize)]
struct TomlSlack {
    bot_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TomlApi {
    bind: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TomlDefaults {
    api_endpoint: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    prompt_template: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TomlReply {
    user_id_pattern: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TomlTelemetry {
    otlp_endpoint: Option<String>,
    #[serde(default)]
    otlp_headers: HashMap<String, String>,
    service_name: Option<String>,
    sample_rate: Option<f64>,
}

impl Config {
    /// Load configuration from the given file (or the default location, when
    /// it exists) and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let toml = match path {
            Some(path) => read_toml(path)?,
            None => match Self::default_config_path().filter(|path| path.exists()) {
                Some(path) => read_toml(&path)?,
                None => TomlConfig::default(),
            },
        };
        Self::from_sources(toml, |key| std::env::var(key).ok())
    }

    /// `<config dir>/threadrelay/config.toml`.
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("threadrelay").join("config.toml"))
    }

    /// Parse a TOML document and overlay the given environment.
    pub fn from_toml_str(
        content: &str,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let toml = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: "<inline>".into(),
            source,
        })?;
        Self::from_sources(toml, env)
    }

    fn from_sources(toml: TomlConfig, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env = |key: &str| env(key).filter(|value| !value.is_empty());

        let bind = env("THREADRELAY_BIND")
            .or(toml.api.bind)
            .unwrap_or_else(|| DEFAULT_BIND.into());
        let bind = bind
            .parse()
            .map_err(|error| ConfigError::Invalid(format!("bind address `{bind}`: {error}")))?;

        let user_id_pattern = env("THREADRELAY_USER_ID_PATTERN")
            .or(toml.reply.user_id_pattern)
            .unwrap_or_else(|| DEFAULT_USER_ID_PATTERN.into());
        // Reject a broken pattern at startup rather than on the first trigger.
        UserIdPattern::new(&user_id_pattern)
            .map_err(|error| ConfigError::Invalid(error.to_string()))?;

        let sample_rate = toml.telemetry.sample_rate.unwrap_or(1.0);
        if !(0.0..=1.0).contains(&sample_rate) {
            return Err(ConfigError::Invalid(format!(
                "telemetry.sample_rate must be within 0.0..=1.0, got {sample_rate}"
            ))
            .into());
        }

        Ok(Self {
            slack: SlackConfig {
                bot_token: env("SLACK_BOT_TOKEN").or(toml.slack.bot_token),
            },
            api: ApiConfig { bind },
            defaults: RelayDefaults {
                api_endpoint: env("DEFAULT_API_ENDPOINT").or(toml.defaults.api_endpoint),
                api_key: env("DEFAULT_API_KEY").or(toml.defaults.api_key),
                model: env("DEFAULT_MODEL")
                    .or(toml.defaults.model)
                    .unwrap_or_else(|| DEFAULT_MODEL.into()),
                prompt_template: env("DEFAULT_PROMPT_TEMPLATE")
                    .or(toml.defaults.prompt_template)
                    .unwrap_or_else(|| DEFAULT_PROMPT_TEMPLATE.into()),
            },
            reply: ReplyConfig { user_id_pattern },
            telemetry: TelemetryConfig {
                otlp_endpoint: env("OTEL_EXPORTER_OTLP_ENDPOINT").or(toml.telemetry.otlp_endpoint),
                otlp_headers: toml.telemetry.otlp_headers,
                service_name: toml
                    .telemetry
                    .service_name
                    .unwrap_or_else(|| TelemetryConfig::default().service_name),
                sample_rate,
            },
        })
    }

    /// The Slack bot token, required by every command that calls Slack.
    pub fn slack_bot_token(&self) -> Result<&str> {
        self.slack
            .bot_token
            .as_deref()
            .ok_or_else(|| ConfigError::MissingKey("SLACK_BOT_TOKEN".into()).into())
    }

    pub fn user_id_pattern(&self) -> Result<UserIdPattern> {
        UserIdPattern::new(&self.reply.user_id_pattern)
    }
}

fn read_toml(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Load {
        path: path.display().to_string(),
        source,
    })?;
    let toml = toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })?;
    Ok(toml)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn defaults_apply_without_sources() {
        let config = Config::from_toml_str("", no_env).unwrap();

        assert_eq!(config.api.bind.to_string(), DEFAULT_BIND);
        assert_eq!(config.defaults.model, DEFAULT_MODEL);
        assert_eq!(config.defaults.prompt_template, DEFAULT_PROMPT_TEMPLATE);
        assert_eq!(config.reply.user_id_pattern, DEFAULT_USER_ID_PATTERN);
        assert!(config.telemetry.otlp_endpoint.is_none());
        assert!(matches!(
            config.slack_bot_token(),
            Err(Error::Config(ConfigError::MissingKey(_)))
        ));
    }

    #[test]
    fn environment_overrides_file() {
        let toml = r#"
            [slack]
            bot_token = "xoxb-file"

            [defaults]
            api_endpoint = "https://file.example.com"
            model = "file-model"

            [api]
            bind = "0.0.0.0:9000"
        "#;
        let env = |key: &str| match key {
            "SLACK_BOT_TOKEN" => Some("xoxb-env".to_string()),
            "DEFAULT_MODEL" => Some(String::new()),
            "DEFAULT_API_KEY" => Some("env-key".to_string()),
            _ => None,
        };

        let config = Config::from_toml_str(toml, env).unwrap();

        assert_eq!(config.slack_bot_token().unwrap(), "xoxb-env");
        assert_eq!(
            config.defaults.api_endpoint.as_deref(),
            Some("https://file.example.com")
        );
        assert_eq!(config.defaults.api_key.as_deref(), Some("env-key"));
        // Empty environment values do not override the file.
        assert_eq!(config.defaults.model, "file-model");
        assert_eq!(config.api.bind.port(), 9000);
    }

    #[test]
    fn rejects_invalid_values() {
        for toml in [
            "[api]\nbind = \"nowhere\"",
            "[reply]\nuser_id_pattern = \"(\"",
            "[telemetry]\nsample_rate = 2.0",
            "[unknown]\nkey = 1",
        ] {
            assert!(Config::from_toml_str(toml, no_env).is_err(), "{toml}");
        }
    }
}
