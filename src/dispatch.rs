//! Reply dispatch: resolve where the reply goes and post it as Block Kit.

use crate::error::{Error, Result};
use crate::messaging::{ChatPlatform, OutboundMessage};
use crate::reference;

use regex::Regex;
use serde::Serialize;
use slack_morphism::prelude::*;

/// Default shape of a reply target that names a user: `U…` for regular users,
/// `W…` for enterprise-grid workspace users.
pub const DEFAULT_USER_ID_PATTERN: &str = r"^[UW]\S+";

/// Decides whether a reply descriptor names a user (and so wants a DM).
#[derive(Debug, Clone)]
pub struct UserIdPattern(Regex);

impl UserIdPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(Self)
            .map_err(|error| Error::Validation(format!("invalid user id pattern `{pattern}`: {error}")))
    }

    pub fn is_match(&self, descriptor: &str) -> bool {
        self.0.is_match(descriptor)
    }
}

impl Default for UserIdPattern {
    fn default() -> Self {
        Self(Regex::new(DEFAULT_USER_ID_PATTERN).expect("hardcoded regex"))
    }
}

/// Where a reply is posted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Destination {
    /// Reply in a thread of a channel.
    Thread { channel: String, thread_ts: String },
    /// Reply in the bot's DM with a user.
    DirectMessage { user_id: String },
}

impl Destination {
    /// Interpret a reply descriptor: a user id opens a DM, anything else must
    /// be a permalink whose thread receives the reply.
    pub fn from_descriptor(descriptor: &str, user_ids: &UserIdPattern) -> Result<Self> {
        if user_ids.is_match(descriptor) {
            return Ok(Destination::DirectMessage {
                user_id: descriptor.to_string(),
            });
        }
        let reference = reference::resolve(descriptor)?;
        Ok(Destination::Thread {
            thread_ts: reference.thread_root().to_string(),
            channel: reference.channel,
        })
    }
}

/// Content placed above the reply.
#[derive(Debug, Clone)]
pub enum Preamble {
    /// Rendered as a single plain-text section.
    Text(String),
    /// Caller-built Block Kit blocks, checked at validation and posted as given.
    Blocks(Vec<SlackBlock>),
}

/// Build the block sequence: preamble blocks, then exactly one reply section.
pub fn compose_blocks(
    reply_text: &str,
    preamble: Option<&Preamble>,
    parse_markdown: bool,
) -> Vec<SlackBlock> {
    let mut blocks = match preamble {
        None => Vec::new(),
        Some(Preamble::Text(text)) => vec![section(SlackBlockText::Plain(
            SlackBlockPlainText::new(text.clone()),
        ))],
        Some(Preamble::Blocks(preamble_blocks)) => preamble_blocks.clone(),
    };

    let reply = if parse_markdown {
        SlackBlockText::MarkDown(SlackBlockMarkDownText::new(reply_text.to_string()))
    } else {
        SlackBlockText::Plain(SlackBlockPlainText::new(reply_text.to_string()))
    };
    blocks.push(section(reply));
    blocks
}

fn section(text: SlackBlockText) -> SlackBlock {
    SlackBlock::Section(SlackSectionBlock::new().with_text(text))
}

/// Where a reply ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedReply {
    pub channel: String,
    pub thread_ts: Option<String>,
    pub ts: String,
}

/// Posts relayed replies.
pub struct ReplyDispatcher<'a, P> {
    platform: &'a P,
}

impl<'a, P: ChatPlatform> ReplyDispatcher<'a, P> {
    pub fn new(platform: &'a P) -> Self {
        Self { platform }
    }

    /// Resolve `destination` and post exactly one message.
    pub async fn dispatch(
        &self,
        reply_text: &str,
        preamble: Option<&Preamble>,
        parse_markdown: bool,
        destination: &Destination,
    ) -> Result<PostedReply> {
        let (channel, thread_ts) = match destination {
            Destination::Thread { channel, thread_ts } => {
                (channel.clone(), Some(thread_ts.clone()))
            }
            Destination::DirectMessage { user_id } => {
                let channel = self.platform.open_direct_message(user_id).await?;
                tracing::debug!(user_id = %user_id, channel_id = %channel, "opened DM channel");
                (channel, None)
            }
        };

        let message = OutboundMessage {
            channel: channel.clone(),
            thread_ts: thread_ts.clone(),
            text: reply_text.to_string(),
            blocks: compose_blocks(reply_text, preamble, parse_markdown),
        };
        let ts = self.platform.post_message(message).await?;

        tracing::info!(
            channel_id = %channel,
            thread_ts = thread_ts.as_deref().unwrap_or("-"),
            "posted reply to slack"
        );

        Ok(PostedReply {
            channel,
            thread_ts,
            ts,
        })
    }
}
