//! Slack Web API adapter using slack-morphism.
//!
//! Reads: `conversations.replies`, `conversations.history`, `users.list`.
//! Writes: `conversations.open`, `chat.postMessage`.

use crate::error::{Error, Result};
use crate::messaging::traits::{
    ChatPlatform, Member, OutboundMessage, PlatformMessage, RepliesQuery,
};

use anyhow::Context as _;
use slack_morphism::prelude::*;
use std::sync::Arc;

/// Page size for `users.list`. Slack recommends no more than 200.
const USERS_PAGE_SIZE: u16 = 200;

/// Slack adapter.
pub struct SlackAdapter {
    /// Shared HTTP client, reused across all API calls.
    client: Arc<SlackHyperClient>,
    /// Pre-built API token wrapping the bot token.
    token: SlackApiToken,
}

impl SlackAdapter {
    pub fn new(bot_token: impl Into<String>) -> anyhow::Result<Self> {
        let client = Arc::new(SlackClient::new(
            SlackClientHyperConnector::new().context("failed to create slack HTTP connector")?,
        ));
        let token = SlackApiToken::new(SlackApiTokenValue(bot_token.into()));
        Ok(Self { client, token })
    }

    /// Open a session against the cached client using the cached bot token.
    fn session(&self) -> SlackClientSession<'_, SlackClientHyperHttpsConnector> {
        self.client.open_session(&self.token)
    }
}

impl ChatPlatform for SlackAdapter {
    async fn thread_replies(&self, query: RepliesQuery) -> Result<Vec<PlatformMessage>> {
        let request = replies_request(&query);
        let response = self
            .session()
            .conversations_replies(&request)
            .await
            .context("failed to fetch slack thread replies")
            .map_err(Error::Slack)?;

        let messages: Vec<PlatformMessage> =
            response.messages.iter().map(platform_message).collect();

        tracing::debug!(
            channel_id = %query.channel,
            thread_ts = %query.thread_ts,
            count = messages.len(),
            "fetched slack thread replies"
        );

        Ok(messages)
    }

    async fn channel_message(&self, channel: &str, ts: &str) -> Result<Option<PlatformMessage>> {
        let request = history_request(channel, ts);
        let response = self
            .session()
            .conversations_history(&request)
            .await
            .context("failed to fetch slack channel history")
            .map_err(Error::Slack)?;

        Ok(response
            .messages
            .iter()
            .map(platform_message)
            .find(|message| message.ts == ts))
    }

    async fn list_members(&self) -> Result<Vec<Member>> {
        let session = self.session();
        let mut members = Vec::new();
        let mut cursor: Option<SlackCursorId> = None;

        loop {
            let request = users_list_request(cursor.take());
            let response = session
                .users_list(&request)
                .await
                .context("failed to list slack users")
                .map_err(Error::Slack)?;

            members.extend(response.members.iter().map(|user| Member {
                id: user.id.0.clone(),
                display_name: resolve_display_name(user),
            }));

            cursor = next_page_cursor(response.response_metadata);
            if cursor.is_none() {
                break;
            }
        }

        tracing::debug!(count = members.len(), "fetched slack member directory");

        Ok(members)
    }

    async fn open_direct_message(&self, user_id: &str) -> Result<String> {
        let request = SlackApiConversationsOpenRequest::new()
            .with_users(vec![SlackUserId(user_id.to_string())]);
        let response = self
            .session()
            .conversations_open(&request)
            .await
            .context("failed to open slack DM conversation")
            .map_err(Error::Slack)?;
        Ok(response.channel.id.0)
    }

    async fn post_message(&self, message: OutboundMessage) -> Result<String> {
        let content = SlackMessageContent::new()
            .with_text(message.text)
            .with_blocks(message.blocks);
        let request = SlackApiChatPostMessageRequest::new(SlackChannelId(message.channel), content)
            .opt_thread_ts(message.thread_ts.map(SlackTs));
        let response = self
            .session()
            .chat_post_message(&request)
            .await
            .context("failed to send slack message")
            .map_err(Error::Slack)?;
        Ok(response.ts.0)
    }
}

fn platform_message(message: &SlackHistoryMessage) -> PlatformMessage {
    PlatformMessage {
        ts: message.origin.ts.0.clone(),
        user: message.sender.user.as_ref().map(|user| user.0.clone()),
        text: message.content.text.clone().unwrap_or_default(),
    }
}

/// Pick the most human-readable name Slack has for a user: profile display
/// name, then real name, then handle, then the raw id.
fn resolve_display_name(user: &SlackUser) -> String {
    let non_empty = |name: &Option<String>| name.clone().filter(|n| !n.trim().is_empty());
    user.profile
        .as_ref()
        .and_then(|profile| non_empty(&profile.display_name).or_else(|| non_empty(&profile.real_name)))
        .or_else(|| non_empty(&user.name))
        .unwrap_or_else(|| user.id.0.clone())
}

fn replies_request(query: &RepliesQuery) -> SlackApiConversationsRepliesRequest {
    SlackApiConversationsRepliesRequest::new(
        SlackChannelId(query.channel.clone()),
        SlackTs(query.thread_ts.clone()),
    )
    .with_limit(query.limit)
    .with_inclusive(query.inclusive)
    .opt_latest(query.latest.clone().map(SlackTs))
}

/// History is returned newest first, so bounding by `latest` (inclusive) with
/// a limit of one yields exactly the message at `ts` when it exists.
fn history_request(channel: &str, ts: &str) -> SlackApiConversationsHistoryRequest {
    SlackApiConversationsHistoryRequest::new()
        .with_channel(SlackChannelId(channel.to_string()))
        .with_latest(SlackTs(ts.to_string()))
        .with_inclusive(true)
        .with_limit(1)
}

fn users_list_request(cursor: Option<SlackCursorId>) -> SlackApiUsersListRequest {
    SlackApiUsersListRequest::new()
        .with_limit(USERS_PAGE_SIZE)
        .opt_cursor(cursor)
}

/// Slack signals the last page with a missing or empty `next_cursor`.
fn next_page_cursor(metadata: Option<SlackResponseMetadata>) -> Option<SlackCursorId> {
    metadata
        .and_then(|metadata| metadata.next_cursor)
        .filter(|next| !next.0.is_empty())
}

/// Parse caller-supplied Block Kit JSON into typed blocks.
///
/// Fails on the first block that is not a well-formed, known block type,
/// naming its index.
pub fn parse_blocks(values: &[serde_json::Value]) -> std::result::Result<Vec<SlackBlock>, String> {
    values
        .iter()
        .enumerate()
        .map(|(index, value)| {
            match serde_json::from_value::<SlackBlock>(value.clone()) {
                Ok(SlackBlock::Unknown(_)) => Err(format!(
                    "block {index} is not a well-formed Block Kit block: {value}"
                )),
                Ok(block) => Ok(block),
                Err(error) => Err(format!("block {index}: {error}")),
            }
        })
        .collect()
}
