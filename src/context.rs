//! Context assembly: target message, surrounding thread and author names.

use crate::error::{Error, Result};
use crate::messaging::{ChatPlatform, PlatformMessage, RepliesQuery};
use crate::reference::MessageReference;

use serde::Serialize;
use std::collections::HashMap;

/// Upper bound for `fetch_thread_limit`, matching Slack's page cap.
pub const MAX_FETCH_THREAD_LIMIT: u16 = 1000;

/// A message of the thread being assembled.
pub type ThreadMessage = PlatformMessage;

/// Rendering context shared by the prompt and preamble templates.
#[derive(Debug, Clone, Serialize)]
pub struct TemplateContext {
    pub url: String,
    pub ts: String,
    /// ISO-8601 rendering of `ts`.
    pub timestamp: String,
    /// Display name of the author, or the raw id when unknown.
    pub user: String,
    pub message: String,
    pub text: String,
    pub thread: Vec<ThreadMessageView>,
}

/// A thread entry as seen by templates.
#[derive(Debug, Clone, Serialize)]
pub struct ThreadMessageView {
    pub ts: String,
    pub timestamp: String,
    pub user: String,
    pub user_id: String,
    pub text: String,
}

/// Fetches the message behind a reference together with its thread.
pub struct ContextAssembler<'a, P> {
    platform: &'a P,
}

impl<'a, P: ChatPlatform> ContextAssembler<'a, P> {
    pub fn new(platform: &'a P) -> Self {
        Self { platform }
    }

    /// Resolve the referenced message and up to `fetch_thread_limit` entries of
    /// its thread.
    ///
    /// Returns the target and the collected thread. When the target lies outside
    /// the fetched window it is appended to the end of the thread.
    pub async fn assemble(
        &self,
        reference: &MessageReference,
        fetch_thread_limit: u16,
    ) -> Result<(ThreadMessage, Vec<ThreadMessage>)> {
        let mut thread = Vec::new();
        let mut target = None;

        if fetch_thread_limit > 0 || reference.thread_ts.is_none() {
            let query = RepliesQuery::new(
                &reference.channel,
                reference.thread_root(),
                fetch_thread_limit.clamp(1, MAX_FETCH_THREAD_LIMIT),
            );
            thread = self.platform.thread_replies(query).await?;
            target = thread.iter().find(|m| m.ts == reference.ts).cloned();
        }

        if target.is_none()
            && let Some(thread_ts) = &reference.thread_ts
        {
            tracing::debug!(
                channel_id = %reference.channel,
                ts = %reference.ts,
                "target outside fetched thread window, fetching it directly"
            );
            let query = RepliesQuery::new(&reference.channel, thread_ts, 1).up_to(&reference.ts);
            let found = self
                .platform
                .thread_replies(query)
                .await?
                .pop()
                .filter(|m| m.ts == reference.ts);
            if let Some(message) = found {
                thread.push(message.clone());
                target = Some(message);
            }
        }

        if target.is_none() && reference.thread_ts.is_none() {
            // Channel messages without replies may not be served by
            // conversations.replies on every workspace plan.
            target = self
                .platform
                .channel_message(&reference.channel, &reference.ts)
                .await?;
            if let Some(message) = &target
                && thread.is_empty()
            {
                thread.push(message.clone());
            }
        }

        let target = target.ok_or_else(|| Error::MessageNotFound {
            channel: reference.channel.clone(),
            ts: reference.ts.clone(),
        })?;

        Ok((target, thread))
    }

    /// Build the id → display name directory. Ids missing from the result are
    /// rendered as-is by [`display_name`].
    pub async fn resolve_users(&self) -> Result<HashMap<String, String>> {
        let members = self.platform.list_members().await?;
        Ok(members
            .into_iter()
            .map(|member| (member.id, member.display_name))
            .collect())
    }

    /// Run both fetches concurrently and build the template context.
    pub async fn template_context(
        &self,
        url: &str,
        reference: &MessageReference,
        fetch_thread_limit: u16,
    ) -> Result<TemplateContext> {
        let (messages, users) = tokio::join!(
            self.assemble(reference, fetch_thread_limit),
            self.resolve_users()
        );
        let (target, thread) = messages?;
        let users = users?;

        tracing::info!(
            channel_id = %reference.channel,
            ts = %reference.ts,
            thread_len = thread.len(),
            users = users.len(),
            "assembled message context"
        );

        Ok(build_context(url, &target, &thread, &users))
    }
}

/// Flatten a resolved message and its thread into a [`TemplateContext`].
pub fn build_context(
    url: &str,
    target: &ThreadMessage,
    thread: &[ThreadMessage],
    users: &HashMap<String, String>,
) -> TemplateContext {
    let thread = thread
        .iter()
        .map(|message| ThreadMessageView {
            ts: message.ts.clone(),
            timestamp: iso_timestamp(&message.ts),
            user: display_name(users, message.user.as_deref()),
            user_id: message.user.clone().unwrap_or_default(),
            text: message.text.clone(),
        })
        .collect();

    TemplateContext {
        url: url.to_string(),
        ts: target.ts.clone(),
        timestamp: iso_timestamp(&target.ts),
        user: display_name(users, target.user.as_deref()),
        message: target.text.clone(),
        text: target.text.clone(),
        thread,
    }
}

/// Display name for a user id, falling back to the raw id.
pub fn display_name(users: &HashMap<String, String>, user_id: Option<&str>) -> String {
    match user_id {
        Some(id) => users.get(id).cloned().unwrap_or_else(|| id.to_string()),
        None => String::new(),
    }
}

/// Convert a Slack `seconds.micros` timestamp to ISO-8601 with millisecond
/// precision. Unparseable input is returned unchanged.
pub fn iso_timestamp(ts: &str) -> String {
    let (seconds, fraction) = ts.split_once('.').unwrap_or((ts, "0"));
    let Ok(seconds) = seconds.parse::<i64>() else {
        return ts.to_string();
    };
    let micros = format!("{fraction:0<6}")
        .get(..6)
        .and_then(|digits| digits.parse::<u32>().ok())
        .unwrap_or(0);

    chrono::DateTime::<chrono::Utc>::from_timestamp(seconds, micros * 1000)
        .map(|datetime| datetime.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
        .unwrap_or_else(|| ts.to_string())
}
