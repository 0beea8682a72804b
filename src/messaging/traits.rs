//! Chat platform trait consumed by context assembly and reply dispatch.

use crate::error::Result;

use slack_morphism::prelude::SlackBlock;

/// One message as read back from the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformMessage {
    pub ts: String,
    pub user: Option<String>,
    pub text: String,
}

/// Parameters for a `conversations.replies` read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepliesQuery {
    pub channel: String,
    /// Root of the thread to read.
    pub thread_ts: String,
    pub limit: u16,
    /// Upper bound on message timestamps.
    pub latest: Option<String>,
    pub inclusive: bool,
}

impl RepliesQuery {
    pub fn new(channel: impl Into<String>, thread_ts: impl Into<String>, limit: u16) -> Self {
        Self {
            channel: channel.into(),
            thread_ts: thread_ts.into(),
            limit,
            latest: None,
            inclusive: false,
        }
    }

    /// Only return messages up to and including `ts`.
    pub fn up_to(mut self, ts: impl Into<String>) -> Self {
        self.latest = Some(ts.into());
        self.inclusive = true;
        self
    }
}

/// An entry of the workspace member directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub id: String,
    pub display_name: String,
}

/// A composed outbound message.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub channel: String,
    pub thread_ts: Option<String>,
    /// Notification/accessibility fallback.
    pub text: String,
    pub blocks: Vec<SlackBlock>,
}

/// The subset of the Slack Web API the relay needs.
///
/// Implementations are constructed once per process and shared by reference.
pub trait ChatPlatform: Send + Sync + 'static {
    /// Read replies of a thread in chronological order.
    fn thread_replies(
        &self,
        query: RepliesQuery,
    ) -> impl std::future::Future<Output = Result<Vec<PlatformMessage>>> + Send;

    /// Read a single top-level channel message by its exact timestamp.
    fn channel_message(
        &self,
        channel: &str,
        ts: &str,
    ) -> impl std::future::Future<Output = Result<Option<PlatformMessage>>> + Send;

    /// Fetch the complete member directory.
    fn list_members(&self) -> impl std::future::Future<Output = Result<Vec<Member>>> + Send;

    /// Open (or reuse) a direct-message channel with a user. Returns the channel id.
    fn open_direct_message(
        &self,
        user_id: &str,
    ) -> impl std::future::Future<Output = Result<String>> + Send;

    /// Post a message. Returns the posted message's `ts`.
    fn post_message(
        &self,
        message: OutboundMessage,
    ) -> impl std::future::Future<Output = Result<String>> + Send;
}
