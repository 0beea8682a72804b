//! Chat platform access (Slack).

pub mod slack;
pub mod traits;

pub use slack::SlackAdapter;
pub use traits::{ChatPlatform, Member, OutboundMessage, PlatformMessage, RepliesQuery};
