//! threadrelay: turns a Slack message permalink into a prompt, relays it to a
//! conversational AI backend and posts the reply back to Slack.

pub mod api;
pub mod backend;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod messaging;
pub mod reference;
pub mod relay;
pub mod telemetry;
pub mod template;
pub mod trigger;
pub mod worker;

pub use error::{Error, Result};
