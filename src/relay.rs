//! Conversation relay: submit a prompt, then poll until the backend replies.
//!
//! The backend exposes no completion signal, so completion is detected by
//! re-reading the conversation: the submitted message gains a child node once
//! the reply exists. Polling follows a fixed exponential schedule of
//! [`POLL_ATTEMPTS`] reads, sleeping `2 * 2^i` seconds before read `i`.
//!
//! The state transition is the pure function [`next_state`]; the loop in
//! [`relay`] only sleeps, reads and feeds results into it.

use crate::backend::{Conversation, ConversationBackend};
use crate::error::{BackendError, Error, Result};
use crate::telemetry;

use std::time::Duration;

/// Number of conversation reads before giving up.
pub const POLL_ATTEMPTS: u32 = 6;

/// Delay before the first read. Doubles for every following read.
pub const BASE_DELAY: Duration = Duration::from_secs(2);

/// Delay before read `attempt` (0-based).
pub fn backoff_delay(attempt: u32) -> Duration {
    BASE_DELAY * 2u32.pow(attempt)
}

/// Total time slept when every attempt is used (126 s).
pub fn poll_budget() -> Duration {
    (0..POLL_ATTEMPTS).map(backoff_delay).sum()
}

/// Abstracts `tokio::time::sleep` so the schedule can be tested without delays.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;
}

/// Real-time sleeper.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Whether a conversation read shows a reply to the submitted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// The reply exists. Carries the first text block (empty if none).
    Ready(String),
    /// The submitted message has no children yet.
    Pending,
}

/// Inspect a conversation for a reply to `message_id`. Pure and idempotent.
pub fn check_completion(conversation: &Conversation, message_id: &str) -> Completion {
    let Some(prompt) = conversation.message_map.get(message_id) else {
        return Completion::Pending;
    };
    let Some(reply_id) = prompt.children.first() else {
        return Completion::Pending;
    };
    let reply_text = conversation
        .message_map
        .get(reply_id)
        .and_then(|reply| reply.first_text())
        .unwrap_or_default()
        .to_string();
    Completion::Ready(reply_text)
}

/// Poll loop state. Submission happens before the machine starts.
#[derive(Debug)]
pub enum PollState {
    /// Waiting to perform read `attempt` (0-based).
    Polling { attempt: u32 },
    Completed { reply_text: String, attempts: u32 },
    TimedOut { elapsed: Duration },
    Failed(BackendError),
}

/// Transition after read `attempt` produced `read`.
pub fn next_state(
    attempt: u32,
    read: std::result::Result<Conversation, BackendError>,
    message_id: &str,
) -> PollState {
    let retry = || {
        if attempt + 1 >= POLL_ATTEMPTS {
            PollState::TimedOut {
                elapsed: poll_budget(),
            }
        } else {
            PollState::Polling {
                attempt: attempt + 1,
            }
        }
    };

    match read {
        Err(error) if error.is_not_found() => retry(),
        Err(error) => PollState::Failed(error),
        Ok(conversation) => match check_completion(&conversation, message_id) {
            Completion::Ready(reply_text) => PollState::Completed {
                reply_text,
                attempts: attempt + 1,
            },
            Completion::Pending => retry(),
        },
    }
}

/// Result of a completed relay cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayOutcome {
    pub conversation_id: String,
    pub message_id: String,
    pub reply_text: String,
    /// Number of reads performed, including the successful one.
    pub attempts: u32,
    /// Time spent sleeping between reads.
    pub waited: Duration,
}

/// Submit `prompt` and wait for the backend's reply.
pub async fn relay<B, S>(backend: &B, sleeper: &S, prompt: &str, model: &str) -> Result<RelayOutcome>
where
    B: ConversationBackend,
    S: Sleeper,
{
    let submission = backend
        .submit(prompt, model)
        .await
        .map_err(Error::Submission)?;
    tracing::info!(
        conversation_id = %submission.conversation_id,
        message_id = %submission.message_id,
        "posted prompt to backend"
    );

    let mut state = PollState::Polling { attempt: 0 };
    let mut waited = Duration::ZERO;

    loop {
        state = match state {
            PollState::Polling { attempt } => {
                let delay = backoff_delay(attempt);
                sleeper.sleep(delay).await;
                waited += delay;

                let read = backend.conversation(&submission.conversation_id).await;
                match &read {
                    Err(error) if error.is_not_found() => tracing::info!(
                        attempt = attempt + 1,
                        conversation_id = %submission.conversation_id,
                        "conversation not readable yet, retrying"
                    ),
                    Ok(conversation)
                        if check_completion(conversation, &submission.message_id)
                            == Completion::Pending =>
                    {
                        tracing::info!(
                            attempt = attempt + 1,
                            conversation_id = %submission.conversation_id,
                            "no reply yet, retrying"
                        )
                    }
                    _ => {}
                }
                next_state(attempt, read, &submission.message_id)
            }
            PollState::Completed {
                reply_text,
                attempts,
            } => {
                tracing::info!(
                    conversation_id = %submission.conversation_id,
                    attempts,
                    reply = %telemetry::preview(&reply_text, 100),
                    "received reply from backend"
                );
                return Ok(RelayOutcome {
                    conversation_id: submission.conversation_id,
                    message_id: submission.message_id,
                    reply_text,
                    attempts,
                    waited,
                });
            }
            PollState::TimedOut { elapsed } => {
                tracing::warn!(
                    conversation_id = %submission.conversation_id,
                    elapsed_secs = elapsed.as_secs(),
                    "backend did not reply within the poll budget"
                );
                return Err(Error::Timeout {
                    elapsed_secs: elapsed.as_secs(),
                });
            }
            PollState::Failed(error) => return Err(Error::Upstream(error)),
        };
    }
}
