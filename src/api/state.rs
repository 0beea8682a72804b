use crate::config::RelayDefaults;
use crate::dispatch::UserIdPattern;
use crate::messaging::{ChatPlatform, SlackAdapter};
use crate::worker::RelayWorker;

use std::sync::Arc;
use std::time::Instant;

/// Shared state for the HTTP handlers.
pub struct ApiState<P = SlackAdapter> {
    pub worker: Arc<RelayWorker<P>>,
    pub defaults: RelayDefaults,
    pub user_ids: UserIdPattern,
    pub started_at: Instant,
}

impl<P: ChatPlatform> ApiState<P> {
    pub fn new(worker: Arc<RelayWorker<P>>, defaults: RelayDefaults, user_ids: UserIdPattern) -> Self {
        Self {
            worker,
            defaults,
            user_ids,
            started_at: Instant::now(),
        }
    }
}
