//! HTTP ingress: accepts workflow-style triggers and hands them to background
//! relay tasks.

mod invoke;
mod server;
mod state;

pub use server::start_http_server;
pub use state::ApiState;
