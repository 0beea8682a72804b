//! `POST /api/invoke`: validate a trigger and start a relay cycle.

use super::state::ApiState;
use crate::error::{Error, Result};
use crate::messaging::ChatPlatform;
use crate::trigger::{IngressInputs, RelayRequest};
use crate::worker::report_failure;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub(super) struct InvokeResponse {
    status: &'static str,
}

#[derive(Debug, Serialize)]
pub(super) struct ErrorResponse {
    error: String,
}

/// Accept a trigger and return as soon as it is validated. The relay itself
/// runs on a spawned task and reports failures through the log.
pub(super) async fn invoke<P: ChatPlatform>(
    State(state): State<Arc<ApiState<P>>>,
    body: Bytes,
) -> std::result::Result<(StatusCode, Json<InvokeResponse>), (StatusCode, Json<ErrorResponse>)> {
    let request = match parse_request(&state, &body) {
        Ok(request) => request,
        Err(error) => {
            tracing::warn!(%error, "rejected invoke request");
            let status = if error.is_validation() {
                StatusCode::BAD_REQUEST
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            return Err((
                status,
                Json(ErrorResponse {
                    error: error.to_string(),
                }),
            ));
        }
    };

    let worker = state.worker.clone();
    tokio::spawn(async move {
        if let Err(error) = worker.run(request).await {
            report_failure(&error);
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(InvokeResponse { status: "accepted" }),
    ))
}

fn parse_request<P>(state: &ApiState<P>, body: &[u8]) -> Result<RelayRequest> {
    let inputs: IngressInputs =
        serde_json::from_slice(body).map_err(|error| Error::Validation(error.to_string()))?;
    inputs
        .into_payload(&state.defaults)?
        .validate(&state.user_ids)
}
