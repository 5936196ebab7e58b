use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;
use std::time::Instant;
use tracing::debug;

type TryHandle = fn(&mut AppState, &Request) -> Option<serde_json::Value>;

/// Method families in lookup order; the first module that claims a method answers it.
const HANDLERS: [TryHandle; 7] = [
    handlers::core::try_handle,
    handlers::grading::try_handle,
    handlers::setup::try_handle,
    handlers::assessments::try_handle,
    handlers::reports::try_handle,
    handlers::parent::try_handle,
    handlers::fees::try_handle,
];

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    let started = Instant::now();
    let resp = HANDLERS
        .iter()
        .find_map(|handle| handle(state, &req))
        .unwrap_or_else(|| {
            err(
                &req.id,
                "not_implemented",
                format!("unknown method: {}", req.method),
            )
        });

    debug!(
        target: "ipc",
        id = %req.id,
        method = %req.method,
        ok = resp["ok"].as_bool().unwrap_or(false),
        code = resp["error"]["code"].as_str().unwrap_or(""),
        elapsed_us = started.elapsed().as_micros() as u64,
        "request handled"
    );
    resp
}
