use crate::ipc::error::ok;
use crate::ipc::helpers::no_workspace;
use crate::ipc::types::{AppState, Request};
use crate::runtime;
use serde_json::json;
use tracing::debug;

/// The host saw the shared store change (another page wrote to it).
fn handle_changed(state: &mut AppState, req: &Request) -> serde_json::Value {
    if state.db.is_none() {
        return no_workspace(&req.id);
    }
    let key = req.params.get("key").and_then(|v| v.as_str());
    let refreshing = runtime::storage_changed(state);
    debug!(key = key.unwrap_or(""), views = refreshing.len(), "storage change signalled");
    ok(&req.id, json!({ "refreshing": refreshing }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "storage.changed" => Some(handle_changed(state, req)),
        _ => None,
    }
}
