use crate::config::AppConfig;
use crate::ipc::error::err;
use crate::mirror::{MirrorStore, ACCESS_TOKEN_KEY};
use crate::remote::{ClientError, RemoteClient};
use serde_json::{json, Value};
use tracing::warn;

pub fn param_str<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

pub fn missing(id: &str, key: &str) -> Value {
    err(id, "bad_params", format!("missing params.{}", key), None)
}

pub fn no_workspace(id: &str) -> Value {
    err(id, "no_workspace", "select a workspace first", None)
}

/// The REST client carrying whatever access token is stored right now.
pub fn bearer_client(client: Option<&RemoteClient>, store: &MirrorStore) -> Option<RemoteClient> {
    client.map(|c| c.with_token(store.get_raw(ACCESS_TOKEN_KEY)))
}

/// Maps a client failure to an error response. Unauthorized also clears the
/// stored access token and tells the host where to navigate.
pub fn client_failure(id: &str, store: &MirrorStore, config: &AppConfig, e: ClientError) -> Value {
    if e.is_unauthorized() {
        if let Err(write) = store.remove(ACCESS_TOKEN_KEY) {
            warn!(error = %write, "failed to clear access token");
        }
        return err(
            id,
            e.code(),
            e.to_string(),
            Some(json!({ "navigate": config.sign_in_page })),
        );
    }
    err(id, e.code(), e.to_string(), e.details())
}
