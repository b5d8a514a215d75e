use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{bearer_client, client_failure, missing, no_workspace, param_str};
use crate::ipc::types::{AppState, Request};
use crate::mirror::{MirrorStore, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
use crate::remote::ClientError;
use serde_json::json;
use tracing::{info, warn};

fn handle_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (Some(conn), Some(client)) = (state.db.as_ref(), state.client.as_ref()) else {
        return no_workspace(&req.id);
    };
    let Some(username) = param_str(&req.params, "username") else {
        return missing(&req.id, "username");
    };
    let Some(password) = req.params.get("password").and_then(|v| v.as_str()) else {
        return missing(&req.id, "password");
    };

    let tokens = match client.login(username, password) {
        Ok(t) => t,
        Err(e) => return err(&req.id, e.code(), e.to_string(), e.details()),
    };
    let store = MirrorStore::new(conn);
    if let Err(e) = store
        .put_raw(ACCESS_TOKEN_KEY, &tokens.access)
        .and_then(|_| store.put_raw(REFRESH_TOKEN_KEY, &tokens.refresh))
    {
        return err(&req.id, "storage_write_failed", e.to_string(), None);
    }
    info!(username, "signed in");
    ok(&req.id, json!({ "signedIn": true }))
}

fn handle_refresh(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (Some(conn), Some(client)) = (state.db.as_ref(), state.client.as_ref()) else {
        return no_workspace(&req.id);
    };
    let store = MirrorStore::new(conn);
    let Some(refresh) = store.get_raw(REFRESH_TOKEN_KEY) else {
        let e = ClientError::Unauthorized("No refresh token found".to_string());
        return client_failure(&req.id, &store, &state.config, e);
    };
    match client.refresh_access(&refresh) {
        Ok(access) => match store.put_raw(ACCESS_TOKEN_KEY, &access) {
            Ok(()) => ok(&req.id, json!({ "signedIn": true })),
            Err(e) => err(&req.id, "storage_write_failed", e.to_string(), None),
        },
        Err(e) => client_failure(&req.id, &store, &state.config, e),
    }
}

fn handle_logout(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(&req.id);
    };
    let store = MirrorStore::new(conn);
    if let (Some(client), Some(refresh)) = (
        bearer_client(state.client.as_ref(), &store),
        store.get_raw(REFRESH_TOKEN_KEY),
    ) {
        if let Err(e) = client.logout(&refresh) {
            warn!(error = %e, "server logout failed; clearing local credentials anyway");
        }
    }
    for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY] {
        if let Err(e) = store.remove(key) {
            return err(&req.id, "storage_write_failed", e.to_string(), None);
        }
    }
    info!("signed out");
    ok(
        &req.id,
        json!({ "signedIn": false, "navigate": state.config.sign_in_page }),
    )
}

fn handle_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(&req.id);
    };
    let store = MirrorStore::new(conn);
    ok(
        &req.id,
        json!({
            "signedIn": store.get_raw(ACCESS_TOKEN_KEY).is_some(),
            "canRefresh": store.get_raw(REFRESH_TOKEN_KEY).is_some(),
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "session.login" => Some(handle_login(state, req)),
        "session.refresh" => Some(handle_refresh(state, req)),
        "session.logout" => Some(handle_logout(state, req)),
        "session.status" => Some(handle_status(state, req)),
        _ => None,
    }
}
