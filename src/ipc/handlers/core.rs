use crate::config;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{missing, param_str};
use crate::ipc::types::{AppState, Request};
use crate::remote::RemoteClient;
use serde_json::json;
use std::path::PathBuf;
use tracing::info;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    let open_views: Vec<serde_json::Value> = state
        .views
        .iter()
        .map(|(name, open)| {
            json!({
                "view": name,
                "rows": open.controller.list().len(),
                "appliedSeq": open.controller.applied_seq(),
                "fetching": open.controller.is_fetching(),
            })
        })
        .collect();
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "instanceId": state.instance_id,
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "config": state.config,
            "openViews": open_views,
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(path) = param_str(&req.params, "path").map(PathBuf::from) else {
        return missing(&req.id, "path");
    };
    let api_base_url = param_str(&req.params, "apiBaseUrl");

    let cfg = match config::load_configuration(&path, api_base_url) {
        Ok(c) => c,
        Err(e) => return err(&req.id, "config_invalid", e.to_string(), None),
    };
    let client = match RemoteClient::new(&cfg.api_base_url, cfg.request_timeout()) {
        Ok(c) => c,
        Err(e) => return err(&req.id, "client_init_failed", format!("{e:?}"), None),
    };

    match db::open_db(&path) {
        Ok(conn) => {
            // Views belong to the previous workspace's mirror.
            state.views.clear();
            state.jobs.clear();
            state.workspace = Some(path.clone());
            state.db = Some(conn);
            state.client = Some(client);
            state.config = cfg;
            info!(
                workspace = %path.to_string_lossy(),
                api = %state.config.api_base_url,
                "workspace selected"
            );
            ok(
                &req.id,
                json!({
                    "workspacePath": path.to_string_lossy(),
                    "apiBaseUrl": state.config.api_base_url,
                }),
            )
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}
