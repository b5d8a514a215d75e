use crate::config::AppConfig;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{bearer_client, client_failure, missing, no_workspace, param_str};
use crate::ipc::types::{AppState, OpenView, Request};
use crate::mirror::MirrorStore;
use crate::notifier::ChangeNotifier;
use crate::reconcile::SortSpec;
use crate::remote::RemoteClient;
use crate::runtime;
use crate::schema;
use crate::view::{ControlOutcome, RefreshOutcome, ViewController};
use serde_json::{json, Value};
use tracing::{error, info, warn};

fn not_open(id: &str, view: &str) -> Value {
    err(
        id,
        "view_not_open",
        format!("view is not open: {}", view),
        Some(json!({ "view": view })),
    )
}

/// list → reconcile → render, answered on the request itself.
fn refresh_response(
    id: &str,
    controller: &mut ViewController,
    store: &MirrorStore,
    client: Option<&RemoteClient>,
    config: &AppConfig,
    extra: Value,
) -> Value {
    let Some(client) = bearer_client(client, store) else {
        return no_workspace(id);
    };
    let view = controller.schema().view;
    let mut result = json!({ "view": view });
    match controller.refresh_now(&client, store) {
        RefreshOutcome::Applied | RefreshOutcome::Stale => {}
        RefreshOutcome::Failed(e) if e.is_unauthorized() => {
            return client_failure(id, store, config, e);
        }
        RefreshOutcome::Failed(e) => {
            error!(view, code = e.code(), error = %e, "fetch failed");
            result["fetchError"] = json!({ "code": e.code(), "message": e.to_string() });
        }
    }
    result["grid"] = json!(controller.render());
    if let (Some(dst), Value::Object(src)) = (result.as_object_mut(), extra) {
        dst.extend(src);
    }
    ok(id, result)
}

fn announce_own_change(notifier: &ChangeNotifier, store: &MirrorStore, marker: &str) -> Option<i64> {
    match notifier.announce(store, marker) {
        Ok(m) => Some(m.at_ms),
        Err(e) => {
            warn!(marker, error = %e, "failed to announce change");
            None
        }
    }
}

fn handle_open(state: &mut AppState, req: &Request) -> Value {
    let Some(name) = param_str(&req.params, "view") else {
        return missing(&req.id, "view");
    };
    let Some(schema) = schema::lookup(name) else {
        let known: Vec<&str> = schema::all().iter().map(|s| s.view).collect();
        return err(
            &req.id,
            "unknown_view",
            format!("unknown view: {}", name),
            Some(json!({ "views": known })),
        );
    };
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(&req.id);
    };
    let store = MirrorStore::new(conn);

    state.next_generation += 1;
    let mut controller =
        ViewController::open(schema, &store, &state.notifier, &state.config.api_base_url);
    let cached = controller.render();
    let resp = refresh_response(
        &req.id,
        &mut controller,
        &store,
        state.client.as_ref(),
        &state.config,
        json!({ "cached": cached }),
    );
    state.views.insert(
        schema.view.to_string(),
        OpenView {
            generation: state.next_generation,
            controller,
        },
    );
    info!(view = schema.view, "view open");
    resp
}

fn handle_refresh(state: &mut AppState, req: &Request) -> Value {
    let Some(name) = param_str(&req.params, "view") else {
        return missing(&req.id, "view");
    };
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(&req.id);
    };
    let store = MirrorStore::new(conn);
    let Some(open) = state.views.get_mut(name) else {
        return not_open(&req.id, name);
    };
    refresh_response(
        &req.id,
        &mut open.controller,
        &store,
        state.client.as_ref(),
        &state.config,
        json!({}),
    )
}

fn handle_render(state: &mut AppState, req: &Request) -> Value {
    let Some(name) = param_str(&req.params, "view") else {
        return missing(&req.id, "view");
    };
    let Some(open) = state.views.get_mut(name) else {
        return not_open(&req.id, name);
    };
    ok(&req.id, json!({ "view": name, "grid": open.controller.render() }))
}

fn handle_control(state: &mut AppState, req: &Request) -> Value {
    let Some(name) = param_str(&req.params, "view") else {
        return missing(&req.id, "view");
    };
    let Some(control_id) = param_str(&req.params, "controlId") else {
        return missing(&req.id, "controlId");
    };
    let checked = req.params.get("checked").and_then(|v| v.as_bool());
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(&req.id);
    };
    let store = MirrorStore::new(conn);
    let Some(open) = state.views.get_mut(name) else {
        return not_open(&req.id, name);
    };

    let (result, announced) = match open.controller.control(control_id, checked, &store) {
        ControlOutcome::Mutated(grid) => {
            let marker = open.controller.schema().view;
            let at = announce_own_change(&state.notifier, &store, marker);
            (
                json!({ "view": name, "applied": true, "grid": grid }),
                at.map(|at| (marker, at)),
            )
        }
        ControlOutcome::Rejected { reason, grid } => (
            json!({ "view": name, "applied": false, "reason": reason, "grid": grid }),
            None,
        ),
        ControlOutcome::Instruction(instruction) => (
            json!({ "view": name, "applied": false, "instruction": instruction }),
            None,
        ),
    };
    if let Some((marker, at)) = announced {
        runtime::mark_seen(state, marker, at);
    }
    ok(&req.id, result)
}

fn handle_search(state: &mut AppState, req: &Request) -> Value {
    let Some(name) = param_str(&req.params, "view") else {
        return missing(&req.id, "view");
    };
    let query = req
        .params
        .get("query")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    let Some(open) = state.views.get_mut(name) else {
        return not_open(&req.id, name);
    };
    open.controller.set_search(query);
    ok(&req.id, json!({ "view": name, "grid": open.controller.render() }))
}

fn handle_sort(state: &mut AppState, req: &Request) -> Value {
    let Some(name) = param_str(&req.params, "view") else {
        return missing(&req.id, "view");
    };
    let Some(field) = param_str(&req.params, "field") else {
        return missing(&req.id, "field");
    };
    let descending = req
        .params
        .get("descending")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(&req.id);
    };
    let store = MirrorStore::new(conn);
    let Some(open) = state.views.get_mut(name) else {
        return not_open(&req.id, name);
    };
    open.controller.set_sort(
        SortSpec {
            field: field.to_string(),
            descending,
        },
        &store,
    );
    ok(&req.id, json!({ "view": name, "grid": open.controller.render() }))
}

fn handle_save(state: &mut AppState, req: &Request) -> Value {
    let Some(name) = param_str(&req.params, "view") else {
        return missing(&req.id, "view");
    };
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(&req.id);
    };
    let store = MirrorStore::new(conn);
    let Some(open) = state.views.get_mut(name) else {
        return not_open(&req.id, name);
    };
    let saved = match open.controller.save(&store) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "storage_write_failed", e.to_string(), None),
    };
    let marker = open.controller.schema().view;
    let announced = announce_own_change(&state.notifier, &store, marker);
    if let Some(at) = announced {
        runtime::mark_seen(state, marker, at);
    }
    ok(&req.id, json!({ "view": name, "saved": saved }))
}

fn handle_close(state: &mut AppState, req: &Request) -> Value {
    let Some(name) = param_str(&req.params, "view") else {
        return missing(&req.id, "view");
    };
    let closed = state.views.remove(name).is_some();
    if closed {
        info!(view = name, "view closed");
    }
    ok(&req.id, json!({ "view": name, "closed": closed }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "view.open" => Some(handle_open(state, req)),
        "view.refresh" => Some(handle_refresh(state, req)),
        "view.render" => Some(handle_render(state, req)),
        "view.control" => Some(handle_control(state, req)),
        "view.search" => Some(handle_search(state, req)),
        "view.sort" => Some(handle_sort(state, req)),
        "view.save" => Some(handle_save(state, req)),
        "view.close" => Some(handle_close(state, req)),
        _ => None,
    }
}
