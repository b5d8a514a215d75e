use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{bearer_client, client_failure, missing, no_workspace, param_str};
use crate::ipc::types::{AppState, Request};
use crate::mirror::MirrorStore;
use crate::record::Record;
use crate::remote::{ClientError, RemoteClient};
use crate::runtime;
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::{info, warn};

enum Mutation {
    Create,
    Update,
    Delete,
}

fn id_param(params: &Value) -> Option<String> {
    match params.get("id") {
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

fn data_param(req: &Request) -> Result<Record, Value> {
    match req.params.get("data").cloned() {
        Some(v) => Record::from_value(v)
            .ok_or_else(|| err(&req.id, "bad_params", "params.data must be an object", None)),
        None => Err(missing(&req.id, "data")),
    }
}

fn handle_list(state: &mut AppState, req: &Request) -> Value {
    let Some(resource) = param_str(&req.params, "resource") else {
        return missing(&req.id, "resource");
    };
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(&req.id);
    };
    let store = MirrorStore::new(conn);
    let Some(client) = bearer_client(state.client.as_ref(), &store) else {
        return no_workspace(&req.id);
    };
    match client.list(resource) {
        Ok(records) => ok(&req.id, json!({ "resource": resource, "records": records })),
        Err(e) => client_failure(&req.id, &store, &state.config, e),
    }
}

fn handle_get(state: &mut AppState, req: &Request) -> Value {
    let Some(resource) = param_str(&req.params, "resource") else {
        return missing(&req.id, "resource");
    };
    let Some(id) = id_param(&req.params) else {
        return missing(&req.id, "id");
    };
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(&req.id);
    };
    let store = MirrorStore::new(conn);
    let Some(client) = bearer_client(state.client.as_ref(), &store) else {
        return no_workspace(&req.id);
    };
    match client.get(resource, &id) {
        Ok(record) => ok(&req.id, json!({ "resource": resource, "record": record })),
        Err(e) => client_failure(&req.id, &store, &state.config, e),
    }
}

fn send_mutation(
    client: &RemoteClient,
    kind: &Mutation,
    req: &Request,
    resource: &str,
) -> Result<Result<Option<Record>, ClientError>, Value> {
    let photo = param_str(&req.params, "photoPath").map(PathBuf::from);
    Ok(match kind {
        Mutation::Create => {
            let data = data_param(req)?;
            client.create(resource, &data, photo.as_deref()).map(Some)
        }
        Mutation::Update => {
            let Some(id) = id_param(&req.params) else {
                return Err(missing(&req.id, "id"));
            };
            let data = data_param(req)?;
            client.update(resource, &id, &data, photo.as_deref()).map(Some)
        }
        Mutation::Delete => {
            let Some(id) = id_param(&req.params) else {
                return Err(missing(&req.id, "id"));
            };
            client.delete(resource, &id).map(|_| None)
        }
    })
}

/// A successful mutation announces the resource marker so every tab's views
/// reconcile; views in this process are queued for a background refresh.
fn handle_mutation(state: &mut AppState, req: &Request, kind: Mutation) -> Value {
    let Some(resource) = param_str(&req.params, "resource") else {
        return missing(&req.id, "resource");
    };
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(&req.id);
    };
    let store = MirrorStore::new(conn);
    let Some(client) = bearer_client(state.client.as_ref(), &store) else {
        return no_workspace(&req.id);
    };

    let record = match send_mutation(&client, &kind, req, resource) {
        Err(resp) => return resp,
        Ok(Err(e)) => return client_failure(&req.id, &store, &state.config, e),
        Ok(Ok(record)) => record,
    };
    info!(resource, method = %req.method, "remote record changed");

    let marker = match state.notifier.announce(&store, resource) {
        Ok(m) => Some(m.at_ms),
        Err(e) => {
            warn!(resource, error = %e, "failed to announce change");
            None
        }
    };
    let refreshing = marker
        .map(|at| runtime::announced(state, resource, at))
        .unwrap_or_default();

    let mut result = json!({
        "resource": resource,
        "marker": marker,
        "refreshing": refreshing,
    });
    if let Some(r) = record {
        result["record"] = r.into_value();
    }
    ok(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "records.list" => Some(handle_list(state, req)),
        "records.get" => Some(handle_get(state, req)),
        "records.create" => Some(handle_mutation(state, req, Mutation::Create)),
        "records.update" => Some(handle_mutation(state, req, Mutation::Update)),
        "records.delete" => Some(handle_mutation(state, req, Mutation::Delete)),
        _ => None,
    }
}
