use crate::ipc::{event, AppState, OpenView};
use crate::mirror::{MirrorStore, ACCESS_TOKEN_KEY};
use crate::record::Record;
use crate::remote::ClientError;
use crate::view::{FetchTicket, RefreshOutcome, RefreshStart};
use serde_json::{json, Value};
use std::sync::mpsc::Sender;
use std::thread;
use tracing::{debug, error, warn};

/// A list() call to run off the event loop.
#[derive(Debug, Clone)]
pub struct FetchJob {
    pub view: String,
    pub generation: u64,
    pub resource: &'static str,
    pub ticket: FetchTicket,
}

#[derive(Debug)]
pub struct FetchDone {
    pub job: FetchJob,
    pub result: Result<Vec<Record>, ClientError>,
}

/// Everything the event loop waits on.
#[derive(Debug)]
pub enum Inbound {
    Line(String),
    Fetched(FetchDone),
    Closed,
}

fn queue(jobs: &mut Vec<FetchJob>, name: &str, open: &mut OpenView, force: bool) -> bool {
    match open.controller.begin_refresh(force) {
        RefreshStart::Started(ticket) => {
            jobs.push(FetchJob {
                view: name.to_string(),
                generation: open.generation,
                resource: open.controller.schema().resource,
                ticket,
            });
            true
        }
        RefreshStart::Coalesced => false,
    }
}

/// Timer tick: every open view catches up on its markers and re-fetches.
pub fn tick(state: &mut AppState) -> usize {
    let Some(conn) = state.db.as_ref() else {
        return 0;
    };
    let store = MirrorStore::new(conn);
    let mut queued = 0;
    for (name, open) in state.views.iter_mut() {
        open.controller.poll_markers(&store, &state.notifier);
        if queue(&mut state.jobs, name, open, false) {
            queued += 1;
        }
    }
    debug!(views = state.views.len(), queued, "poll tick");
    queued
}

/// Storage-change signal: only views whose markers advanced re-fetch.
pub fn storage_changed(state: &mut AppState) -> Vec<String> {
    let Some(conn) = state.db.as_ref() else {
        return Vec::new();
    };
    let store = MirrorStore::new(conn);
    let mut triggered = Vec::new();
    for (name, open) in state.views.iter_mut() {
        if open.controller.poll_markers(&store, &state.notifier) {
            queue(&mut state.jobs, name, open, false);
            triggered.push(name.clone());
        }
    }
    triggered
}

/// This process wrote `marker` itself; its views must not re-trigger on it.
pub fn mark_seen(state: &mut AppState, marker: &str, at_ms: i64) {
    for open in state.views.values_mut() {
        open.controller.mark_seen(marker, at_ms);
    }
}

/// After a remote mutation announced `marker`: own views skip the echo on
/// their next poll and refresh in the background instead.
pub fn announced(state: &mut AppState, marker: &str, at_ms: i64) -> Vec<String> {
    mark_seen(state, marker, at_ms);
    let mut triggered = Vec::new();
    for (name, open) in state.views.iter_mut() {
        if !open.controller.watches(marker) {
            continue;
        }
        queue(&mut state.jobs, name, open, false);
        triggered.push(name.clone());
    }
    triggered
}

/// Applies one background completion and returns the event lines to emit.
pub fn apply_fetch(state: &mut AppState, done: FetchDone) -> Vec<Value> {
    let FetchDone { job, result } = done;
    let Some(conn) = state.db.as_ref() else {
        return Vec::new();
    };
    let store = MirrorStore::new(conn);
    let Some(open) = state
        .views
        .get_mut(&job.view)
        .filter(|o| o.generation == job.generation)
    else {
        debug!(view = %job.view, seq = job.ticket.seq, "fetch finished for a closed view");
        return Vec::new();
    };

    let completion = open.controller.complete_refresh(job.ticket, result, &store);
    let mut events = Vec::new();
    match completion.outcome {
        RefreshOutcome::Applied => {
            events.push(event(
                "view.rendered",
                json!({ "view": job.view, "grid": open.controller.render() }),
            ));
        }
        RefreshOutcome::Stale => {}
        RefreshOutcome::Failed(e) if e.is_unauthorized() => {
            warn!(view = %job.view, error = %e, "session rejected; navigating to sign-in");
            if let Err(e) = store.remove(ACCESS_TOKEN_KEY) {
                warn!(error = %e, "failed to clear access token");
            }
            events.push(event(
                "session.navigate",
                json!({ "to": state.config.sign_in_page, "reason": e.to_string() }),
            ));
        }
        RefreshOutcome::Failed(e) => {
            error!(view = %job.view, code = e.code(), error = %e, "background fetch failed");
            events.push(event(
                "view.failed",
                json!({
                    "view": job.view,
                    "error": { "code": e.code(), "message": e.to_string() },
                    "grid": open.controller.render(),
                }),
            ));
        }
    }
    if completion.rerun {
        queue(&mut state.jobs, &job.view, open, false);
    }
    events
}

/// Starts a worker thread per queued job, each with the current token.
pub fn spawn_jobs(state: &mut AppState, tx: &Sender<Inbound>) {
    if state.jobs.is_empty() {
        return;
    }
    let token = state
        .db
        .as_ref()
        .and_then(|conn| MirrorStore::new(conn).get_raw(ACCESS_TOKEN_KEY));
    for job in state.jobs.drain(..) {
        let Some(client) = state.client.as_ref().map(|c| c.with_token(token.clone())) else {
            let _ = tx.send(Inbound::Fetched(FetchDone {
                job,
                result: Err(ClientError::Network("no workspace selected".to_string())),
            }));
            continue;
        };
        let tx = tx.clone();
        debug!(view = %job.view, seq = job.ticket.seq, "background fetch started");
        thread::spawn(move || {
            let result = client.list(job.resource);
            let _ = tx.send(Inbound::Fetched(FetchDone { job, result }));
        });
    }
}
