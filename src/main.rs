mod config;
mod db;
mod ipc;
mod logging;
mod mirror;
mod notifier;
mod reconcile;
mod record;
mod remote;
mod render;
mod runtime;
mod schema;
mod view;

use anyhow::Context;
use runtime::Inbound;
use std::io::{self, BufRead, Write};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Instant;
use tracing::{info, warn};

fn write_line(stdout: &mut io::Stdout, value: &serde_json::Value) {
    let _ = writeln!(
        stdout,
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{\"ok\":false}".to_string())
    );
    let _ = stdout.flush();
}

fn handle_line(state: &mut ipc::AppState, line: &str, stdout: &mut io::Stdout) {
    if line.trim().is_empty() {
        return;
    }
    let req: ipc::Request = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            // Can't reply without id.
            warn!(error = %e, "unparseable request line");
            write_line(
                stdout,
                &serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                }),
            );
            return;
        }
    };
    let resp = ipc::handle_request(state, req);
    write_line(stdout, &resp);
}

fn main() -> anyhow::Result<()> {
    logging::init_logger();
    let cfg = config::load_defaults().context("invalid ROSTERD_* configuration")?;
    let mut state = ipc::AppState::new(cfg);
    info!(instance = %state.instance_id, "rosterd started");

    let (tx, rx) = mpsc::channel::<Inbound>();
    let reader_tx = tx.clone();
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if reader_tx.send(Inbound::Line(line)).is_err() {
                return;
            }
        }
        let _ = reader_tx.send(Inbound::Closed);
    });

    let mut stdout = io::stdout();
    let mut next_tick = Instant::now() + state.config.poll_interval();
    loop {
        let wait = next_tick.saturating_duration_since(Instant::now());
        match rx.recv_timeout(wait) {
            Ok(Inbound::Line(line)) => handle_line(&mut state, &line, &mut stdout),
            Ok(Inbound::Fetched(done)) => {
                for ev in runtime::apply_fetch(&mut state, done) {
                    write_line(&mut stdout, &ev);
                }
            }
            Ok(Inbound::Closed) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
        if Instant::now() >= next_tick {
            runtime::tick(&mut state);
            next_tick = Instant::now() + state.config.poll_interval();
        }
        runtime::spawn_jobs(&mut state, &tx);
    }
    info!("stdin closed; exiting");
    Ok(())
}
