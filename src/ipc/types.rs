use std::collections::BTreeMap;
use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::config::AppConfig;
use crate::notifier::ChangeNotifier;
use crate::remote::RemoteClient;
use crate::runtime::FetchJob;
use crate::view::ViewController;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// An open view; `generation` tells a reopened view apart from its
/// predecessor so late fetches for the old one are dropped.
pub struct OpenView {
    pub generation: u64,
    pub controller: ViewController,
}

pub struct AppState {
    pub instance_id: String,
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub config: AppConfig,
    pub client: Option<RemoteClient>,
    pub notifier: ChangeNotifier,
    pub views: BTreeMap<String, OpenView>,
    pub next_generation: u64,
    /// Background fetches queued by handlers; the event loop spawns them.
    pub jobs: Vec<FetchJob>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let instance_id = uuid::Uuid::new_v4().to_string();
        Self {
            notifier: ChangeNotifier::new(instance_id.clone()),
            instance_id,
            workspace: None,
            db: None,
            config,
            client: None,
            views: BTreeMap::new(),
            next_generation: 0,
            jobs: Vec::new(),
        }
    }
}
