use crate::mirror::MirrorStore;
use crate::notifier::ChangeNotifier;
use crate::reconcile::{
    apply_bulk_mutation, apply_field_mutation, reconcile, restore, sort, CanonicalList, SortSpec,
};
use crate::record::{Record, RecordKey};
use crate::remote::{ClientError, RecordSource};
use crate::render::{render, render_error, Binding, RenderOptions, RenderedGrid};
use crate::schema::Schema;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Sequence tag carried by one list() call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    pub seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshStart {
    Started(FetchTicket),
    /// A fetch is already in flight; one follow-up is queued.
    Coalesced,
}

#[derive(Debug)]
pub enum RefreshOutcome {
    Applied,
    Stale,
    Failed(ClientError),
}

#[derive(Debug)]
pub struct Completion {
    pub outcome: RefreshOutcome,
    /// A trigger arrived while the fetch was in flight; start one more.
    pub rerun: bool,
}

#[derive(Debug)]
pub enum ControlOutcome {
    Mutated(RenderedGrid),
    /// Nothing changed; the grid is redrawn from the last good state.
    Rejected { reason: String, grid: RenderedGrid },
    /// The host performs the action (confirm, modal, records.* call).
    Instruction(Value),
}

/// State of one open grid view. Sole owner of its Canonical List.
pub struct ViewController {
    schema: &'static Schema,
    asset_base: String,
    list: CanonicalList,
    last_render: Option<RenderedGrid>,
    issued: u64,
    applied: u64,
    outstanding: BTreeSet<u64>,
    pending: bool,
    markers: BTreeMap<&'static str, Option<i64>>,
    search: Option<String>,
    sort: Option<SortSpec>,
    error: Option<String>,
    mirror_stale: bool,
}

impl ViewController {
    /// First paint comes from the mirror snapshot, before any fetch.
    pub fn open(
        schema: &'static Schema,
        store: &MirrorStore,
        notifier: &ChangeNotifier,
        asset_base: &str,
    ) -> Self {
        let list = restore(schema, store.load(schema.view));
        let markers = schema
            .watched_markers()
            .into_iter()
            .map(|name| (name, notifier.current(store, name)))
            .collect();
        info!(view = schema.view, cached = list.len(), "view opened");
        Self {
            schema,
            asset_base: asset_base.to_string(),
            list,
            last_render: None,
            issued: 0,
            applied: 0,
            outstanding: BTreeSet::new(),
            pending: false,
            markers,
            search: None,
            sort: None,
            error: None,
            mirror_stale: false,
        }
    }

    pub fn schema(&self) -> &'static Schema {
        self.schema
    }

    pub fn list(&self) -> &CanonicalList {
        &self.list
    }

    pub fn applied_seq(&self) -> u64 {
        self.applied
    }

    pub fn is_fetching(&self) -> bool {
        !self.outstanding.is_empty()
    }

    pub fn watches(&self, marker: &str) -> bool {
        self.markers.contains_key(marker)
    }

    /// `force` issues a new fetch even while one is in flight (explicit
    /// refresh); otherwise triggers coalesce into one queued follow-up.
    pub fn begin_refresh(&mut self, force: bool) -> RefreshStart {
        if !force && !self.outstanding.is_empty() {
            self.pending = true;
            debug!(view = self.schema.view, "refresh coalesced");
            return RefreshStart::Coalesced;
        }
        self.issued += 1;
        self.outstanding.insert(self.issued);
        RefreshStart::Started(FetchTicket { seq: self.issued })
    }

    pub fn complete_refresh(
        &mut self,
        ticket: FetchTicket,
        result: Result<Vec<Record>, ClientError>,
        store: &MirrorStore,
    ) -> Completion {
        self.outstanding.remove(&ticket.seq);
        let outcome = if ticket.seq <= self.applied {
            warn!(
                view = self.schema.view,
                seq = ticket.seq,
                applied = self.applied,
                "discarding stale response"
            );
            RefreshOutcome::Stale
        } else {
            match result {
                Ok(remote) => {
                    let prior = if self.mirror_stale {
                        self.list.records().to_vec()
                    } else {
                        store.load(self.schema.view)
                    };
                    let mut next = reconcile(self.schema, remote, &prior);
                    if let Some(spec) = &self.sort {
                        next = sort(&next, spec);
                    }
                    self.list = next;
                    self.applied = ticket.seq;
                    self.error = None;
                    self.persist(store);
                    RefreshOutcome::Applied
                }
                Err(e) => {
                    if !e.is_unauthorized() {
                        self.error = Some(e.to_string());
                    }
                    RefreshOutcome::Failed(e)
                }
            }
        };
        let rerun = self.pending && self.outstanding.is_empty();
        if rerun {
            self.pending = false;
        }
        Completion { outcome, rerun }
    }

    /// Synchronous list → reconcile cycle.
    pub fn refresh_now(&mut self, source: &dyn RecordSource, store: &MirrorStore) -> RefreshOutcome {
        let RefreshStart::Started(ticket) = self.begin_refresh(true) else {
            return RefreshOutcome::Stale;
        };
        let result = source.list(self.schema.resource);
        self.complete_refresh(ticket, result, store).outcome
    }

    pub fn render(&mut self) -> RenderedGrid {
        let grid = match &self.error {
            Some(message) => render_error(self.schema, &self.list, message),
            None => render(
                self.schema,
                &self.list,
                &RenderOptions {
                    search: self.search.as_deref(),
                    asset_base: &self.asset_base,
                },
            ),
        };
        self.last_render = Some(grid.clone());
        grid
    }

    pub fn control(
        &mut self,
        control_id: &str,
        checked: Option<bool>,
        store: &MirrorStore,
    ) -> ControlOutcome {
        let binding = self
            .last_render
            .as_ref()
            .and_then(|g| g.find_binding(control_id))
            .cloned();
        let Some(binding) = binding else {
            warn!(view = self.schema.view, control_id, "control is not bound in the current render");
            return self.rejected(format!("unknown control {}", control_id));
        };

        match binding {
            Binding::Flag { key, field, .. } => {
                let key = RecordKey::parse(&key);
                let current = self
                    .list
                    .find(self.schema, &key)
                    .map(|r| r.flag(&field))
                    .unwrap_or(false);
                let value = checked.unwrap_or(!current);
                match apply_field_mutation(self.schema, &self.list, &key, &field, Value::Bool(value)) {
                    Ok(next) => {
                        self.list = next;
                        self.persist(store);
                        ControlOutcome::Mutated(self.render())
                    }
                    Err(e) => {
                        warn!(view = self.schema.view, error = %e, "field mutation rejected");
                        self.rejected(e.to_string())
                    }
                }
            }
            Binding::SelectAll { .. } => {
                let value = checked.unwrap_or(true);
                self.list = apply_bulk_mutation(self.schema, &self.list, value);
                self.persist(store);
                ControlOutcome::Mutated(self.render())
            }
            Binding::Action { key, action, .. } => {
                let Some(record) = self.list.find(self.schema, &RecordKey::parse(&key)) else {
                    warn!(view = self.schema.view, key = %key, "action on a record no longer listed");
                    return self.rejected(format!("no record with key {}", key));
                };
                ControlOutcome::Instruction(json!({
                    "action": action,
                    "view": self.schema.view,
                    "resource": self.schema.resource,
                    "id": key,
                    "record": record,
                }))
            }
        }
    }

    fn rejected(&mut self, reason: String) -> ControlOutcome {
        ControlOutcome::Rejected {
            reason,
            grid: self.render(),
        }
    }

    pub fn set_search(&mut self, query: Option<String>) {
        self.search = query.filter(|q| !q.trim().is_empty());
    }

    pub fn set_sort(&mut self, spec: SortSpec, store: &MirrorStore) {
        self.list = sort(&self.list, &spec);
        self.sort = Some(spec);
        self.persist(store);
    }

    /// Explicit save; unlike the implicit persist after each change, the
    /// failure is returned to the caller.
    pub fn save(&mut self, store: &MirrorStore) -> Result<usize, crate::mirror::StorageWriteError> {
        store.save(self.schema.view, self.list.records())?;
        self.mirror_stale = false;
        Ok(self.list.len())
    }

    fn persist(&mut self, store: &MirrorStore) {
        match store.save(self.schema.view, self.list.records()) {
            Ok(()) => self.mirror_stale = false,
            Err(e) => {
                // In-memory state stays authoritative for this session.
                warn!(view = self.schema.view, error = %e, "mirror write failed");
                self.mirror_stale = true;
            }
        }
    }

    /// True when any watched marker advanced past what this view has seen.
    pub fn poll_markers(&mut self, store: &MirrorStore, notifier: &ChangeNotifier) -> bool {
        let mut changed = false;
        for (name, last_seen) in self.markers.iter_mut() {
            let r = notifier.poll(store, name, *last_seen);
            if r.changed {
                debug!(
                    view = self.schema.view,
                    marker = *name,
                    origin = r.origin.as_deref().unwrap_or(""),
                    "marker advanced"
                );
                changed = true;
            }
            *last_seen = r.last_seen;
        }
        changed
    }

    /// Records a marker this process wrote itself so polling does not re-trigger on it.
    pub fn mark_seen(&mut self, marker: &str, at_ms: i64) {
        if let Some(slot) = self.markers.get_mut(marker) {
            *slot = Some(slot.map_or(at_ms, |s| s.max(at_ms)));
        }
    }
}
