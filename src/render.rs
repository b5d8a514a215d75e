use crate::reconcile::{aggregate, CanonicalList};
use crate::record::Record;
use crate::schema::{ActionKind, Column, Layout, Schema};
use maud::{html, Markup};
use serde::Serialize;

pub const SELECT_ALL_CONTROL: &str = "select-all";
const PHOTO_PLACEHOLDER: &str = "../assets/img/placeholder.jpg";

/// What a control in the latest render does when the host reports a change.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Binding {
    #[serde(rename_all = "camelCase")]
    Flag {
        control_id: String,
        key: String,
        field: String,
    },
    #[serde(rename_all = "camelCase")]
    SelectAll { control_id: String },
    #[serde(rename_all = "camelCase")]
    Action {
        control_id: String,
        key: String,
        action: &'static str,
    },
}

impl Binding {
    pub fn control_id(&self) -> &str {
        match self {
            Binding::Flag { control_id, .. }
            | Binding::SelectAll { control_id }
            | Binding::Action { control_id, .. } => control_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub complete: usize,
    pub total: usize,
    pub percent: f64,
    pub text: String,
    pub progress_width: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedGrid {
    pub view: &'static str,
    pub html: String,
    pub bindings: Vec<Binding>,
    pub summary: Option<Summary>,
    pub rows: usize,
    pub placeholder: bool,
    pub error: Option<String>,
}

impl RenderedGrid {
    pub fn find_binding(&self, control_id: &str) -> Option<&Binding> {
        self.bindings.iter().find(|b| b.control_id() == control_id)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions<'a> {
    pub search: Option<&'a str>,
    pub asset_base: &'a str,
}

fn matches_search(schema: &Schema, record: &Record, query: Option<&str>) -> bool {
    let Some(q) = query.map(|q| q.trim().to_lowercase()).filter(|q| !q.is_empty()) else {
        return true;
    };
    schema.search_fields.iter().any(|f| {
        record
            .text(f)
            .map(|t| t.to_lowercase().contains(&q))
            .unwrap_or(false)
    })
}

fn summary(schema: &Schema, list: &CanonicalList) -> Option<Summary> {
    let agg = aggregate(schema, list)?;
    let label = schema.completeness.map(|c| c.progress_label).unwrap_or("");
    Some(Summary {
        complete: agg.complete,
        total: agg.total,
        percent: agg.percent,
        text: format!("{}/{} {}", agg.complete, agg.total, label),
        progress_width: format!("{}%", agg.percent),
    })
}

/// Replaces the whole grid; the binding table is rebuilt from scratch each time.
pub fn render(schema: &Schema, list: &CanonicalList, opts: &RenderOptions) -> RenderedGrid {
    let visible: Vec<&Record> = list
        .records()
        .iter()
        .filter(|r| matches_search(schema, r, opts.search))
        .collect();
    let mut bindings = Vec::new();
    let placeholder = visible.is_empty();
    let message = if list.is_empty() {
        schema.empty_message
    } else {
        "No matching records"
    };

    let markup = match schema.layout {
        Layout::Table => {
            let all_complete = schema
                .completeness
                .map(|c| !list.is_empty() && list.records().iter().all(|r| r.flag(c.flag)))
                .unwrap_or(false);
            if schema.completeness.is_some() {
                bindings.push(Binding::SelectAll {
                    control_id: SELECT_ALL_CONTROL.to_string(),
                });
            }
            let rows: Vec<Markup> = visible
                .iter()
                .map(|r| table_row(schema, r, opts, &mut bindings))
                .collect();
            let body = if placeholder {
                placeholder_row(schema, message, "p-4 text-center text-gray-500")
            } else {
                html! { @for row in &rows { (row) } }
            };
            table(schema, all_complete, body)
        }
        Layout::Cards => {
            let cards: Vec<Markup> = visible
                .iter()
                .map(|r| card(schema, r, opts, &mut bindings))
                .collect();
            html! {
                div.student-cards data-view=(schema.view) {
                    @if placeholder {
                        div.text-center { (message) }
                    } @else {
                        @for c in &cards { (c) }
                    }
                }
            }
        }
    };

    RenderedGrid {
        view: schema.view,
        html: markup.into_string(),
        bindings,
        summary: summary(schema, list),
        rows: visible.len(),
        placeholder,
        error: None,
    }
}

/// Error message in place of the grid; the list itself is left alone.
pub fn render_error(schema: &Schema, list: &CanonicalList, message: &str) -> RenderedGrid {
    let text = format!("{}: {}", schema.error_prefix, message);
    let markup = match schema.layout {
        Layout::Table => table(
            schema,
            false,
            placeholder_row(schema, &text, "text-center text-danger"),
        ),
        Layout::Cards => html! {
            div.student-cards data-view=(schema.view) {
                div.alert.alert-danger { (text) }
            }
        },
    };
    RenderedGrid {
        view: schema.view,
        html: markup.into_string(),
        bindings: Vec::new(),
        summary: summary(schema, list),
        rows: 0,
        placeholder: true,
        error: Some(message.to_string()),
    }
}

fn table(schema: &Schema, all_complete: bool, body: Markup) -> Markup {
    html! {
        table.table data-view=(schema.view) {
            thead {
                tr {
                    @for col in schema.columns {
                        @if let (Column::Total { header }) = col {
                            th {
                                (header) " "
                                input #"select-all" type="checkbox" data-control=(SELECT_ALL_CONTROL) checked[all_complete];
                            }
                        } @else {
                            th { (col.header()) }
                        }
                    }
                }
            }
            tbody { (body) }
        }
    }
}

fn placeholder_row(schema: &Schema, message: &str, class: &str) -> Markup {
    html! {
        tr {
            td colspan=(schema.columns.len()) class=(class) { (message) }
        }
    }
}

fn key_text(schema: &Schema, record: &Record) -> String {
    schema
        .key_of(record)
        .map(|k| k.to_string())
        .unwrap_or_default()
}

fn text_or(record: &Record, path: &str, fallback: &str) -> String {
    record.text(path).unwrap_or_else(|| fallback.to_string())
}

fn action_buttons(
    key: &str,
    actions: &[ActionKind],
    bindings: &mut Vec<Binding>,
) -> Markup {
    let mut ids = Vec::with_capacity(actions.len());
    for a in actions {
        let control_id = format!("{}:{}", a.as_str(), key);
        bindings.push(Binding::Action {
            control_id: control_id.clone(),
            key: key.to_string(),
            action: a.as_str(),
        });
        ids.push((control_id, *a));
    }
    html! {
        @for (id, a) in &ids {
            button.btn.btn-link type="button" data-control=(id) data-action=(a.as_str()) { (a.label()) }
        }
    }
}

fn photo_url(record: &Record, path: &str, asset_base: &str) -> String {
    match record.text(path) {
        Some(p) if p.starts_with("http://") || p.starts_with("https://") => p,
        Some(p) => format!("{}{}", asset_base.trim_end_matches('/'), p),
        None => PHOTO_PLACEHOLDER.to_string(),
    }
}

fn table_row(
    schema: &Schema,
    record: &Record,
    opts: &RenderOptions,
    bindings: &mut Vec<Binding>,
) -> Markup {
    let key = key_text(schema, record);
    let complete = schema
        .completeness
        .map(|c| record.flag(c.flag))
        .unwrap_or(false);
    let mut cells: Vec<Markup> = Vec::with_capacity(schema.columns.len());
    for col in schema.columns {
        let cell = match *col {
            Column::Text { path, fallback, .. } => html! {
                td { (text_or(record, path, fallback)) }
            },
            Column::Heading {
                title,
                subtitle,
                subtitle_label,
                ..
            } => html! {
                td {
                    div.d-flex.px-2.py-1 {
                        div.d-flex.flex-column.justify-content-center {
                            h6.mb-0.text-sm { (text_or(record, title, "")) }
                            p.text-xs.text-secondary.mb-0 {
                                (subtitle_label) ": " (text_or(record, subtitle, ""))
                            }
                        }
                    }
                }
            },
            Column::Flag { field, .. } => {
                let control_id = format!("{}:{}", field, key);
                bindings.push(Binding::Flag {
                    control_id: control_id.clone(),
                    key: key.clone(),
                    field: field.to_string(),
                });
                html! {
                    td.checkbox-cell {
                        input type="checkbox" data-control=(control_id) checked[record.flag(field)];
                    }
                }
            }
            Column::Total { .. } => html! {
                td.checkbox-cell {
                    input.total-checkbox type="checkbox" checked[complete] disabled;
                }
            },
            Column::Percent { path, fallback, .. } => {
                let value = record
                    .text(path)
                    .or_else(|| record.text(fallback))
                    .unwrap_or_else(|| "0".to_string());
                html! {
                    td { p.text-xs.font-weight-bold.mb-0 { (value) "%" } }
                }
            }
            Column::Photo { path } => html! {
                td { img.student-photo src=(photo_url(record, path, opts.asset_base)) alt="Student Photo"; }
            },
            Column::Actions(actions) => {
                let buttons = action_buttons(&key, actions, bindings);
                html! { td.align-middle { (buttons) } }
            }
        };
        cells.push(cell);
    }
    html! {
        tr data-key=(key) {
            @for c in &cells { (c) }
        }
    }
}

fn card(
    schema: &Schema,
    record: &Record,
    opts: &RenderOptions,
    bindings: &mut Vec<Binding>,
) -> Markup {
    let key = key_text(schema, record);
    let mut photo = None;
    let mut lines: Vec<(&'static str, String)> = Vec::new();
    let mut actions: &[ActionKind] = &[];
    for col in schema.columns {
        match *col {
            Column::Photo { path } => photo = Some(photo_url(record, path, opts.asset_base)),
            Column::Text {
                header,
                path,
                fallback,
            } => lines.push((header, text_or(record, path, fallback))),
            Column::Actions(a) => actions = a,
            _ => {}
        }
    }
    let buttons = action_buttons(&key, actions, bindings);
    html! {
        div.student-card id=(format!("student-{}", key)) data-key=(key) {
            @if let Some(src) = &photo {
                img.student-photo src=(src) alt="Student Photo";
            }
            div.student-info {
                @for (label, value) in &lines {
                    p { span.label { (label) ":" } " " (value) }
                }
            }
            div.card-actions { (buttons) }
        }
    }
}
