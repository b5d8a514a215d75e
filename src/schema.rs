use crate::record::{Record, RecordKey};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRule {
    /// A server id at a (possibly dotted) path.
    Field(&'static str),
    /// Server id when both sides carry one, else the composite fields.
    IdOrComposite {
        id: &'static str,
        composite: &'static [&'static str],
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    None,
    /// "Ada King Lovelace" -> last = "Ada King", first = "Lovelace".
    SplitName {
        source: &'static str,
        last: &'static str,
        first: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Derivation {
    MeanOf {
        fields: &'static [&'static str],
        into: &'static str,
        decimals: u32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completeness {
    pub fields: &'static [&'static str],
    pub flag: &'static str,
    pub progress_label: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Table,
    Cards,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Edit,
    Delete,
    AdmitCard,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Edit => "edit",
            ActionKind::Delete => "delete",
            ActionKind::AdmitCard => "admitCard",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ActionKind::Edit => "Edit",
            ActionKind::Delete => "Delete",
            ActionKind::AdmitCard => "Print Admit Card",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Text {
        header: &'static str,
        path: &'static str,
        fallback: &'static str,
    },
    /// Bold title with a labelled subtitle underneath (name + roll, username + email).
    Heading {
        header: &'static str,
        title: &'static str,
        subtitle: &'static str,
        subtitle_label: &'static str,
    },
    Flag {
        header: &'static str,
        field: &'static str,
    },
    Total {
        header: &'static str,
    },
    Percent {
        header: &'static str,
        path: &'static str,
        fallback: &'static str,
    },
    Photo {
        path: &'static str,
    },
    Actions(&'static [ActionKind]),
}

impl Column {
    pub fn header(&self) -> &'static str {
        match self {
            Column::Text { header, .. }
            | Column::Heading { header, .. }
            | Column::Flag { header, .. }
            | Column::Total { header }
            | Column::Percent { header, .. } => header,
            Column::Photo { .. } => "Photo",
            Column::Actions(_) => "Actions",
        }
    }
}

#[derive(Debug)]
pub struct Schema {
    pub view: &'static str,
    pub resource: &'static str,
    pub key: KeyRule,
    pub projection: Projection,
    pub completeness: Option<Completeness>,
    pub derivations: &'static [Derivation],
    pub layout: Layout,
    pub columns: &'static [Column],
    pub search_fields: &'static [&'static str],
    pub empty_message: &'static str,
    pub error_prefix: &'static str,
}

const SUBJECT_FLAGS: &[&str] = &["dsa", "statistics", "java", "sad", "webTech"];
const MARK_SUBJECTS: &[&str] = &["DSA", "Java", "SAD", "Web_technology", "Prob_and_Stats"];
const EDIT_DELETE: &[ActionKind] = &[ActionKind::Edit, ActionKind::Delete];

static SCHEMAS: &[Schema] = &[
    Schema {
        view: "students",
        resource: "students",
        key: KeyRule::Field("id"),
        projection: Projection::None,
        completeness: None,
        derivations: &[],
        layout: Layout::Cards,
        columns: &[
            Column::Photo { path: "photo" },
            Column::Text { header: "Name", path: "name", fallback: "" },
            Column::Text { header: "Roll No", path: "roll", fallback: "" },
            Column::Text { header: "Class", path: "student_class", fallback: "" },
            Column::Text { header: "Address", path: "address", fallback: "" },
            Column::Text { header: "Section", path: "section", fallback: "N/A" },
            Column::Actions(EDIT_DELETE),
        ],
        search_fields: &["name", "roll"],
        empty_message: "No students found",
        error_prefix: "Error loading students",
    },
    Schema {
        view: "assignments",
        resource: "students",
        key: KeyRule::IdOrComposite {
            id: "id",
            composite: &["lastName", "firstName"],
        },
        projection: Projection::SplitName {
            source: "name",
            last: "lastName",
            first: "firstName",
        },
        completeness: Some(Completeness {
            fields: SUBJECT_FLAGS,
            flag: "turnedIn",
            progress_label: "students have turned in assignment",
        }),
        derivations: &[],
        layout: Layout::Table,
        columns: &[
            Column::Text { header: "Last Name", path: "lastName", fallback: "" },
            Column::Text { header: "First Name", path: "firstName", fallback: "" },
            Column::Flag { header: "DSA", field: "dsa" },
            Column::Flag { header: "Statistics", field: "statistics" },
            Column::Flag { header: "Java", field: "java" },
            Column::Flag { header: "SAD", field: "sad" },
            Column::Flag { header: "Web Tech", field: "webTech" },
            Column::Total { header: "Total" },
        ],
        search_fields: &["lastName", "firstName"],
        empty_message: "No students found",
        error_prefix: "Fail to load students",
    },
    Schema {
        view: "marks",
        resource: "students/marks",
        key: KeyRule::Field("student.id"),
        projection: Projection::None,
        completeness: None,
        derivations: &[Derivation::MeanOf {
            fields: MARK_SUBJECTS,
            into: "average",
            decimals: 2,
        }],
        layout: Layout::Table,
        columns: &[
            Column::Heading {
                header: "Student",
                title: "student.name",
                subtitle: "student.roll",
                subtitle_label: "Roll",
            },
            Column::Text { header: "DSA", path: "DSA", fallback: "" },
            Column::Text { header: "Java", path: "Java", fallback: "" },
            Column::Text { header: "SAD", path: "SAD", fallback: "" },
            Column::Text { header: "Web Technology", path: "Web_technology", fallback: "" },
            Column::Text { header: "Prob & Stats", path: "Prob_and_Stats", fallback: "" },
            Column::Percent { header: "Percentage", path: "percentage", fallback: "average" },
            Column::Actions(EDIT_DELETE),
        ],
        search_fields: &["student.name", "student.roll"],
        empty_message: "No marks recorded yet",
        error_prefix: "Error loading marks",
    },
    Schema {
        view: "users",
        resource: "users",
        key: KeyRule::Field("id"),
        projection: Projection::None,
        completeness: None,
        derivations: &[],
        layout: Layout::Table,
        columns: &[
            Column::Heading {
                header: "User",
                title: "username",
                subtitle: "email",
                subtitle_label: "Email",
            },
            Column::Text { header: "First Name", path: "first_name", fallback: "" },
            Column::Text { header: "Last Name", path: "last_name", fallback: "" },
            Column::Text { header: "Email", path: "email", fallback: "" },
            Column::Text { header: "Group", path: "group", fallback: "" },
            Column::Text { header: "Status", path: "status", fallback: "" },
            Column::Actions(EDIT_DELETE),
        ],
        search_fields: &["username", "email"],
        empty_message: "No users found",
        error_prefix: "Error loading users",
    },
    Schema {
        view: "results",
        resource: "students",
        key: KeyRule::Field("id"),
        projection: Projection::None,
        completeness: None,
        derivations: &[],
        layout: Layout::Table,
        columns: &[
            Column::Text { header: "Name", path: "name", fallback: "Unknown" },
            Column::Text { header: "Roll", path: "roll", fallback: "N/A" },
            Column::Actions(&[ActionKind::AdmitCard]),
        ],
        search_fields: &["name", "roll"],
        empty_message: "No students created yet",
        error_prefix: "Error loading students",
    },
];

pub fn lookup(view: &str) -> Option<&'static Schema> {
    SCHEMAS.iter().find(|s| s.view == view)
}

pub fn all() -> &'static [Schema] {
    SCHEMAS
}

impl Schema {
    pub fn key_of(&self, record: &Record) -> Option<RecordKey> {
        match self.key {
            KeyRule::Field(path) => record.text(path).map(RecordKey::Id),
            KeyRule::IdOrComposite { id, composite } => {
                if let Some(v) = record.text(id) {
                    return Some(RecordKey::Id(v));
                }
                let parts: Vec<String> = composite
                    .iter()
                    .map(|f| record.text(f).unwrap_or_default())
                    .collect();
                if parts.iter().all(|p| p.is_empty()) {
                    None
                } else {
                    Some(RecordKey::Composite(parts))
                }
            }
        }
    }

    /// Whether a fetched record and a mirror entry describe the same entity.
    pub fn same_entity(&self, remote: &Record, mirror: &Record) -> bool {
        match self.key {
            KeyRule::Field(path) => match (remote.text(path), mirror.text(path)) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
            KeyRule::IdOrComposite { id, composite } => {
                if let (Some(a), Some(b)) = (remote.text(id), mirror.text(id)) {
                    return a == b;
                }
                composite
                    .iter()
                    .all(|f| remote.text(f).unwrap_or_default() == mirror.text(f).unwrap_or_default())
            }
        }
    }

    pub fn project(&self, mut record: Record) -> Record {
        match self.projection {
            Projection::None => record,
            Projection::SplitName { source, last, first } => {
                let name = record.text(source).unwrap_or_default();
                let mut words: Vec<&str> = name.split_whitespace().collect();
                let first_name = words.pop().unwrap_or("").to_string();
                let last_name = words.join(" ");
                record.set(last, json!(last_name));
                record.set(first, json!(first_name));
                record
            }
        }
    }

    /// Fields the engine computes; never writable through a control.
    pub fn is_derived(&self, field: &str) -> bool {
        if self.completeness.map(|c| c.flag == field).unwrap_or(false) {
            return true;
        }
        self.derivations.iter().any(|d| match d {
            Derivation::MeanOf { into, .. } => *into == field,
        })
    }

    /// Fills schema defaults for tracked flags and recomputes derived fields.
    pub fn derive(&self, record: &mut Record) {
        if let Some(c) = self.completeness {
            let mut all = true;
            for f in c.fields {
                if !matches!(record.get(f), Some(Value::Bool(_))) {
                    record.set(f, Value::Bool(false));
                }
                all &= record.flag(f);
            }
            record.set(c.flag, Value::Bool(all));
        }
        for d in self.derivations {
            match d {
                Derivation::MeanOf { fields, into, decimals } => {
                    if fields.is_empty() {
                        continue;
                    }
                    let total: f64 = fields.iter().map(|f| record.number(f).unwrap_or(0.0)).sum();
                    let mean = total / fields.len() as f64;
                    record.set(into, json!(format!("{:.*}", *decimals as usize, mean)));
                }
            }
        }
    }

    /// Markers a view of this schema reacts to: its resource and its own name.
    pub fn watched_markers(&self) -> Vec<&'static str> {
        if self.resource == self.view {
            vec![self.resource]
        } else {
            vec![self.resource, self.view]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(v: Value) -> Record {
        Record::from_value(v).expect("object")
    }

    #[test]
    fn split_name_keeps_multi_word_last_names() {
        let s = lookup("assignments").expect("schema");
        let r = s.project(rec(json!({ "id": 3, "name": "Ada King Lovelace" })));
        assert_eq!(r.text("lastName").as_deref(), Some("Ada King"));
        assert_eq!(r.text("firstName").as_deref(), Some("Lovelace"));

        let single = s.project(rec(json!({ "name": "Plato" })));
        assert_eq!(single.text("lastName"), None);
        assert_eq!(single.text("firstName").as_deref(), Some("Plato"));
    }

    #[test]
    fn composite_match_used_only_when_an_id_is_missing() {
        let s = lookup("assignments").expect("schema");
        let remote = rec(json!({ "id": 1, "lastName": "Hopper", "firstName": "Grace" }));
        let legacy = rec(json!({ "lastName": "Hopper", "firstName": "Grace" }));
        let other_id = rec(json!({ "id": 2, "lastName": "Hopper", "firstName": "Grace" }));
        assert!(s.same_entity(&remote, &legacy));
        assert!(!s.same_entity(&remote, &other_id));
    }

    #[test]
    fn derive_computes_completeness_and_mean() {
        let a = lookup("assignments").expect("schema");
        let mut r = rec(json!({ "dsa": true, "statistics": true, "java": true, "sad": true }));
        a.derive(&mut r);
        assert!(!r.flag("turnedIn"));
        assert_eq!(r.get("webTech"), Some(&Value::Bool(false)));
        r.set("webTech", Value::Bool(true));
        a.derive(&mut r);
        assert!(r.flag("turnedIn"));

        let m = lookup("marks").expect("schema");
        let mut marks = rec(json!({ "DSA": 80, "Java": "70", "SAD": 90, "Web_technology": 60 }));
        m.derive(&mut marks);
        assert_eq!(marks.text("average").as_deref(), Some("60.00"));
    }
}
