use crate::record::{Record, RecordKey};
use crate::schema::Schema;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, warn};

/// The ordered records a view renders from.
///
/// Only this module builds one, so every list a view holds has gone through
/// key de-duplication and derivation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CanonicalList {
    records: Vec<Record>,
}

impl CanonicalList {
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn find(&self, schema: &Schema, key: &RecordKey) -> Option<&Record> {
        self.records
            .iter()
            .find(|r| schema.key_of(r).as_ref() == Some(key))
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum MutationError {
    #[error("no record with key {0}")]
    UnknownKey(RecordKey),
    #[error("field {0} is derived and cannot be edited")]
    ReadOnly(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aggregate {
    pub complete: usize,
    pub total: usize,
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub field: String,
    pub descending: bool,
}

fn finish(schema: &Schema, candidates: Vec<Record>) -> CanonicalList {
    let mut seen: HashSet<RecordKey> = HashSet::new();
    let mut records = Vec::with_capacity(candidates.len());
    for mut r in candidates {
        let Some(key) = schema.key_of(&r) else {
            warn!(view = schema.view, "dropping record without an identifying key");
            continue;
        };
        if !seen.insert(key.clone()) {
            warn!(view = schema.view, key = %key, "dropping duplicate record");
            continue;
        }
        schema.derive(&mut r);
        records.push(r);
    }
    CanonicalList { records }
}

/// Canonical List from a mirror snapshot alone (first paint before any fetch).
pub fn restore(schema: &Schema, mirror: Vec<Record>) -> CanonicalList {
    finish(schema, mirror)
}

/// Merges freshly fetched records with the prior mirror.
///
/// Remote is authoritative for existence and for every field it carries;
/// mirror-only fields (submission flags, locally tracked columns) survive.
pub fn reconcile(schema: &Schema, remote: Vec<Record>, prior: &[Record]) -> CanonicalList {
    let mut merged = Vec::with_capacity(remote.len());
    let mut carried = 0usize;
    for raw in remote {
        let mut r = schema.project(raw);
        if let Some(m) = prior.iter().find(|m| schema.same_entity(&r, m)) {
            carried += 1;
            for (field, value) in m.fields() {
                if !r.contains(field) {
                    r.set(field, value.clone());
                }
            }
        }
        merged.push(r);
    }
    let list = finish(schema, merged);
    debug!(
        view = schema.view,
        records = list.len(),
        carried,
        "reconciled remote records with mirror"
    );
    list
}

pub fn apply_field_mutation(
    schema: &Schema,
    list: &CanonicalList,
    key: &RecordKey,
    field: &str,
    value: Value,
) -> Result<CanonicalList, MutationError> {
    if schema.is_derived(field) {
        return Err(MutationError::ReadOnly(field.to_string()));
    }
    let idx = list
        .records
        .iter()
        .position(|r| schema.key_of(r).as_ref() == Some(key))
        .ok_or_else(|| MutationError::UnknownKey(key.clone()))?;

    let mut records = list.records.clone();
    records[idx].set(field, value);
    schema.derive(&mut records[idx]);
    Ok(CanonicalList { records })
}

/// "Select all": every tracked flag on every record set to `value`.
pub fn apply_bulk_mutation(schema: &Schema, list: &CanonicalList, value: bool) -> CanonicalList {
    let Some(c) = schema.completeness else {
        return list.clone();
    };
    let mut records = list.records.clone();
    for r in records.iter_mut() {
        for f in c.fields {
            r.set(f, Value::Bool(value));
        }
        schema.derive(r);
    }
    CanonicalList { records }
}

pub fn sort(list: &CanonicalList, spec: &SortSpec) -> CanonicalList {
    let mut records = list.records.clone();
    records.sort_by(|a, b| {
        let ord = compare_field(a, b, &spec.field);
        if spec.descending {
            ord.reverse()
        } else {
            ord
        }
    });
    CanonicalList { records }
}

fn compare_field(a: &Record, b: &Record, field: &str) -> Ordering {
    if let (Some(x), Some(y)) = (a.number(field), b.number(field)) {
        return x.partial_cmp(&y).unwrap_or(Ordering::Equal);
    }
    let x = a.text(field).unwrap_or_default().to_lowercase();
    let y = b.text(field).unwrap_or_default().to_lowercase();
    x.cmp(&y)
}

/// Counts and percentage for the progress indicator; 0% on an empty list.
pub fn aggregate(schema: &Schema, list: &CanonicalList) -> Option<Aggregate> {
    let c = schema.completeness?;
    let total = list.len();
    let complete = list.records.iter().filter(|r| r.flag(c.flag)).count();
    let percent = if total > 0 {
        100.0 * complete as f64 / total as f64
    } else {
        0.0
    };
    Some(Aggregate {
        complete,
        total,
        percent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::lookup;
    use serde_json::json;

    const FLAGS: [&str; 5] = ["dsa", "statistics", "java", "sad", "webTech"];

    fn rec(v: Value) -> Record {
        Record::from_value(v).expect("object")
    }

    fn students() -> Vec<Record> {
        vec![
            rec(json!({ "id": 1, "name": "Grace Hopper", "roll": 11 })),
            rec(json!({ "id": 2, "name": "Alan Turing", "roll": 12 })),
            rec(json!({ "id": 3, "name": "Ada King Lovelace", "roll": 13 })),
            rec(json!({ "id": 4, "name": "Edsger Dijkstra", "roll": 14 })),
            rec(json!({ "id": 5, "name": "Barbara Liskov", "roll": 15 })),
        ]
    }

    #[test]
    fn fresh_records_start_with_every_flag_false() {
        let s = lookup("assignments").expect("schema");
        let list = reconcile(s, students(), &[]);
        assert_eq!(list.len(), 5);
        for r in list.records() {
            for f in FLAGS {
                assert_eq!(r.get(f), Some(&Value::Bool(false)));
            }
            assert!(!r.flag("turnedIn"));
        }
    }

    #[test]
    fn mirror_flags_carry_over_and_remote_fields_win() {
        let s = lookup("assignments").expect("schema");
        let prior = vec![rec(json!({
            "id": 2,
            "name": "Alan M. Turing",
            "lastName": "Stale",
            "firstName": "Name",
            "roll": 99,
            "dsa": true,
            "java": true,
            "note": "late slip"
        }))];
        let list = reconcile(s, students(), &prior);
        let alan = list
            .find(s, &RecordKey::Id("2".into()))
            .expect("alan present");
        assert_eq!(alan.text("name").as_deref(), Some("Alan Turing"));
        assert_eq!(alan.text("lastName").as_deref(), Some("Alan"));
        assert_eq!(alan.number("roll"), Some(12.0));
        assert!(alan.flag("dsa"));
        assert!(alan.flag("java"));
        assert!(!alan.flag("sad"));
        assert_eq!(alan.text("note").as_deref(), Some("late slip"));
    }

    #[test]
    fn legacy_mirror_entries_match_by_name() {
        let s = lookup("assignments").expect("schema");
        let prior = vec![rec(json!({
            "lastName": "Grace",
            "firstName": "Hopper",
            "dsa": true, "statistics": true, "java": true, "sad": true, "webTech": true,
            "turnedIn": true
        }))];
        let list = reconcile(s, students(), &prior);
        let grace = list.find(s, &RecordKey::Id("1".into())).expect("grace");
        assert!(grace.flag("turnedIn"));
    }

    #[test]
    fn records_missing_remotely_are_dropped() {
        let s = lookup("assignments").expect("schema");
        let prior = vec![rec(json!({ "id": 42, "name": "Gone Student", "dsa": true }))];
        let list = reconcile(s, students(), &prior);
        assert!(list.find(s, &RecordKey::Id("42".into())).is_none());
        assert_eq!(list.len(), 5);
    }

    #[test]
    fn duplicate_remote_keys_keep_first_occurrence() {
        let s = lookup("students").expect("schema");
        let remote = vec![
            rec(json!({ "id": 1, "name": "First" })),
            rec(json!({ "id": 1, "name": "Second" })),
        ];
        let list = reconcile(s, remote, &[]);
        assert_eq!(list.len(), 1);
        assert_eq!(list.records()[0].text("name").as_deref(), Some("First"));
    }

    #[test]
    fn reconcile_is_idempotent() {
        let s = lookup("assignments").expect("schema");
        let prior = vec![
            rec(json!({ "id": 1, "dsa": true, "extra": 5 })),
            rec(json!({ "lastName": "Barbara", "firstName": "Liskov", "sad": true })),
        ];
        let once = reconcile(s, students(), &prior);
        let twice = reconcile(s, students(), once.records());
        assert_eq!(once, twice);
    }

    #[test]
    fn completeness_tracks_every_field_mutation() {
        let s = lookup("assignments").expect("schema");
        let mut list = reconcile(s, students(), &[]);
        let key = RecordKey::Id("3".into());
        for (i, f) in FLAGS.iter().enumerate() {
            list = apply_field_mutation(s, &list, &key, f, Value::Bool(true)).expect("mutate");
            let r = list.find(s, &key).expect("record");
            assert_eq!(r.flag("turnedIn"), i == FLAGS.len() - 1);
            for other in list.records() {
                let all = FLAGS.iter().all(|f| other.flag(f));
                assert_eq!(other.flag("turnedIn"), all);
            }
        }
        list = apply_field_mutation(s, &list, &key, "java", Value::Bool(false)).expect("mutate");
        assert!(!list.find(s, &key).expect("record").flag("turnedIn"));
    }

    #[test]
    fn unknown_key_and_derived_field_are_rejected() {
        let s = lookup("assignments").expect("schema");
        let list = reconcile(s, students(), &[]);
        let missing = RecordKey::Id("77".into());
        assert_eq!(
            apply_field_mutation(s, &list, &missing, "dsa", Value::Bool(true)),
            Err(MutationError::UnknownKey(missing.clone()))
        );
        assert_eq!(
            apply_field_mutation(s, &list, &RecordKey::Id("1".into()), "turnedIn", Value::Bool(true)),
            Err(MutationError::ReadOnly("turnedIn".into()))
        );
    }

    #[test]
    fn select_all_marks_five_records_complete() {
        let s = lookup("assignments").expect("schema");
        let list = apply_bulk_mutation(s, &reconcile(s, students(), &[]), true);
        assert_eq!(list.len(), 5);
        for r in list.records() {
            assert!(FLAGS.iter().all(|f| r.flag(f)));
            assert!(r.flag("turnedIn"));
        }
        let agg = aggregate(s, &list).expect("aggregate");
        assert_eq!((agg.complete, agg.total), (5, 5));
        assert_eq!(agg.percent, 100.0);

        let cleared = apply_bulk_mutation(s, &list, false);
        assert_eq!(aggregate(s, &cleared).expect("aggregate").complete, 0);
    }

    #[test]
    fn aggregate_on_empty_list_is_zero() {
        let s = lookup("assignments").expect("schema");
        let agg = aggregate(s, &CanonicalList::default()).expect("aggregate");
        assert_eq!(agg.total, 0);
        assert_eq!(agg.percent, 0.0);
        assert!(aggregate(lookup("users").expect("schema"), &CanonicalList::default()).is_none());
    }

    #[test]
    fn aggregate_percentage_matches_completed_share() {
        let s = lookup("assignments").expect("schema");
        let mut list = reconcile(s, students(), &[]);
        for f in FLAGS {
            list = apply_field_mutation(s, &list, &RecordKey::Id("4".into()), f, Value::Bool(true))
                .expect("mutate");
        }
        let agg = aggregate(s, &list).expect("aggregate");
        assert_eq!(agg.complete, 1);
        assert!((agg.percent - 20.0).abs() < 1e-9);
    }

    #[test]
    fn sort_orders_numbers_numerically() {
        let s = lookup("results").expect("schema");
        let list = reconcile(
            s,
            vec![
                rec(json!({ "id": 1, "name": "b", "roll": 100 })),
                rec(json!({ "id": 2, "name": "a", "roll": 9 })),
            ],
            &[],
        );
        let by_roll = sort(&list, &SortSpec { field: "roll".into(), descending: false });
        assert_eq!(by_roll.records()[0].text("name").as_deref(), Some("a"));
        let by_name_desc = sort(&list, &SortSpec { field: "name".into(), descending: true });
        assert_eq!(by_name_desc.records()[0].text("name").as_deref(), Some("b"));
    }
}
