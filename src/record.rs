use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// One row of a grid view: a student, a mark sheet, a user, an assignment row.
///
/// Fields are kept as raw JSON so one type serves every resource; the
/// per-view `Schema` decides which fields identify, derive, and render.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: Map<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self { fields }),
            _ => None,
        }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Dotted lookup, e.g. `student.id` on a mark sheet.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let first = parts.next()?;
        let mut cur = self.fields.get(first)?;
        for part in parts {
            cur = cur.get(part)?;
        }
        Some(cur)
    }

    pub fn set(&mut self, field: &str, value: Value) {
        self.fields.insert(field.to_string(), value);
    }

    pub fn flag(&self, field: &str) -> bool {
        self.fields
            .get(field)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Text form of a scalar field; blank strings and non-scalars are `None`.
    pub fn text(&self, path: &str) -> Option<String> {
        scalar_text(self.get_path(path)?)
    }

    pub fn number(&self, path: &str) -> Option<f64> {
        match self.get_path(path)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }
}

pub fn scalar_text(value: &Value) -> Option<String> {
    let t = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    if t.is_empty() {
        None
    } else {
        Some(t)
    }
}

/// Identity of a record within one Canonical List.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordKey {
    Id(String),
    Composite(Vec<String>),
}

impl RecordKey {
    /// Parses the text form produced by `Display`, used when a control id
    /// carries the key back from the host.
    pub fn parse(s: &str) -> Self {
        if let Some(rest) = s.strip_prefix('\\') {
            return RecordKey::Id(rest.to_string());
        }
        let Some(rest) = s.strip_prefix('~') else {
            return RecordKey::Id(s.to_string());
        };
        let mut parts = Vec::new();
        let mut cur = String::new();
        let mut chars = rest.chars();
        while let Some(c) = chars.next() {
            match c {
                '\\' => cur.extend(chars.next()),
                '|' => parts.push(std::mem::take(&mut cur)),
                c => cur.push(c),
            }
        }
        parts.push(cur);
        RecordKey::Composite(parts)
    }
}

/// `~` opens a composite key and `|` separates its parts; a leading `\`
/// marks an id that would otherwise read as composite.
impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKey::Id(id) if id.starts_with('~') || id.starts_with('\\') => {
                write!(f, "\\{}", id)
            }
            RecordKey::Id(id) => write!(f, "{}", id),
            RecordKey::Composite(parts) => {
                let escaped: Vec<String> = parts
                    .iter()
                    .map(|p| p.replace('\\', "\\\\").replace('|', "\\|"))
                    .collect();
                write!(f, "~{}", escaped.join("|"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_path_and_numeric_ids_read_as_text() {
        let r = Record::from_value(json!({
            "student": { "id": 7, "name": "Ada Lovelace" },
            "DSA": "81.5",
            "section": "   "
        }))
        .expect("object");
        assert_eq!(r.text("student.id").as_deref(), Some("7"));
        assert_eq!(r.number("DSA"), Some(81.5));
        assert_eq!(r.text("section"), None);
        assert_eq!(r.text("student.missing"), None);
    }

    #[test]
    fn key_text_form_parses_back() {
        let k = RecordKey::Composite(vec!["Van Rossum".into(), "Guido".into()]);
        assert_eq!(k.to_string(), "~Van Rossum|Guido");
        assert_eq!(RecordKey::parse(&k.to_string()), k);
        assert_eq!(RecordKey::parse("12"), RecordKey::Id("12".into()));
    }

    #[test]
    fn separator_characters_survive_the_text_form() {
        let keys = [
            RecordKey::Id("~7".into()),
            RecordKey::Id("\\x".into()),
            RecordKey::Composite(vec!["Smith|Jones".into(), "Ann".into()]),
            RecordKey::Composite(vec!["back\\slash".into(), "".into()]),
        ];
        for k in keys {
            assert_eq!(RecordKey::parse(&k.to_string()), k, "text form {}", k);
        }
        assert_eq!(
            RecordKey::Composite(vec!["Smith|Jones".into(), "Ann".into()]).to_string(),
            "~Smith\\|Jones|Ann"
        );
    }
}
