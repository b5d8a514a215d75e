use serde_json::json;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// Unsolicited line; carries no `id`.
pub fn event(name: &str, body: serde_json::Value) -> serde_json::Value {
    let mut line = json!({ "event": name });
    if let (Some(dst), serde_json::Value::Object(src)) = (line.as_object_mut(), body) {
        dst.extend(src);
    }
    line
}
