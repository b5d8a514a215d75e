use crate::record::{scalar_text, Record};
use anyhow::Context;
use reqwest::blocking::{multipart, Client, RequestBuilder};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Network(String),
    #[error("{message}")]
    Server { status: u16, message: String },
    #[error("{message}")]
    Validation { message: String, fields: Value },
}

impl ClientError {
    pub fn code(&self) -> &'static str {
        match self {
            ClientError::Unauthorized(_) => "unauthorized",
            ClientError::Network(_) => "network_error",
            ClientError::Server { .. } => "server_error",
            ClientError::Validation { .. } => "validation_failed",
        }
    }

    pub fn details(&self) -> Option<Value> {
        match self {
            ClientError::Server { status, .. } => Some(json!({ "status": status })),
            ClientError::Validation { fields, .. } => Some(json!({ "fields": fields })),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ClientError::Unauthorized(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tokens {
    pub access: String,
    pub refresh: String,
}

/// Source of a resource's records; the REST client in production.
pub trait RecordSource {
    fn list(&self, resource: &str) -> Result<Vec<Record>, ClientError>;
}

/// Bearer-authenticated CRUD client for `<base>/<resource>/[<id>/]`.
#[derive(Clone)]
pub struct RemoteClient {
    http: Client,
    base_url: String,
    token: Option<String>,
}

impl RemoteClient {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        })
    }

    pub fn with_token(&self, token: Option<String>) -> Self {
        Self {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            token,
        }
    }

    fn collection_url(&self, resource: &str) -> String {
        format!("{}/{}/", self.base_url, resource.trim_matches('/'))
    }

    fn item_url(&self, resource: &str, id: &str) -> String {
        format!("{}/{}/{}/", self.base_url, resource.trim_matches('/'), id)
    }

    fn bearer(&self) -> Result<&str, ClientError> {
        self.token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ClientError::Unauthorized("No access token found".to_string()))
    }

    pub fn list(&self, resource: &str) -> Result<Vec<Record>, ClientError> {
        let url = self.collection_url(resource);
        let body = send(self.http.get(&url).bearer_auth(self.bearer()?))?;
        let Value::Array(items) = body else {
            return Err(ClientError::Network(format!(
                "unexpected response from {}: expected a list",
                url
            )));
        };
        let records: Vec<Record> = items.into_iter().filter_map(Record::from_value).collect();
        debug!(resource, records = records.len(), "listed records");
        Ok(records)
    }

    pub fn get(&self, resource: &str, id: &str) -> Result<Record, ClientError> {
        let url = self.item_url(resource, id);
        let body = send(self.http.get(&url).bearer_auth(self.bearer()?))?;
        // Mark sheets come back as a one-element list.
        let body = match body {
            Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
            other => other,
        };
        Record::from_value(body)
            .ok_or_else(|| ClientError::Network(format!("unexpected response from {}", url)))
    }

    pub fn create(
        &self,
        resource: &str,
        data: &Record,
        photo: Option<&Path>,
    ) -> Result<Record, ClientError> {
        let url = self.collection_url(resource);
        let req = with_body(self.http.post(&url).bearer_auth(self.bearer()?), data, photo)?;
        expect_record(send(req)?, &url)
    }

    pub fn update(
        &self,
        resource: &str,
        id: &str,
        data: &Record,
        photo: Option<&Path>,
    ) -> Result<Record, ClientError> {
        let url = self.item_url(resource, id);
        let req = with_body(self.http.put(&url).bearer_auth(self.bearer()?), data, photo)?;
        expect_record(send(req)?, &url)
    }

    pub fn delete(&self, resource: &str, id: &str) -> Result<(), ClientError> {
        let url = self.item_url(resource, id);
        send(self.http.delete(&url).bearer_auth(self.bearer()?))?;
        Ok(())
    }

    pub fn login(&self, username: &str, password: &str) -> Result<Tokens, ClientError> {
        let url = format!("{}/auth/login/", self.base_url);
        let body = send(
            self.http
                .post(&url)
                .json(&json!({ "username": username, "password": password })),
        )?;
        let access = body.pointer("/tokens/access").and_then(scalar_text);
        let refresh = body.pointer("/tokens/refresh").and_then(scalar_text);
        match (access, refresh) {
            (Some(access), Some(refresh)) => Ok(Tokens { access, refresh }),
            _ => Err(ClientError::Unauthorized(
                "login response carried no tokens".to_string(),
            )),
        }
    }

    pub fn refresh_access(&self, refresh: &str) -> Result<String, ClientError> {
        let url = format!("{}/token/refresh/", self.base_url);
        let body = send(self.http.post(&url).json(&json!({ "refresh": refresh })))?;
        body.get("access")
            .and_then(scalar_text)
            .ok_or_else(|| ClientError::Unauthorized("refresh response carried no access token".to_string()))
    }

    pub fn logout(&self, refresh: &str) -> Result<(), ClientError> {
        let url = format!("{}/auth/logout/", self.base_url);
        send(
            self.http
                .post(&url)
                .bearer_auth(self.bearer()?)
                .json(&json!({ "refresh_token": refresh })),
        )?;
        Ok(())
    }
}

impl RecordSource for RemoteClient {
    fn list(&self, resource: &str) -> Result<Vec<Record>, ClientError> {
        RemoteClient::list(self, resource)
    }
}

fn with_body(
    req: RequestBuilder,
    data: &Record,
    photo: Option<&Path>,
) -> Result<RequestBuilder, ClientError> {
    let Some(path) = photo else {
        return Ok(req.json(data));
    };
    let mut form = multipart::Form::new();
    for (field, value) in data.fields() {
        match value {
            Value::Null => form = form.text(field.clone(), String::new()),
            Value::Object(_) | Value::Array(_) => continue,
            v => form = form.text(field.clone(), scalar_text(v).unwrap_or_default()),
        }
    }
    let form = form.file("photo", path).map_err(|e| ClientError::Validation {
        message: format!("cannot read photo {}: {}", path.to_string_lossy(), e),
        fields: json!({ "photo": [e.to_string()] }),
    })?;
    Ok(req.multipart(form))
}

fn expect_record(body: Value, url: &str) -> Result<Record, ClientError> {
    match body {
        Value::Null => Ok(Record::new()),
        other => Record::from_value(other)
            .ok_or_else(|| ClientError::Network(format!("unexpected response from {}", url))),
    }
}

fn send(req: RequestBuilder) -> Result<Value, ClientError> {
    let resp = req.send().map_err(|e| ClientError::Network(e.to_string()))?;
    let status = resp.status();
    let text = resp.text().map_err(|e| ClientError::Network(e.to_string()))?;
    let body: Option<Value> = if text.trim().is_empty() {
        None
    } else {
        match serde_json::from_str(&text) {
            Ok(v) => Some(v),
            Err(e) if status.is_success() => {
                return Err(ClientError::Network(format!("invalid JSON response: {}", e)))
            }
            Err(_) => None,
        }
    };

    if status.is_success() {
        return Ok(body.unwrap_or(Value::Null));
    }
    let message = error_message(body.as_ref(), status);
    Err(match status.as_u16() {
        401 => ClientError::Unauthorized(message),
        400 => ClientError::Validation {
            message,
            fields: body.unwrap_or(Value::Null),
        },
        s => ClientError::Server { status: s, message },
    })
}

/// `detail`, then `error`, then `message`, then the first field error, then the status line.
fn error_message(body: Option<&Value>, status: StatusCode) -> String {
    if let Some(body) = body {
        for k in ["detail", "error", "message"] {
            if let Some(t) = body.get(k).and_then(scalar_text) {
                return t;
            }
        }
        if let Some(map) = body.as_object() {
            for (field, v) in map {
                let first = match v {
                    Value::Array(items) => items.first().and_then(scalar_text),
                    other => scalar_text(other),
                };
                if let Some(t) = first {
                    return format!("{}: {}", field, t);
                }
            }
        }
    }
    format!(
        "Request failed with status code {}{}",
        status.as_u16(),
        status
            .canonical_reason()
            .map(|r| format!(" ({})", r))
            .unwrap_or_default()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_prefers_detail_then_field_errors() {
        let detail = json!({ "detail": "Authentication credentials were not provided." });
        assert_eq!(
            error_message(Some(&detail), StatusCode::UNAUTHORIZED),
            "Authentication credentials were not provided."
        );
        let fields = json!({ "roll": ["student with this roll already exists."] });
        assert_eq!(
            error_message(Some(&fields), StatusCode::BAD_REQUEST),
            "roll: student with this roll already exists."
        );
        assert_eq!(
            error_message(None, StatusCode::INTERNAL_SERVER_ERROR),
            "Request failed with status code 500 (Internal Server Error)"
        );
    }

    #[test]
    fn urls_keep_trailing_slashes() {
        let c = RemoteClient::new("http://localhost:8000/api/", Duration::from_secs(1)).expect("client");
        assert_eq!(c.collection_url("students/marks"), "http://localhost:8000/api/students/marks/");
        assert_eq!(c.item_url("users", "4"), "http://localhost:8000/api/users/4/");
    }

    #[test]
    fn missing_token_is_unauthorized_without_a_request() {
        let c = RemoteClient::new("http://127.0.0.1:9", Duration::from_secs(1)).expect("client");
        let err = c.list("students").expect_err("no token");
        assert!(err.is_unauthorized());
        assert_eq!(err.code(), "unauthorized");
    }
}
