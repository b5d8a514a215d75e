#![allow(dead_code)]

use serde_json::{json, Value};
use std::collections::HashSet;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

/// In-memory school backend speaking the REST shape rosterd expects.
#[derive(Debug, Default)]
pub struct FakeBackend {
    pub students: Vec<Value>,
    pub marks: Vec<Value>,
    pub users: Vec<Value>,
    pub tokens: HashSet<String>,
    pub fail_students: bool,
    pub next_id: i64,
    pub hits: Vec<String>,
}

impl FakeBackend {
    pub fn seeded() -> Self {
        Self {
            students: vec![
                json!({ "id": 1, "name": "Grace Hopper", "roll": 11, "student_class": "10", "address": "Arlington" }),
                json!({ "id": 2, "name": "Alan Mathison Turing", "roll": 12, "student_class": "10", "address": "London" }),
            ],
            marks: vec![json!({
                "student": { "id": 1, "name": "Grace Hopper", "roll": 11 },
                "DSA": 90, "Java": 80, "SAD": 70, "Web_technology": 60, "Prob_and_Stats": 51
            })],
            users: vec![json!({
                "id": 7, "username": "admin", "email": "admin@example.com",
                "first_name": "Ada", "last_name": "Admin", "group": "staff", "status": "active"
            })],
            next_id: 100,
            ..Default::default()
        }
    }

    fn route(&mut self, method: &str, path: &str, auth: Option<&str>, body: &str) -> (u16, Value) {
        self.hits.push(format!("{} {}", method, path));
        let body: Value = serde_json::from_str(body).unwrap_or(Value::Null);
        let segments: Vec<&str> = path
            .trim_start_matches("/api/")
            .trim_end_matches('/')
            .split('/')
            .collect();

        match (method, segments.as_slice()) {
            ("POST", ["auth", "login"]) => {
                if body["password"] == "secret" {
                    self.tokens.insert("access-1".to_string());
                    return (
                        200,
                        json!({ "tokens": { "access": "access-1", "refresh": "refresh-1" } }),
                    );
                }
                return (401, json!({ "detail": "No active account found with the given credentials" }));
            }
            ("POST", ["token", "refresh"]) => {
                if body["refresh"] == "refresh-1" {
                    self.tokens.insert("access-2".to_string());
                    return (200, json!({ "access": "access-2" }));
                }
                return (401, json!({ "detail": "Token is invalid or expired" }));
            }
            _ => {}
        }

        let authorized = auth
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(|t| self.tokens.contains(t))
            .unwrap_or(false);
        if !authorized {
            return (401, json!({ "detail": "Given token not valid for any token type" }));
        }

        match (method, segments.as_slice()) {
            ("POST", ["auth", "logout"]) => (200, json!({})),
            ("GET", ["students"]) if self.fail_students => {
                (500, json!({ "error": "database is on fire" }))
            }
            ("GET", ["students"]) => (200, Value::Array(self.students.clone())),
            ("GET", ["students", "marks"]) => (200, Value::Array(self.marks.clone())),
            ("GET", ["users"]) => (200, Value::Array(self.users.clone())),
            ("POST", ["students"]) => {
                if body.get("name").and_then(|v| v.as_str()).unwrap_or("").is_empty() {
                    return (400, json!({ "name": ["This field is required."] }));
                }
                self.next_id += 1;
                let mut created = body.clone();
                created["id"] = json!(self.next_id);
                self.students.push(created.clone());
                (201, created)
            }
            ("GET", ["students", id]) => match self.find_student(id) {
                Some(i) => (200, self.students[i].clone()),
                None => (404, json!({ "detail": "Not found." })),
            },
            ("PUT", ["students", id]) => match self.find_student(id) {
                Some(i) => {
                    let mut updated = body.clone();
                    updated["id"] = self.students[i]["id"].clone();
                    self.students[i] = updated.clone();
                    (200, updated)
                }
                None => (404, json!({ "detail": "Not found." })),
            },
            ("DELETE", ["students", id]) => match self.find_student(id) {
                Some(i) => {
                    self.students.remove(i);
                    (204, Value::Null)
                }
                None => (404, json!({ "detail": "Not found." })),
            },
            _ => (404, json!({ "detail": "Not found." })),
        }
    }

    fn find_student(&self, id: &str) -> Option<usize> {
        self.students
            .iter()
            .position(|s| s["id"].to_string() == id)
    }
}

pub struct FakeServer {
    pub base_url: String,
    pub backend: Arc<Mutex<FakeBackend>>,
}

impl FakeServer {
    pub fn start(backend: FakeBackend) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind fake api");
        let addr = listener.local_addr().expect("local addr");
        let backend = Arc::new(Mutex::new(backend));
        let shared = Arc::clone(&backend);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                let shared = Arc::clone(&shared);
                thread::spawn(move || serve(stream, &shared));
            }
        });
        Self {
            base_url: format!("http://{}/api", addr),
            backend,
        }
    }

    pub fn with<T>(&self, f: impl FnOnce(&mut FakeBackend) -> T) -> T {
        let mut guard = self.backend.lock().expect("backend lock");
        f(&mut guard)
    }
}

fn serve(stream: TcpStream, backend: &Mutex<FakeBackend>) {
    let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).is_err() {
        return;
    }
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("").to_string();
    let path = parts.next().unwrap_or("").to_string();

    let mut content_length = 0usize;
    let mut auth = None;
    loop {
        let mut header = String::new();
        if reader.read_line(&mut header).is_err() || header.trim().is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            match name.trim().to_ascii_lowercase().as_str() {
                "content-length" => content_length = value.trim().parse().unwrap_or(0),
                "authorization" => auth = Some(value.trim().to_string()),
                _ => {}
            }
        }
    }
    let mut body = vec![0u8; content_length];
    if reader.read_exact(&mut body).is_err() {
        return;
    }
    let body = String::from_utf8_lossy(&body).to_string();

    let (status, payload) = backend
        .lock()
        .expect("backend lock")
        .route(&method, &path, auth.as_deref(), &body);
    let text = if payload.is_null() {
        String::new()
    } else {
        payload.to_string()
    };
    let reason = match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        _ => "Internal Server Error",
    };
    let mut stream = stream;
    let _ = write!(
        stream,
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        text.len(),
        text
    );
    let _ = stream.flush();
}

/// A running rosterd process: one "tab".
pub struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    lines: Receiver<String>,
    events: Vec<Value>,
    next_id: u64,
}

impl Sidecar {
    pub fn spawn() -> Self {
        // Timer ticks stay out of the way; tests drive refreshes explicitly.
        Self::spawn_polling(3_600_000)
    }

    pub fn spawn_polling(poll_interval_ms: u64) -> Self {
        let exe = env!("CARGO_BIN_EXE_rosterd");
        let mut child = Command::new(exe)
            .env("ROSTERD_POLL_INTERVAL_MS", poll_interval_ms.to_string())
            .env("ROSTERD_REQUEST_TIMEOUT_SECS", "5")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn rosterd");
        let stdin = child.stdin.take().expect("child stdin");
        let stdout = child.stdout.take().expect("child stdout");
        let (tx, lines) = mpsc::channel();
        thread::spawn(move || {
            for line in BufReader::new(stdout).lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
        Self {
            child,
            stdin,
            lines,
            events: Vec::new(),
            next_id: 0,
        }
    }

    pub fn open_workspace(workspace: &Path, api: &FakeServer) -> Self {
        let mut sc = Self::spawn();
        sc.request_ok(
            "workspace.select",
            json!({ "path": workspace.to_string_lossy(), "apiBaseUrl": api.base_url }),
        );
        sc
    }

    pub fn send_raw(&mut self, line: &str) -> Value {
        writeln!(self.stdin, "{}", line).expect("write request");
        self.stdin.flush().expect("flush request");
        self.next_line()
    }

    fn next_line(&mut self) -> Value {
        let line = self
            .lines
            .recv_timeout(Duration::from_secs(20))
            .expect("response line");
        serde_json::from_str(line.trim()).expect("parse response json")
    }

    /// Sends one request and returns its response; event lines that arrive
    /// first are kept for `wait_event`.
    pub fn request(&mut self, method: &str, params: Value) -> Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let payload = json!({ "id": id, "method": method, "params": params });
        writeln!(self.stdin, "{}", payload).expect("write request");
        self.stdin.flush().expect("flush request");
        loop {
            let value = self.next_line();
            if value.get("event").is_some() {
                self.events.push(value);
                continue;
            }
            assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
            return value;
        }
    }

    pub fn request_ok(&mut self, method: &str, params: Value) -> Value {
        let value = self.request(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(true),
            "{} failed: {}",
            method,
            value
        );
        value.get("result").cloned().unwrap_or(Value::Null)
    }

    pub fn request_err(&mut self, method: &str, params: Value) -> Value {
        let value = self.request(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            value
        );
        value.get("error").cloned().unwrap_or(Value::Null)
    }

    pub fn wait_event(&mut self, name: &str) -> Value {
        if let Some(i) = self.events.iter().position(|e| e["event"] == name) {
            return self.events.remove(i);
        }
        let deadline = Instant::now() + Duration::from_secs(20);
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            let line = self
                .lines
                .recv_timeout(left)
                .unwrap_or_else(|_| panic!("no {} event", name));
            let value: Value = serde_json::from_str(line.trim()).expect("parse event json");
            if value["event"] == name {
                return value;
            }
            self.events.push(value);
        }
    }
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub fn login(sc: &mut Sidecar) {
    let result = sc.request_ok(
        "session.login",
        json!({ "username": "teacher", "password": "secret" }),
    );
    assert_eq!(result["signedIn"], true);
}
