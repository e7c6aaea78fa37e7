//! Listener-based capture of console output, page errors, dialogs and
//! network traffic for the lifetime of one page.
//!
//! A [`CaptureSession`] owns the collected logs. It consumes the page's event
//! stream on a single task, so entries are appended in delivery order, and it
//! stops appending once [`CaptureSession::detach`] returns. Network events
//! that overtake their request are held until the request arrives.

pub mod artifacts;
pub mod sink;

use crate::driver::{ConsoleEvent, Page, PageEvent, RequestEvent, ResponseEvent};
use crate::error::Result;
use crate::model::{ConsoleLevel, ConsoleLog, NetworkLog, RequestRecord, ResponseRecord};
use base64::Engine;
use chrono::Utc;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use sink::DiagnosticSink;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// How long `detach` lets the listener finish draining before aborting it.
const DETACH_GRACE: Duration = Duration::from_secs(5);

#[derive(Default)]
struct CaptureState {
    console: Vec<ConsoleLog>,
    network: Vec<NetworkLog>,
    /// Request id → index of its current entry in `network`.
    by_request: HashMap<String, usize>,
    /// Request id → backend timestamp of its response.
    response_at: HashMap<String, f64>,
    /// Responses, completions and failures that arrived before their request.
    early: HashMap<String, Vec<PageEvent>>,
    closed: bool,
}

impl CaptureState {
    fn entry_mut(&mut self, request_id: &str) -> Option<&mut NetworkLog> {
        let index = *self.by_request.get(request_id)?;
        self.network.get_mut(index)
    }
}

pub struct CaptureSession {
    state: Arc<Mutex<CaptureState>>,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl CaptureSession {
    /// Subscribe to `page` and start collecting.
    pub async fn attach(page: Arc<dyn Page>, sink: Arc<dyn DiagnosticSink>) -> Result<Self> {
        let events = page.events().await?;
        let state = Arc::new(Mutex::new(CaptureState::default()));
        let (stop_tx, stop_rx) = oneshot::channel();

        let listener = Listener {
            page,
            sink,
            state: state.clone(),
        };
        let task = tokio::spawn(listener.run(events, stop_rx));

        Ok(Self {
            state,
            stop: Some(stop_tx),
            task: Some(task),
        })
    }

    /// Stop capturing. Events already delivered are processed first; nothing
    /// is appended after this returns. Calling it twice is a no-op.
    pub async fn detach(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(DETACH_GRACE, &mut task).await.is_err() {
                tracing::warn!("Capture listener did not drain in time, aborting");
                task.abort();
            }
        }
        if let Ok(mut state) = self.state.lock() {
            state.closed = true;
            if !state.early.is_empty() {
                tracing::debug!(
                    requests = state.early.len(),
                    "Discarding network events whose request was never seen"
                );
                state.early.clear();
            }
        }
    }

    pub fn console_logs(&self) -> Vec<ConsoleLog> {
        self.state
            .lock()
            .map(|s| s.console.clone())
            .unwrap_or_default()
    }

    pub fn network_logs(&self) -> Vec<NetworkLog> {
        self.state
            .lock()
            .map(|s| s.network.clone())
            .unwrap_or_default()
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Which response bodies are worth keeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BodyKind {
    Json,
    Text,
}

pub(crate) fn body_kind(content_type: &str) -> Option<BodyKind> {
    let content_type = content_type.to_ascii_lowercase();
    if content_type.contains("json") {
        Some(BodyKind::Json)
    } else if content_type.starts_with("text/") {
        Some(BodyKind::Text)
    } else {
        None
    }
}

/// Request bodies are kept as JSON when they parse, raw text otherwise.
fn request_body(post_data: Option<String>) -> Option<serde_json::Value> {
    post_data.map(|data| {
        serde_json::from_str(&data).unwrap_or(serde_json::Value::String(data))
    })
}

/// Request id of an event that completes a previously sent request.
fn followup_request_id(event: &PageEvent) -> Option<&str> {
    match event {
        PageEvent::Response(response) => Some(response.request_id.as_str()),
        PageEvent::RequestFinished { request_id, .. }
        | PageEvent::RequestFailed { request_id, .. } => Some(request_id.as_str()),
        _ => None,
    }
}

fn console_message(event: &ConsoleEvent) -> String {
    event
        .args
        .iter()
        .map(|arg| arg.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

struct Listener {
    page: Arc<dyn Page>,
    sink: Arc<dyn DiagnosticSink>,
    state: Arc<Mutex<CaptureState>>,
}

impl Listener {
    async fn run(self, mut events: BoxStream<'static, PageEvent>, mut stop: oneshot::Receiver<()>) {
        loop {
            tokio::select! {
                biased;
                event = events.next() => match event {
                    Some(event) => self.handle(event).await,
                    None => break,
                },
                _ = &mut stop => {
                    while let Some(Some(event)) = events.next().now_or_never() {
                        self.handle(event).await;
                    }
                    break;
                }
            }
        }
    }

    async fn handle(&self, event: PageEvent) {
        match event {
            PageEvent::Console(event) => {
                let args: Vec<serde_json::Value> = event
                    .args
                    .iter()
                    .filter_map(|arg| arg.value.clone())
                    .filter(|value| !value.is_null())
                    .collect();
                let log = ConsoleLog {
                    level: event.level,
                    message: console_message(&event),
                    location: event.location.clone(),
                    timestamp: Utc::now(),
                    stack_trace: event.stack.clone(),
                    args: (!event.args.is_empty()).then_some(args),
                };
                self.push_console(log);
            }
            PageEvent::PageError {
                message,
                url,
                stack,
            } => {
                self.push_console(ConsoleLog {
                    level: ConsoleLevel::Error,
                    message,
                    location: url,
                    timestamp: Utc::now(),
                    stack_trace: stack,
                    args: None,
                });
            }
            PageEvent::Dialog { kind, message } => {
                self.push_console(ConsoleLog {
                    level: ConsoleLevel::Info,
                    message: format!("Dialog ({}): {}", kind, message),
                    location: None,
                    timestamp: Utc::now(),
                    stack_trace: None,
                    args: None,
                });
                // Headless runs must never block on a native dialog.
                if let Err(e) = self.page.accept_dialog().await {
                    tracing::warn!(error = %e, "Failed to accept dialog");
                }
            }
            PageEvent::Request(request) => {
                for early in self.on_request(request) {
                    self.on_followup(early).await;
                }
            }
            followup => self.on_followup(followup).await,
        }
    }

    /// Apply a response, completion or failure, or hold it back until its
    /// request shows up.
    async fn on_followup(&self, event: PageEvent) {
        {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            if state.closed {
                return;
            }
            let Some(request_id) = followup_request_id(&event) else {
                return;
            };
            if !state.by_request.contains_key(request_id) {
                let request_id = request_id.to_string();
                state.early.entry(request_id).or_default().push(event);
                return;
            }
        }
        match event {
            PageEvent::Response(response) => self.on_response(response),
            PageEvent::RequestFinished {
                request_id,
                timestamp,
            } => self.on_finished(&request_id, timestamp).await,
            PageEvent::RequestFailed {
                request_id,
                error_text,
            } => self.on_failed(&request_id, error_text),
            _ => {}
        }
    }

    fn push_console(&self, log: ConsoleLog) {
        self.sink.emit(&log);
        if let Ok(mut state) = self.state.lock() {
            if !state.closed {
                state.console.push(log);
            }
        }
    }

    /// Record the request and hand back anything that arrived ahead of it.
    fn on_request(&self, request: RequestEvent) -> Vec<PageEvent> {
        let Ok(mut state) = self.state.lock() else {
            return Vec::new();
        };
        if state.closed {
            return Vec::new();
        }
        let entry = NetworkLog {
            id: uuid::Uuid::new_v4().to_string(),
            request_id: request.request_id.clone(),
            request: RequestRecord {
                url: request.url,
                method: request.method,
                headers: request.headers,
                body: request_body(request.post_data),
                timestamp: Utc::now(),
            },
            response: None,
            error: None,
        };
        let index = state.network.len();
        state.network.push(entry);
        let early = state.early.remove(&request.request_id).unwrap_or_default();
        state.by_request.insert(request.request_id, index);
        early
    }

    fn on_response(&self, response: ResponseEvent) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if state.closed {
            return;
        }
        state
            .response_at
            .insert(response.request_id.clone(), response.timestamp);
        if let Some(entry) = state.entry_mut(&response.request_id) {
            entry.response = Some(ResponseRecord {
                status: response.status,
                status_text: response.status_text,
                headers: response.headers,
                body: None,
                mime_type: response.mime_type,
                timing: response.timing,
            });
        }
    }

    fn on_failed(&self, request_id: &str, error_text: String) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if state.closed {
            return;
        }
        if let Some(entry) = state.entry_mut(request_id) {
            entry.error = Some(error_text);
        }
    }

    async fn on_finished(&self, request_id: &str, timestamp: f64) {
        let kind = {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            if state.closed {
                return;
            }
            let response_at = state.response_at.get(request_id).copied();
            let Some(response) = state
                .entry_mut(request_id)
                .and_then(|entry| entry.response.as_mut())
            else {
                return;
            };
            if let Some(start) = response_at {
                if timestamp > start {
                    response.timing.receive = (timestamp - start) * 1000.0;
                }
            }
            let content_type = response
                .headers
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
                .map(|(_, value)| value.clone())
                .unwrap_or_else(|| response.mime_type.clone());
            body_kind(&content_type)
        };

        let Some(kind) = kind else {
            return;
        };
        let body = self.read_body(request_id, kind).await;

        if let Ok(mut state) = self.state.lock() {
            if state.closed {
                return;
            }
            if let Some(response) = state
                .entry_mut(request_id)
                .and_then(|entry| entry.response.as_mut())
            {
                response.body = Some(body);
            }
        }
    }

    /// Any failure reads as `null`.
    async fn read_body(&self, request_id: &str, kind: BodyKind) -> serde_json::Value {
        let raw = match self.page.response_body(request_id).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::debug!(request_id, error = %e, "Response body unavailable");
                return serde_json::Value::Null;
            }
        };
        let text = if raw.base64_encoded {
            match base64::engine::general_purpose::STANDARD
                .decode(raw.body.as_bytes())
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
            {
                Some(text) => text,
                None => return serde_json::Value::Null,
            }
        } else {
            raw.body
        };
        match kind {
            BodyKind::Json => serde_json::from_str(&text).unwrap_or(serde_json::Value::Null),
            BodyKind::Text => serde_json::Value::String(text),
        }
    }
}
