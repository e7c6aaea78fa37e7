//! Scripted in-memory browser driver for integration tests.
//!
//! Every driver call is counted, any stage can be told to fail, and a
//! navigation replays a scripted list of page events. Like the CDP driver,
//! each event type has its own source and the sources are merged with
//! [`merge_page_events`].

#![allow(dead_code)]

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::stream::BoxStream;
use futures::StreamExt;
use mcp_harness_core::driver::events::{merge_page_events, ready_event};
use mcp_harness_core::driver::{
    Browser, BrowserContext, BrowserDriver, ConsoleArg, ConsoleEvent, ContextOptions,
    LaunchOptions, NavigationResponse, Page, PageEvent, RequestEvent, ResponseBody, ResponseEvent,
    WaitUntil,
};
use mcp_harness_core::model::{ConsoleLevel, Headers, ResponseTiming};
use mcp_harness_core::{HarnessError, Result};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// A 1x1 transparent PNG.
pub const PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F, 0x15, 0xC4,
    0x89, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00, 0x01, 0x00, 0x00,
    0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE,
    0x42, 0x60, 0x82,
];

/// Which stage should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailAt {
    Launch,
    NewContext,
    StartTracing,
    NewPage,
    Events,
    Goto,
    Evaluate,
    StopTracing,
    Close,
}

#[derive(Debug, Clone)]
pub struct Script {
    pub fail_at: HashSet<FailAt>,
    /// Main-document status; `None` simulates a navigation without response.
    pub status: Option<u16>,
    /// Navigation never completes within its timeout.
    pub goto_times_out: bool,
    /// Replayed on every `goto`, in order.
    pub events_on_goto: Vec<PageEvent>,
    /// Fires an alert on `goto`, which then blocks until it is accepted.
    pub alert_on_goto: Option<String>,
    pub bodies: HashMap<String, ResponseBody>,
    /// Expression → result; anything else evaluates to `default_value`.
    pub evaluations: HashMap<String, serde_json::Value>,
    pub default_value: serde_json::Value,
    pub texts: HashMap<String, String>,
    pub selectors: HashSet<String>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            fail_at: HashSet::new(),
            status: Some(200),
            goto_times_out: false,
            events_on_goto: Vec::new(),
            alert_on_goto: None,
            bodies: HashMap::new(),
            evaluations: HashMap::new(),
            default_value: serde_json::json!({}),
            texts: HashMap::new(),
            selectors: HashSet::new(),
        }
    }
}

impl Script {
    pub fn failing(stage: FailAt) -> Self {
        let mut script = Self::default();
        script.fail_at.insert(stage);
        script
    }

    fn fails(&self, stage: FailAt) -> bool {
        self.fail_at.contains(&stage)
    }
}

#[derive(Debug, Default)]
pub struct Calls {
    pub launch: AtomicUsize,
    pub new_context: AtomicUsize,
    pub start_tracing: AtomicUsize,
    pub stop_tracing: AtomicUsize,
    pub goto: AtomicUsize,
    pub evaluate: AtomicUsize,
    pub screenshot: AtomicUsize,
    pub accept_dialog: AtomicUsize,
    pub page_close: AtomicUsize,
    pub context_close: AtomicUsize,
    pub browser_close: AtomicUsize,
    /// Context options of the last `new_context`.
    pub video_dir_requested: Mutex<Option<bool>>,
    /// Interactions as "action:selector".
    pub actions: Mutex<Vec<String>>,
}

impl Calls {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    pub fn actions(&self) -> Vec<String> {
        self.actions.lock().unwrap().clone()
    }
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::SeqCst);
}

fn injected(stage: FailAt) -> HarnessError {
    HarnessError::browser(format!("injected failure at {:?}", stage))
}

pub struct FakeDriver {
    pub script: Script,
    pub calls: Arc<Calls>,
}

impl FakeDriver {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            calls: Arc::new(Calls::default()),
        })
    }
}

#[async_trait]
impl BrowserDriver for FakeDriver {
    async fn launch(&self, _options: &LaunchOptions) -> Result<Box<dyn Browser>> {
        bump(&self.calls.launch);
        if self.script.fails(FailAt::Launch) {
            return Err(injected(FailAt::Launch));
        }
        Ok(Box::new(FakeBrowser {
            script: self.script.clone(),
            calls: self.calls.clone(),
        }))
    }
}

struct FakeBrowser {
    script: Script,
    calls: Arc<Calls>,
}

#[async_trait]
impl Browser for FakeBrowser {
    async fn new_context(&self, options: &ContextOptions) -> Result<Box<dyn BrowserContext>> {
        bump(&self.calls.new_context);
        *self.calls.video_dir_requested.lock().unwrap() = Some(options.record_video_dir.is_some());
        if self.script.fails(FailAt::NewContext) {
            return Err(injected(FailAt::NewContext));
        }
        Ok(Box::new(FakeContext {
            script: self.script.clone(),
            calls: self.calls.clone(),
        }))
    }

    async fn close(&self) -> Result<()> {
        bump(&self.calls.browser_close);
        if self.script.fails(FailAt::Close) {
            return Err(injected(FailAt::Close));
        }
        Ok(())
    }
}

struct FakeContext {
    script: Script,
    calls: Arc<Calls>,
}

#[async_trait]
impl BrowserContext for FakeContext {
    async fn new_page(&self) -> Result<Arc<dyn Page>> {
        if self.script.fails(FailAt::NewPage) {
            return Err(injected(FailAt::NewPage));
        }
        Ok(Arc::new(FakePage::new(
            self.script.clone(),
            self.calls.clone(),
        )))
    }

    async fn start_tracing(&self) -> Result<()> {
        bump(&self.calls.start_tracing);
        if self.script.fails(FailAt::StartTracing) {
            return Err(injected(FailAt::StartTracing));
        }
        Ok(())
    }

    async fn stop_tracing(&self, archive: &Path) -> Result<()> {
        bump(&self.calls.stop_tracing);
        if self.script.fails(FailAt::StopTracing) {
            return Err(injected(FailAt::StopTracing));
        }
        if let Some(parent) = archive.parent() {
            std::fs::create_dir_all(parent).map_err(|e| HarnessError::io(parent, e))?;
        }
        std::fs::write(archive, b"trace").map_err(|e| HarnessError::io(archive, e))
    }

    async fn close(&self) -> Result<()> {
        bump(&self.calls.context_close);
        if self.script.fails(FailAt::Close) {
            return Err(injected(FailAt::Close));
        }
        Ok(())
    }
}

const SOURCES: usize = 7;

fn source_index(event: &PageEvent) -> usize {
    match event {
        PageEvent::Console(_) => 0,
        PageEvent::PageError { .. } => 1,
        PageEvent::Dialog { .. } => 2,
        PageEvent::Request(_) => 3,
        PageEvent::Response(_) => 4,
        PageEvent::RequestFinished { .. } => 5,
        PageEvent::RequestFailed { .. } => 6,
    }
}

pub struct FakePage {
    script: Script,
    calls: Arc<Calls>,
    /// One sender per event type, indexed by [`source_index`].
    senders: Mutex<Vec<mpsc::UnboundedSender<PageEvent>>>,
    url: Mutex<Option<String>>,
    dialog_accepted: Notify,
}

impl FakePage {
    pub fn new(script: Script, calls: Arc<Calls>) -> Self {
        Self {
            script,
            calls,
            senders: Mutex::new(Vec::new()),
            url: Mutex::new(None),
            dialog_accepted: Notify::new(),
        }
    }

    /// Deliver an event to the subscriber, if any.
    pub fn emit(&self, event: PageEvent) {
        let index = source_index(&event);
        if let Some(sender) = self.senders.lock().unwrap().get(index) {
            let _ = sender.unbounded_send(event);
        }
    }

    fn record(&self, action: &str, target: &str) {
        self.calls
            .actions
            .lock()
            .unwrap()
            .push(format!("{}:{}", action, target));
    }

    fn require(&self, selector: &str) -> Result<()> {
        if self.script.selectors.contains(selector) || self.script.texts.contains_key(selector) {
            Ok(())
        } else {
            Err(HarnessError::browser(format!("Element not found: {}", selector)))
        }
    }
}

#[async_trait]
impl Page for FakePage {
    async fn events(&self) -> Result<BoxStream<'static, PageEvent>> {
        if self.script.fails(FailAt::Events) {
            return Err(injected(FailAt::Events));
        }
        let mut senders = Vec::with_capacity(SOURCES);
        let mut sources = Vec::with_capacity(SOURCES);
        for _ in 0..SOURCES {
            let (tx, rx) = mpsc::unbounded();
            senders.push(tx);
            sources.push(rx.map(ready_event).boxed());
        }
        *self.senders.lock().unwrap() = senders;
        Ok(merge_page_events(sources))
    }

    async fn goto(
        &self,
        url: &str,
        _wait_until: WaitUntil,
        timeout: Duration,
    ) -> Result<Option<NavigationResponse>> {
        bump(&self.calls.goto);
        if self.script.fails(FailAt::Goto) {
            return Err(injected(FailAt::Goto));
        }
        if self.script.goto_times_out {
            return Err(HarnessError::Timeout {
                action: format!("Navigation to {}", url),
                ms: timeout.as_millis() as u64,
            });
        }

        *self.url.lock().unwrap() = Some(url.to_string());
        for event in &self.script.events_on_goto {
            self.emit(event.clone());
        }

        if let Some(message) = &self.script.alert_on_goto {
            self.emit(PageEvent::Dialog {
                kind: "alert".into(),
                message: message.clone(),
            });
            // A real page stays blocked until the dialog is handled.
            tokio::time::timeout(timeout, self.dialog_accepted.notified())
                .await
                .map_err(|_| HarnessError::Timeout {
                    action: format!("Navigation to {}", url),
                    ms: timeout.as_millis() as u64,
                })?;
        }

        Ok(self.script.status.map(|status| NavigationResponse {
            url: url.to_string(),
            status,
            status_text: if status < 400 {
                "OK".into()
            } else {
                "Internal Server Error".into()
            },
        }))
    }

    async fn url(&self) -> Result<Option<String>> {
        Ok(self.url.lock().unwrap().clone())
    }

    async fn content(&self) -> Result<String> {
        Ok("<html><body><h1>Shop</h1></body></html>".into())
    }

    async fn screenshot(&self, _full_page: bool) -> Result<Vec<u8>> {
        bump(&self.calls.screenshot);
        Ok(PNG.to_vec())
    }

    async fn evaluate(&self, expression: &str) -> Result<serde_json::Value> {
        bump(&self.calls.evaluate);
        if self.script.fails(FailAt::Evaluate) {
            return Err(injected(FailAt::Evaluate));
        }
        Ok(self
            .script
            .evaluations
            .get(expression)
            .cloned()
            .unwrap_or_else(|| self.script.default_value.clone()))
    }

    async fn accept_dialog(&self) -> Result<()> {
        bump(&self.calls.accept_dialog);
        self.dialog_accepted.notify_one();
        Ok(())
    }

    async fn response_body(&self, request_id: &str) -> Result<ResponseBody> {
        self.script
            .bodies
            .get(request_id)
            .cloned()
            .ok_or_else(|| HarnessError::browser("No resource with given identifier found"))
    }

    async fn click(&self, selector: &str) -> Result<()> {
        self.require(selector)?;
        self.record("click", selector);
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<()> {
        self.require(selector)?;
        self.record("fill", &format!("{}={}", selector, value));
        Ok(())
    }

    async fn hover(&self, selector: &str) -> Result<()> {
        self.require(selector)?;
        self.record("hover", selector);
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        self.record("press", key);
        Ok(())
    }

    async fn inner_text(&self, selector: &str) -> Result<Option<String>> {
        Ok(self.script.texts.get(selector).cloned())
    }

    async fn exists(&self, selector: &str) -> Result<bool> {
        Ok(self.require(selector).is_ok())
    }

    async fn close(&self) -> Result<()> {
        bump(&self.calls.page_close);
        if self.script.fails(FailAt::Close) {
            return Err(injected(FailAt::Close));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Event builders
// ---------------------------------------------------------------------------

pub fn headers(pairs: &[(&str, &str)]) -> Headers {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn request(id: &str, url: &str, method: &str, pairs: &[(&str, &str)]) -> PageEvent {
    PageEvent::Request(RequestEvent {
        request_id: id.into(),
        url: url.into(),
        method: method.into(),
        headers: headers(pairs),
        post_data: None,
    })
}

pub fn response(id: &str, url: &str, status: u16, content_type: &str, at: f64) -> PageEvent {
    PageEvent::Response(ResponseEvent {
        request_id: id.into(),
        url: url.into(),
        status,
        status_text: String::new(),
        headers: headers(&[("content-type", content_type)]),
        mime_type: content_type.split(';').next().unwrap_or("").trim().into(),
        timing: ResponseTiming::default(),
        timestamp: at,
    })
}

pub fn finished(id: &str, at: f64) -> PageEvent {
    PageEvent::RequestFinished {
        request_id: id.into(),
        timestamp: at,
    }
}

pub fn console(level: ConsoleLevel, args: &[(&str, Option<serde_json::Value>)]) -> PageEvent {
    PageEvent::Console(ConsoleEvent {
        level,
        args: args
            .iter()
            .map(|(text, value)| ConsoleArg {
                text: text.to_string(),
                value: value.clone(),
            })
            .collect(),
        location: Some("https://example.test/app.js:1:1".into()),
        stack: None,
    })
}

pub fn text_body(body: &str) -> ResponseBody {
    ResponseBody {
        body: body.into(),
        base64_encoded: false,
    }
}
