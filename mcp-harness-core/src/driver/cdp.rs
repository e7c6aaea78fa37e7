//! Chrome DevTools Protocol driver built on `chromiumoxide`.
//!
//! One browser process per run. Each context is an isolated CDP browser
//! context; pages are created inside it. Page events from the individual CDP
//! event listeners are merged in arrival order into a single [`PageEvent`]
//! stream.

use super::events::{merge_page_events, ready_event};
use super::keys::KeyStroke;
use super::{
    Browser, BrowserContext, BrowserDriver, BrowserKind, ConsoleArg, ConsoleEvent,
    ContextOptions, LaunchOptions, NavigationResponse, Page, PageEvent, RequestEvent,
    ResponseBody, ResponseEvent, WaitUntil,
};
use crate::error::{HarnessError, Result};
use crate::model::{ConsoleLevel, Headers, ResponseTiming};
use async_trait::async_trait;
use base64::Engine;
use chromiumoxide::browser::{Browser as ChromeBrowser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::input::{DispatchKeyEventParams, DispatchKeyEventType};
use chromiumoxide::cdp::browser_protocol::network::{
    self, EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent, EventResponseReceived,
    GetResponseBodyParams, ResourceType, Response,
};
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, CaptureScreenshotParams, EventJavascriptDialogOpening,
    EventLifecycleEvent, EventScreencastFrame, HandleJavaScriptDialogParams, NavigateParams,
    ScreencastFrameAckParams, SetLifecycleEventsEnabledParams, StartScreencastFormat,
    StartScreencastParams, StopScreencastParams,
};
use chromiumoxide::cdp::browser_protocol::security::SetIgnoreCertificateErrorsParams;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::cdp::browser_protocol::tracing::{
    EndParams, EventDataCollected, EventTracingComplete, StartParams, StartTransferMode,
    TraceConfig,
};
use chromiumoxide::cdp::js_protocol::runtime::{
    self, CallFunctionOnParams, ConsoleApiCalledType, EvaluateParams, EventConsoleApiCalled,
    EventExceptionThrown, RemoteObject, StackTrace,
};
use chromiumoxide::error::CdpError;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::listeners::EventStream;
use chromiumoxide::Page as ChromePage;
use futures::stream::{self, BoxStream};
use futures::{FutureExt, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tokio::task::JoinHandle;

/// Categories recorded into the trace: timeline, screenshots, DOM snapshots
/// and script sources.
const TRACE_CATEGORIES: &[&str] = &[
    "devtools.timeline",
    "v8.execute",
    "disabled-by-default-devtools.timeline",
    "disabled-by-default-devtools.timeline.frame",
    "disabled-by-default-devtools.screenshot",
    "disabled-by-default-devtools.timeline.snapshots",
    "disabled-by-default-v8.compile",
    "blink.user_timing",
    "loading",
    "latencyInfo",
];

/// How long `stop_tracing` waits for the browser to flush trace data.
const TRACE_FLUSH_TIMEOUT: Duration = Duration::from_secs(15);

fn cdp_err(context: &'static str) -> impl Fn(CdpError) -> HarnessError {
    move |e| HarnessError::Browser(format!("{}: {}", context, e))
}

/// Launches Chrome-family browsers over CDP.
#[derive(Debug, Clone, Default)]
pub struct CdpDriver {
    /// Fallback executable when the launch options carry none.
    pub browser_path: Option<PathBuf>,
}

impl CdpDriver {
    pub fn new(browser_path: Option<PathBuf>) -> Self {
        Self { browser_path }
    }

    fn resolve_executable(&self, options: &LaunchOptions) -> Result<Option<PathBuf>> {
        if let Some(path) = options.executable.clone().or_else(|| self.browser_path.clone()) {
            return Ok(Some(path));
        }
        let candidates: &[&str] = match options.browser {
            // chromiumoxide detects Chrome/Chromium installs on its own.
            BrowserKind::Chromium => return Ok(None),
            BrowserKind::Chrome => &["google-chrome", "google-chrome-stable", "chrome"],
            BrowserKind::Msedge => &["microsoft-edge", "microsoft-edge-stable", "msedge"],
        };
        candidates
            .iter()
            .find_map(|name| which::which(name).ok())
            .map(Some)
            .ok_or_else(|| {
                HarnessError::UnsupportedBrowser(format!(
                    "no {} executable found on PATH",
                    options.browser.as_str()
                ))
            })
    }
}

#[async_trait]
impl BrowserDriver for CdpDriver {
    async fn launch(&self, options: &LaunchOptions) -> Result<Box<dyn Browser>> {
        let mut builder = BrowserConfig::builder();

        if let Some(path) = self.resolve_executable(options)? {
            builder = builder.chrome_executable(path);
        }

        if !options.headless {
            builder = builder.with_head();
        }

        let (width, height) = options.viewport;
        builder = builder.window_size(width, height).viewport(Viewport {
            width,
            height,
            ..Default::default()
        });

        if options.ignore_https_errors {
            builder = builder.arg("--ignore-certificate-errors");
        }

        builder = builder
            .arg("--disable-dev-shm-usage")
            .arg("--remote-allow-origins=*");

        let config = builder
            .build()
            .map_err(|e| HarnessError::Browser(format!("Invalid browser config: {}", e)))?;

        let (browser, mut handler) = ChromeBrowser::launch(config)
            .await
            .map_err(cdp_err("Failed to launch browser"))?;

        let handler_task = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        tracing::info!(browser = options.browser.as_str(), headless = options.headless, "Browser launched");

        Ok(Box::new(CdpBrowser {
            inner: Arc::new(Mutex::new(Some(browser))),
            handler_task,
            ignore_https_errors: options.ignore_https_errors,
        }))
    }
}

type SharedBrowser = Arc<Mutex<Option<ChromeBrowser>>>;

async fn lock_browser(browser: &SharedBrowser) -> Result<MappedMutexGuard<'_, ChromeBrowser>> {
    MutexGuard::try_map(browser.lock().await, |b| b.as_mut())
        .map_err(|_| HarnessError::browser("Browser already closed"))
}

pub struct CdpBrowser {
    inner: SharedBrowser,
    handler_task: JoinHandle<()>,
    ignore_https_errors: bool,
}

#[async_trait]
impl Browser for CdpBrowser {
    async fn new_context(&self, options: &ContextOptions) -> Result<Box<dyn BrowserContext>> {
        let context_id = lock_browser(&self.inner)
            .await?
            .execute(CreateBrowserContextParams::default())
            .await
            .map(|resp| resp.result.browser_context_id.clone())
            .map_err(cdp_err("Failed to create browser context"))?;

        Ok(Box::new(CdpContext {
            browser: self.inner.clone(),
            context_id,
            options: options.clone(),
            ignore_https_errors: self.ignore_https_errors,
            trace: Mutex::new(None),
            pages: std::sync::atomic::AtomicUsize::new(0),
        }))
    }

    async fn close(&self) -> Result<()> {
        let taken = self.inner.lock().await.take();
        let result = match taken {
            Some(mut browser) => {
                let closed = browser.close().await.map_err(cdp_err("Failed to close browser"));
                let _ = browser.wait().await;
                closed.map(|_| ())
            }
            None => Ok(()),
        };
        self.handler_task.abort();
        result
    }
}

struct TraceStreams {
    data: EventStream<EventDataCollected>,
    complete: EventStream<EventTracingComplete>,
}

pub struct CdpContext {
    browser: SharedBrowser,
    context_id: BrowserContextId,
    options: ContextOptions,
    ignore_https_errors: bool,
    trace: Mutex<Option<TraceStreams>>,
    pages: std::sync::atomic::AtomicUsize,
}

#[async_trait]
impl BrowserContext for CdpContext {
    async fn new_page(&self) -> Result<Arc<dyn Page>> {
        let params = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(self.context_id.clone())
            .build()
            .map_err(HarnessError::Browser)?;

        let page = lock_browser(&self.browser)
            .await?
            .new_page(params)
            .await
            .map_err(cdp_err("Failed to create new page"))?;

        page.execute(network::EnableParams::default())
            .await
            .map_err(cdp_err("Failed to enable network domain"))?;
        page.execute(runtime::EnableParams::default())
            .await
            .map_err(cdp_err("Failed to enable runtime domain"))?;
        page.execute(SetLifecycleEventsEnabledParams::new(true))
            .await
            .map_err(cdp_err("Failed to enable lifecycle events"))?;
        if self.ignore_https_errors {
            page.execute(SetIgnoreCertificateErrorsParams::new(true))
                .await
                .map_err(cdp_err("Failed to ignore certificate errors"))?;
        }

        let index = self
            .pages
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let screencast = match &self.options.record_video_dir {
            Some(dir) => Some(start_screencast(&page, dir, index, self.options.viewport).await?),
            None => None,
        };

        Ok(Arc::new(CdpPage {
            page,
            screencast: std::sync::Mutex::new(screencast),
        }))
    }

    async fn start_tracing(&self) -> Result<()> {
        let browser = lock_browser(&self.browser).await?;
        let data = browser
            .event_listener::<EventDataCollected>()
            .await
            .map_err(cdp_err("Failed to listen for trace data"))?;
        let complete = browser
            .event_listener::<EventTracingComplete>()
            .await
            .map_err(cdp_err("Failed to listen for trace completion"))?;

        let params = StartParams::builder()
            .trace_config(trace_config())
            .transfer_mode(StartTransferMode::ReportEvents)
            .build();
        browser
            .execute(params)
            .await
            .map_err(cdp_err("Failed to start tracing"))?;
        drop(browser);

        *self.trace.lock().await = Some(TraceStreams { data, complete });
        tracing::debug!("Tracing started");
        Ok(())
    }

    async fn stop_tracing(&self, archive: &Path) -> Result<()> {
        let Some(mut streams) = self.trace.lock().await.take() else {
            return Ok(());
        };

        lock_browser(&self.browser)
            .await?
            .execute(EndParams::default())
            .await
            .map_err(cdp_err("Failed to stop tracing"))?;

        let mut events = Vec::new();
        let collect = async {
            loop {
                tokio::select! {
                    Some(chunk) = streams.data.next() => events.extend(chunk.value.iter().cloned()),
                    _ = streams.complete.next() => break,
                }
            }
            // Chunks may still be queued behind the completion event.
            while let Some(Some(chunk)) = streams.data.next().now_or_never() {
                events.extend(chunk.value.iter().cloned());
            }
        };
        if tokio::time::timeout(TRACE_FLUSH_TIMEOUT, collect).await.is_err() {
            tracing::warn!("Trace flush timed out, writing partial trace");
        }

        let path = archive.to_path_buf();
        let count = events.len();
        tokio::task::spawn_blocking(move || write_trace_archive(&path, &events))
            .await
            .map_err(|e| HarnessError::browser(format!("Trace writer panicked: {}", e)))??;

        tracing::info!(events = count, path = %archive.display(), "Trace archive written");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let browser = lock_browser(&self.browser).await?;
        // A trace that was never stopped is discarded.
        if self.trace.lock().await.take().is_some() {
            let _ = browser.execute(EndParams::default()).await;
        }
        browser
            .execute(DisposeBrowserContextParams::new(self.context_id.clone()))
            .await
            .map(|_| ())
            .map_err(cdp_err("Failed to dispose browser context"))
    }
}

/// Only the listed categories are recorded; everything else is excluded.
fn trace_config() -> TraceConfig {
    TraceConfig {
        included_categories: Some(TRACE_CATEGORIES.iter().map(|c| c.to_string()).collect()),
        ..Default::default()
    }
}

/// Write `trace.json` (trace-event format) and `metadata.json` into a zip
/// archive.
fn write_trace_archive(path: &Path, events: &[serde_json::Value]) -> Result<()> {
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    let trace = serde_json::to_vec(&serde_json::json!({ "traceEvents": events }))?;
    let metadata = serde_json::to_vec_pretty(&serde_json::json!({
        "format": "chrome-trace-event",
        "events": events.len(),
        "createdAt": chrono::Utc::now().to_rfc3339(),
    }))?;

    let file = std::fs::File::create(path).map_err(|e| HarnessError::io(path, e))?;
    let mut zip = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .unix_permissions(0o644);

    for (name, bytes) in [("trace.json", &trace), ("metadata.json", &metadata)] {
        zip.start_file(name, options)
            .map_err(|e| HarnessError::io(path, e.into()))?;
        zip.write_all(bytes).map_err(|e| HarnessError::io(path, e))?;
    }

    zip.finish().map_err(|e| HarnessError::io(path, e.into()))?;
    Ok(())
}

struct Screencast {
    task: JoinHandle<()>,
}

/// Record the page as a JPEG frame sequence in `dir`.
async fn start_screencast(
    page: &ChromePage,
    dir: &Path,
    index: usize,
    (width, height): (u32, u32),
) -> Result<Screencast> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| HarnessError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })?;

    let mut frames = page
        .event_listener::<EventScreencastFrame>()
        .await
        .map_err(cdp_err("Failed to listen for screencast frames"))?;

    page.execute(
        StartScreencastParams::builder()
            .format(StartScreencastFormat::Jpeg)
            .quality(80)
            .max_width(width as i64)
            .max_height(height as i64)
            .build(),
    )
    .await
    .map_err(cdp_err("Failed to start screencast"))?;

    let page = page.clone();
    let dir = dir.to_path_buf();
    let task = tokio::spawn(async move {
        let mut seq: u64 = 0;
        while let Some(frame) = frames.next().await {
            let _ = page
                .execute(ScreencastFrameAckParams::new(frame.session_id))
                .await;
            let data: &str = frame.data.as_ref();
            let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(data) else {
                continue;
            };
            seq += 1;
            let path = dir.join(format!("page-{}-{:05}.jpg", index, seq));
            if let Err(e) = tokio::fs::write(&path, bytes).await {
                tracing::warn!(error = %e, path = %path.display(), "Failed to write video frame");
            }
        }
    });

    Ok(Screencast { task })
}

pub struct CdpPage {
    page: ChromePage,
    screencast: std::sync::Mutex<Option<Screencast>>,
}

impl CdpPage {
    async fn element(&self, selector: &str) -> Result<chromiumoxide::Element> {
        self.page
            .find_element(selector)
            .await
            .map_err(|e| HarnessError::Browser(format!("Element not found '{}': {}", selector, e)))
    }

    async fn dispatch_key(&self, stroke: &KeyStroke, kind: DispatchKeyEventType) -> Result<()> {
        let mut params = DispatchKeyEventParams::new(kind.clone());
        params.key = Some(stroke.key.clone());
        if !stroke.code.is_empty() {
            params.code = Some(stroke.code.clone());
        }
        if stroke.key_code != 0 {
            params.windows_virtual_key_code = Some(stroke.key_code);
        }
        if stroke.modifiers != 0 {
            params.modifiers = Some(stroke.modifiers);
        }
        if kind == DispatchKeyEventType::KeyDown {
            params.text = stroke.text.clone();
        }
        self.page
            .execute(params)
            .await
            .map(|_| ())
            .map_err(cdp_err("Key dispatch failed"))
    }
}

#[async_trait]
impl Page for CdpPage {
    async fn events(&self) -> Result<BoxStream<'static, PageEvent>> {
        let console = self
            .page
            .event_listener::<EventConsoleApiCalled>()
            .await
            .map_err(cdp_err("Failed to listen for console"))?;
        let exceptions = self
            .page
            .event_listener::<EventExceptionThrown>()
            .await
            .map_err(cdp_err("Failed to listen for page errors"))?;
        let dialogs = self
            .page
            .event_listener::<EventJavascriptDialogOpening>()
            .await
            .map_err(cdp_err("Failed to listen for dialogs"))?;
        let requests = self
            .page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .map_err(cdp_err("Failed to listen for requests"))?;
        let responses = self
            .page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(cdp_err("Failed to listen for responses"))?;
        let finished = self
            .page
            .event_listener::<EventLoadingFinished>()
            .await
            .map_err(cdp_err("Failed to listen for finished requests"))?;
        let failed = self
            .page
            .event_listener::<EventLoadingFailed>()
            .await
            .map_err(cdp_err("Failed to listen for failed requests"))?;

        let page = self.page.clone();
        let console = console
            .map(move |ev| {
                let page = page.clone();
                async move { PageEvent::Console(console_event(&page, &ev).await) }.boxed()
            })
            .boxed();
        let exceptions = exceptions
            .map(|ev| ready_event(page_error(&ev)))
            .boxed();
        let dialogs = dialogs
            .map(|ev| {
                ready_event(PageEvent::Dialog {
                    kind: format!("{:?}", ev.r#type).to_lowercase(),
                    message: ev.message.clone(),
                })
            })
            .boxed();
        let requests = requests
            .flat_map(|ev| stream::iter(request_events(&ev).into_iter().map(ready_event)))
            .boxed();
        let responses = responses
            .map(|ev| {
                ready_event(PageEvent::Response(response_event(
                    ev.request_id.inner(),
                    &ev.response,
                    *ev.timestamp.inner(),
                )))
            })
            .boxed();
        let finished = finished
            .map(|ev| {
                ready_event(PageEvent::RequestFinished {
                    request_id: ev.request_id.inner().clone(),
                    timestamp: *ev.timestamp.inner(),
                })
            })
            .boxed();
        let failed = failed
            .map(|ev| {
                ready_event(PageEvent::RequestFailed {
                    request_id: ev.request_id.inner().clone(),
                    error_text: ev.error_text.clone(),
                })
            })
            .boxed();

        Ok(merge_page_events(vec![
            console, exceptions, dialogs, requests, responses, finished, failed,
        ]))
    }

    async fn goto(
        &self,
        url: &str,
        wait_until: WaitUntil,
        timeout: Duration,
    ) -> Result<Option<NavigationResponse>> {
        let mut responses = self
            .page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(cdp_err("Failed to listen for responses"))?;
        let mut lifecycle = self
            .page
            .event_listener::<EventLifecycleEvent>()
            .await
            .map_err(cdp_err("Failed to listen for lifecycle events"))?;

        let navigate = async {
            let nav = self
                .page
                .execute(NavigateParams::new(url))
                .await
                .map_err(|e| HarnessError::Navigation {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?;
            if let Some(reason) = nav.result.error_text.clone() {
                return Err(HarnessError::Navigation {
                    url: url.to_string(),
                    reason,
                });
            }
            let loader_id = nav.result.loader_id.clone();
            if wait_until == WaitUntil::NetworkIdle {
                if let Some(loader) = &loader_id {
                    while let Some(ev) = lifecycle.next().await {
                        if ev.name == "networkIdle" && &ev.loader_id == loader {
                            break;
                        }
                    }
                }
            }
            Ok(loader_id)
        };

        let loader_id = tokio::time::timeout(timeout, navigate)
            .await
            .map_err(|_| HarnessError::Timeout {
                action: format!("Navigation to {}", url),
                ms: timeout.as_millis() as u64,
            })??;

        // Same-document navigations have no loader and no response.
        let Some(loader_id) = loader_id else {
            return Ok(None);
        };

        let mut document = None;
        while let Some(Some(ev)) = responses.next().now_or_never() {
            if ev.r#type == ResourceType::Document && ev.loader_id == loader_id {
                document = Some(NavigationResponse {
                    url: ev.response.url.clone(),
                    status: ev.response.status.clamp(0, u16::MAX as i64) as u16,
                    status_text: ev.response.status_text.clone(),
                });
            }
        }
        Ok(document)
    }

    async fn url(&self) -> Result<Option<String>> {
        self.page.url().await.map_err(cdp_err("Failed to get URL"))
    }

    async fn content(&self) -> Result<String> {
        self.page
            .content()
            .await
            .map_err(cdp_err("Failed to get DOM"))
    }

    async fn screenshot(&self, full_page: bool) -> Result<Vec<u8>> {
        let params = CaptureScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .capture_beyond_viewport(full_page)
            .build();
        self.page
            .screenshot(params)
            .await
            .map_err(cdp_err("Screenshot failed"))
    }

    async fn evaluate(&self, expression: &str) -> Result<serde_json::Value> {
        let params = EvaluateParams::builder()
            .expression(expression)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(HarnessError::Browser)?;
        let result = self
            .page
            .evaluate_expression(params)
            .await
            .map_err(cdp_err("Script evaluation failed"))?;
        // `undefined` and other non-JSON results read as null.
        Ok(result
            .into_value::<serde_json::Value>()
            .unwrap_or(serde_json::Value::Null))
    }

    async fn accept_dialog(&self) -> Result<()> {
        self.page
            .execute(HandleJavaScriptDialogParams::new(true))
            .await
            .map(|_| ())
            .map_err(cdp_err("Failed to accept dialog"))
    }

    async fn response_body(&self, request_id: &str) -> Result<ResponseBody> {
        let resp = self
            .page
            .execute(GetResponseBodyParams::new(network::RequestId::new(
                request_id.to_string(),
            )))
            .await
            .map_err(cdp_err("Failed to read response body"))?;
        Ok(ResponseBody {
            body: resp.result.body.clone(),
            base64_encoded: resp.result.base64_encoded,
        })
    }

    async fn click(&self, selector: &str) -> Result<()> {
        self.element(selector)
            .await?
            .click()
            .await
            .map(|_| ())
            .map_err(|e| HarnessError::Browser(format!("Click failed on '{}': {}", selector, e)))
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<()> {
        let element = self.element(selector).await?;
        element
            .click()
            .await
            .map_err(|e| HarnessError::Browser(format!("Failed to focus '{}': {}", selector, e)))?;
        // Clear the current value so fill replaces rather than appends.
        element
            .call_js_fn("function() { if ('value' in this) this.value = ''; }", false)
            .await
            .map_err(|e| HarnessError::Browser(format!("Failed to clear '{}': {}", selector, e)))?;
        element
            .type_str(value)
            .await
            .map(|_| ())
            .map_err(|e| HarnessError::Browser(format!("Failed to type into '{}': {}", selector, e)))
    }

    async fn hover(&self, selector: &str) -> Result<()> {
        let element = self.element(selector).await?;
        element.scroll_into_view().await.map_err(|e| {
            HarnessError::Browser(format!("Failed to scroll '{}' into view: {}", selector, e))
        })?;
        element
            .hover()
            .await
            .map(|_| ())
            .map_err(|e| HarnessError::Browser(format!("Hover failed on '{}': {}", selector, e)))
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        let stroke = KeyStroke::parse(key);
        self.dispatch_key(&stroke, DispatchKeyEventType::KeyDown)
            .await?;
        self.dispatch_key(&stroke, DispatchKeyEventType::KeyUp).await
    }

    async fn inner_text(&self, selector: &str) -> Result<Option<String>> {
        self.element(selector)
            .await?
            .inner_text()
            .await
            .map_err(|e| {
                HarnessError::Browser(format!("Failed to get text from '{}': {}", selector, e))
            })
    }

    async fn exists(&self, selector: &str) -> Result<bool> {
        Ok(self.page.find_element(selector).await.is_ok())
    }

    async fn close(&self) -> Result<()> {
        let screencast = self
            .screencast
            .lock()
            .map_err(|_| HarnessError::browser("Screencast lock poisoned"))?
            .take();
        if let Some(screencast) = screencast {
            let _ = self.page.execute(StopScreencastParams::default()).await;
            screencast.task.abort();
        }
        self.page
            .clone()
            .close()
            .await
            .map_err(cdp_err("Failed to close page"))
    }
}

fn console_level(kind: &ConsoleApiCalledType) -> ConsoleLevel {
    match kind {
        ConsoleApiCalledType::Warning => ConsoleLevel::Warn,
        ConsoleApiCalledType::Error | ConsoleApiCalledType::Assert => ConsoleLevel::Error,
        ConsoleApiCalledType::Info => ConsoleLevel::Info,
        ConsoleApiCalledType::Debug => ConsoleLevel::Debug,
        _ => ConsoleLevel::Log,
    }
}

async fn console_event(page: &ChromePage, ev: &EventConsoleApiCalled) -> ConsoleEvent {
    let mut args = Vec::with_capacity(ev.args.len());
    for obj in &ev.args {
        args.push(resolve_arg(page, obj).await);
    }
    let location = ev
        .stack_trace
        .as_ref()
        .and_then(|st| st.call_frames.first())
        .map(|frame| format!("{}:{}:{}", frame.url, frame.line_number, frame.column_number));
    ConsoleEvent {
        level: console_level(&ev.r#type),
        args,
        location,
        stack: ev.stack_trace.as_ref().map(format_stack),
    }
}

/// Resolve a console argument to JSON the way `JSHandle.jsonValue()` would.
async fn resolve_arg(page: &ChromePage, obj: &RemoteObject) -> ConsoleArg {
    let unserializable = obj
        .unserializable_value
        .as_ref()
        .map(|u| u.inner().clone());

    let value = match (&obj.value, &obj.object_id) {
        (Some(value), _) => Some(value.clone()),
        (None, Some(object_id)) => {
            let params = CallFunctionOnParams::builder()
                .function_declaration("function() { return this; }")
                .object_id(object_id.clone())
                .return_by_value(true)
                .build();
            match params {
                Ok(params) => match page.execute(params).await {
                    Ok(resp) if resp.result.exception_details.is_none() => {
                        resp.result.result.value.clone()
                    }
                    _ => None,
                },
                Err(_) => None,
            }
        }
        (None, None) => unserializable.clone().map(serde_json::Value::String),
    };

    let text = match &value {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => obj
            .description
            .clone()
            .or(unserializable)
            .unwrap_or_else(|| "undefined".to_string()),
    };

    ConsoleArg { text, value }
}

fn page_error(ev: &EventExceptionThrown) -> PageEvent {
    let details = &ev.exception_details;
    let description = details
        .exception
        .as_ref()
        .and_then(|e| e.description.clone());
    let message = description
        .as_deref()
        .and_then(|d| d.lines().next())
        .map(str::to_string)
        .unwrap_or_else(|| details.text.clone());
    let stack = description.or_else(|| details.stack_trace.as_ref().map(format_stack));
    PageEvent::PageError {
        message,
        url: details.url.clone(),
        stack,
    }
}

fn format_stack(stack: &StackTrace) -> String {
    stack
        .call_frames
        .iter()
        .map(|frame| {
            let name = if frame.function_name.is_empty() {
                "<anonymous>"
            } else {
                frame.function_name.as_str()
            };
            format!(
                "    at {} ({}:{}:{})",
                name, frame.url, frame.line_number, frame.column_number
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Flatten a CDP header object into string pairs.
fn headers_from<T: serde::Serialize>(headers: &T) -> Headers {
    match serde_json::to_value(headers) {
        Ok(serde_json::Value::Object(map)) => map
            .into_iter()
            .map(|(k, v)| {
                let value = match v {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (k, value)
            })
            .collect(),
        _ => Headers::new(),
    }
}

/// Post data through serde so deprecated/renamed CDP fields don't matter.
fn post_data<T: serde::Serialize>(request: &T) -> Option<String> {
    let value = serde_json::to_value(request).ok()?;
    if let Some(text) = value.get("postData").and_then(|v| v.as_str()) {
        return Some(text.to_string());
    }
    let entries = value.get("postDataEntries")?.as_array()?;
    let mut bytes = Vec::new();
    for entry in entries {
        if let Some(chunk) = entry.get("bytes").and_then(|b| b.as_str()) {
            bytes.extend(
                base64::engine::general_purpose::STANDARD
                    .decode(chunk)
                    .ok()?,
            );
        }
    }
    String::from_utf8(bytes).ok()
}

/// A redirect reuses the request id: close out the previous hop with its
/// redirect response, then start the new hop.
fn request_events(ev: &EventRequestWillBeSent) -> Vec<PageEvent> {
    let request_id = ev.request_id.inner().clone();
    let mut out = Vec::with_capacity(2);
    if let Some(redirect) = &ev.redirect_response {
        out.push(PageEvent::Response(response_event(
            &request_id,
            redirect,
            *ev.timestamp.inner(),
        )));
    }
    out.push(PageEvent::Request(RequestEvent {
        request_id,
        url: ev.request.url.clone(),
        method: ev.request.method.clone(),
        headers: headers_from(&ev.request.headers),
        post_data: post_data(&ev.request),
    }));
    out
}

fn response_event(request_id: &str, response: &Response, timestamp: f64) -> ResponseEvent {
    ResponseEvent {
        request_id: request_id.to_string(),
        url: response.url.clone(),
        status: response.status.clamp(0, u16::MAX as i64) as u16,
        status_text: response.status_text.clone(),
        headers: headers_from(&response.headers),
        mime_type: response.mime_type.clone(),
        timing: response.timing.as_ref().map(phase_timing).unwrap_or_default(),
        timestamp,
    }
}

fn phase(start: f64, end: f64) -> f64 {
    if start >= 0.0 && end >= start {
        end - start
    } else {
        0.0
    }
}

fn phase_timing(t: &network::ResourceTiming) -> ResponseTiming {
    ResponseTiming {
        dns: phase(t.dns_start, t.dns_end),
        connect: phase(t.connect_start, t.connect_end),
        ssl: phase(t.ssl_start, t.ssl_end),
        send: phase(t.send_start, t.send_end),
        wait: phase(t.send_end, t.receive_headers_end),
        // Filled in by capture once loading finishes.
        receive: 0.0,
    }
}
