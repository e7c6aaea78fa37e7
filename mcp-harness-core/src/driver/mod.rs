//! Browser automation backend seam.
//!
//! The orchestrator and capture code only talk to these traits. [`cdp`] is the
//! Chrome DevTools Protocol implementation; tests plug in a scripted driver.

pub mod cdp;
pub mod events;
pub mod keys;

use crate::error::{HarnessError, Result};
use crate::model::{ConsoleLevel, Headers, ResponseTiming};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Which browser binary to launch. All of them speak CDP.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserKind {
    #[default]
    Chromium,
    Chrome,
    Msedge,
}

impl BrowserKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chromium => "chromium",
            Self::Chrome => "chrome",
            Self::Msedge => "msedge",
        }
    }
}

impl std::str::FromStr for BrowserKind {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "chromium" => Ok(Self::Chromium),
            "chrome" | "google-chrome" => Ok(Self::Chrome),
            "msedge" | "edge" => Ok(Self::Msedge),
            other => Err(HarnessError::UnsupportedBrowser(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub browser: BrowserKind,
    pub headless: bool,
    /// Explicit executable; overrides the lookup for `browser`.
    pub executable: Option<PathBuf>,
    pub viewport: (u32, u32),
    pub ignore_https_errors: bool,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            browser: BrowserKind::default(),
            headless: true,
            executable: None,
            viewport: (1280, 720),
            ignore_https_errors: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContextOptions {
    /// Record the page into this directory when set.
    pub record_video_dir: Option<PathBuf>,
    pub viewport: (u32, u32),
}

/// Page load milestone a navigation waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitUntil {
    Load,
    NetworkIdle,
}

/// Main-document response of a navigation.
#[derive(Debug, Clone, PartialEq)]
pub struct NavigationResponse {
    pub url: String,
    pub status: u16,
    pub status_text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResponseBody {
    pub body: String,
    pub base64_encoded: bool,
}

/// One console argument as resolved by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsoleArg {
    /// Text form used to build the message.
    pub text: String,
    /// JSON value, `None` when the argument could not be serialised.
    pub value: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConsoleEvent {
    pub level: ConsoleLevel,
    pub args: Vec<ConsoleArg>,
    pub location: Option<String>,
    pub stack: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestEvent {
    pub request_id: String,
    pub url: String,
    pub method: String,
    pub headers: Headers,
    pub post_data: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEvent {
    pub request_id: String,
    pub url: String,
    pub status: u16,
    pub status_text: String,
    pub headers: Headers,
    pub mime_type: String,
    pub timing: ResponseTiming,
    /// Backend monotonic clock, seconds.
    pub timestamp: f64,
}

/// Backend-neutral page events, in delivery order.
#[derive(Debug, Clone, PartialEq)]
pub enum PageEvent {
    Console(ConsoleEvent),
    PageError {
        message: String,
        url: Option<String>,
        stack: Option<String>,
    },
    Dialog {
        kind: String,
        message: String,
    },
    Request(RequestEvent),
    Response(ResponseEvent),
    RequestFinished {
        request_id: String,
        timestamp: f64,
    },
    RequestFailed {
        request_id: String,
        error_text: String,
    },
}

#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn launch(&self, options: &LaunchOptions) -> Result<Box<dyn Browser>>;
}

#[async_trait]
pub trait Browser: Send + Sync {
    async fn new_context(&self, options: &ContextOptions) -> Result<Box<dyn BrowserContext>>;
    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait BrowserContext: Send + Sync {
    async fn new_page(&self) -> Result<Arc<dyn Page>>;
    /// Start recording a trace with screenshots, snapshots and sources.
    async fn start_tracing(&self) -> Result<()>;
    /// Stop tracing and write the archive to `archive`.
    async fn stop_tracing(&self, archive: &Path) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait Page: Send + Sync {
    /// Subscribe to page events. Only the first call is guaranteed to see
    /// every event.
    async fn events(&self) -> Result<BoxStream<'static, PageEvent>>;

    /// Navigate and return the main-document response, if any.
    async fn goto(
        &self,
        url: &str,
        wait_until: WaitUntil,
        timeout: Duration,
    ) -> Result<Option<NavigationResponse>>;

    async fn url(&self) -> Result<Option<String>>;
    /// Serialised live DOM.
    async fn content(&self) -> Result<String>;
    async fn screenshot(&self, full_page: bool) -> Result<Vec<u8>>;
    /// Evaluate an expression, awaiting promises, and return its JSON value.
    async fn evaluate(&self, expression: &str) -> Result<serde_json::Value>;
    async fn accept_dialog(&self) -> Result<()>;
    async fn response_body(&self, request_id: &str) -> Result<ResponseBody>;

    async fn click(&self, selector: &str) -> Result<()>;
    async fn fill(&self, selector: &str, value: &str) -> Result<()>;
    async fn hover(&self, selector: &str) -> Result<()>;
    async fn press_key(&self, key: &str) -> Result<()>;
    async fn inner_text(&self, selector: &str) -> Result<Option<String>>;
    async fn exists(&self, selector: &str) -> Result<bool>;

    /// Poll for `selector` until it exists or `timeout` elapses.
    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<()> {
        let start = Instant::now();
        loop {
            if self.exists(selector).await.unwrap_or(false) {
                return Ok(());
            }
            if start.elapsed() >= timeout {
                return Err(HarnessError::Timeout {
                    action: format!("Waiting for '{}'", selector),
                    ms: timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    async fn close(&self) -> Result<()>;
}
