//! Where live browser diagnostics are mirrored while a run is in progress.

use crate::model::{ConsoleLevel, ConsoleLog};
use std::sync::Mutex;

/// Receives every console entry as it is captured.
pub trait DiagnosticSink: Send + Sync {
    fn emit(&self, log: &ConsoleLog);
}

/// Re-emits browser output as `tracing` events under `browser_console`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn emit(&self, log: &ConsoleLog) {
        let location = log.location.as_deref().unwrap_or("");
        match log.level {
            ConsoleLevel::Error => {
                tracing::error!(target: "browser_console", location, "{}", log.message)
            }
            ConsoleLevel::Warn => {
                tracing::warn!(target: "browser_console", location, "{}", log.message)
            }
            ConsoleLevel::Debug => {
                tracing::debug!(target: "browser_console", location, "{}", log.message)
            }
            ConsoleLevel::Log | ConsoleLevel::Info => {
                tracing::info!(target: "browser_console", location, "{}", log.message)
            }
        }
    }
}

/// Keeps `(level, message)` pairs in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<(ConsoleLevel, String)>>,
}

impl MemorySink {
    pub fn entries(&self) -> Vec<(ConsoleLevel, String)> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}

impl DiagnosticSink for MemorySink {
    fn emit(&self, log: &ConsoleLog) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push((log.level, log.message.clone()));
        }
    }
}
