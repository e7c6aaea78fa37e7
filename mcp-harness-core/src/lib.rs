//! Browser test-run harness core library.
//!
//! A run launches a browser over the Chrome DevTools Protocol, executes a
//! basic page-load test or JSON test files, and captures console output,
//! network traffic, screenshots, a trace, a screencast and Web-Vitals style
//! metrics into a per-run artifact directory.
//!
//! [`build_server`] exposes the harness as MCP tools.

pub mod capture;
pub mod config;
pub mod driver;
pub mod error;
pub mod har;
pub mod harness;
pub mod model;
pub mod performance;
pub mod redact;
pub mod report;
pub mod runner;
pub mod testfile;
pub mod tools;

pub use config::HarnessConfig;
pub use error::{HarnessError, Result};
pub use harness::Harness;
pub use model::{RunStatus, TestRunResult, TestStatus};
pub use runner::{RunOptions, TestRunner};

use pmcp::types::{ServerCapabilities, ToolCapabilities};
use pmcp::Server;
use std::sync::Arc;

/// Build a fully-configured MCP server exposing the harness tools.
pub fn build_server(config: HarnessConfig) -> pmcp::Result<Server> {
    let harness = Arc::new(Harness::new(config));

    let builder = Server::builder()
        .name("harness")
        .version(env!("CARGO_PKG_VERSION"))
        .capabilities(ServerCapabilities {
            tools: Some(ToolCapabilities {
                list_changed: Some(true),
            }),
            ..Default::default()
        });

    tools::register_tools(builder, harness).build()
}
