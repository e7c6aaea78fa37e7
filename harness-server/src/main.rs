//! Browser test-run harness binary.
//!
//! Provides two subcommands:
//! - `serve` (default): Start the MCP server over Streamable HTTP
//! - `run`: Execute one test run and print its JSON result

use clap::{Parser, Subcommand};
use mcp_harness_core::driver::BrowserKind;
use mcp_harness_core::{Harness, HarnessConfig, RunOptions, RunStatus};
use pmcp::server::streamable_http_server::{StreamableHttpServer, StreamableHttpServerConfig};
use pmcp::Server;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "harness-server", about = "Browser Test-Run Harness")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the MCP server (default when no subcommand given)
    Serve(ServeArgs),

    /// Run tests once and print the result as JSON
    Run(RunArgs),
}

/// Options shared by both subcommands.
#[derive(Debug, Clone, clap::Args)]
struct HarnessArgs {
    /// Base directory for run artifacts (default: $HARNESS_ARTIFACTS_DIR or the OS data dir)
    #[clap(long)]
    artifacts_dir: Option<PathBuf>,

    /// Custom Chrome/Edge/Chromium binary path
    #[clap(long)]
    browser_path: Option<PathBuf>,
}

impl HarnessArgs {
    fn config(&self) -> HarnessConfig {
        let config = HarnessConfig::from_env().with_browser_path(self.browser_path.clone());
        match &self.artifacts_dir {
            Some(dir) => config.with_artifacts_dir(dir),
            None => config,
        }
    }
}

#[derive(Parser)]
struct ServeArgs {
    /// Host to bind to
    #[clap(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to bind to
    #[clap(long, default_value = "3200")]
    port: u16,

    #[clap(flatten)]
    harness: HarnessArgs,
}

#[derive(Parser)]
struct RunArgs {
    /// URL of the page under test
    #[clap(long)]
    url: String,

    /// Browser engine: chromium, chrome or msedge
    #[clap(long, default_value = "chromium")]
    browser: BrowserKind,

    /// Run browser in headless mode
    #[clap(long, default_value = "true", action = clap::ArgAction::Set)]
    headless: bool,

    /// Disable screencast recording
    #[clap(long)]
    no_video: bool,

    /// Disable trace recording
    #[clap(long)]
    no_trace: bool,

    /// Export network traffic as HAR
    #[clap(long)]
    har: bool,

    /// JSON test file to execute (repeatable)
    #[clap(long = "test-file")]
    test_files: Vec<PathBuf>,

    /// Navigation timeout in milliseconds
    #[clap(long, default_value = "30000")]
    navigation_timeout_ms: u64,

    #[clap(flatten)]
    harness: HarnessArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Run(args)) => run_once(args).await,
        Some(Command::Serve(args)) => run_serve(args).await,
        None => run_serve(ServeArgs::parse_from(["harness-server"])).await,
    }
}

async fn run_serve(args: ServeArgs) -> anyhow::Result<()> {
    init_logging();

    let config = args.harness.config();
    tracing::info!(artifacts_dir = %config.artifacts_dir.display(), "Using artifacts directory");
    let server = mcp_harness_core::build_server(config)?;

    tokio::select! {
        result = run_http(server, &args.host, args.port) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Ctrl+C received, shutting down");
            Ok(())
        }
    }
}

/// Serve `server` over Streamable HTTP on `host:port`.
async fn run_http(server: Server, host: &str, port: u16) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;

    tracing::info!(host = %host, port, "Starting MCP HTTP server");

    let server = Arc::new(Mutex::new(server));

    let config = StreamableHttpServerConfig {
        session_id_generator: None,
        enable_json_response: true,
        event_store: None,
        on_session_initialized: None,
        on_session_closed: None,
        http_middleware: None,
    };

    let http_server = StreamableHttpServer::with_config(addr, server, config);
    let (_bound_addr, server_handle) = http_server.start().await?;

    tracing::info!("MCP server listening on http://{}:{}/mcp", host, port);

    server_handle.await?;

    Ok(())
}

async fn run_once(args: RunArgs) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let harness = Harness::new(args.harness.config());

    let mut options = RunOptions::new(args.url);
    options.browser = args.browser;
    options.headless = args.headless;
    options.video = !args.no_video;
    options.trace = !args.no_trace;
    options.har = args.har;
    options.test_files = args.test_files;
    options.navigation_timeout_ms = args.navigation_timeout_ms;

    let result = harness.run(options).await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if result.status != RunStatus::Passed {
        anyhow::bail!("Test run {} finished with status {}", result.run_id, result.status.as_str());
    }
    Ok(())
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
