mod config;
mod error;
mod http;
mod sandbox;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::sandbox::Sandbox;

fn print_help() {
    println!(
        "\
code-sandbox v{}

Runs untrusted code snippets in a constrained child process.

USAGE:
    code-sandbox [OPTIONS] [CONFIG_PATH]

ARGUMENTS:
    CONFIG_PATH    Path to TOML configuration file [default: config/sandbox.toml]

OPTIONS:
    -h, --help       Print this help message and exit
    -V, --version    Print version and exit

ENVIRONMENT VARIABLES:
    Variables are referenced in the config file via ${{VAR_NAME}} syntax.

    RUST_LOG    Log level filter for tracing
                (e.g. debug, code_sandbox=debug,tower_http=warn)

ENDPOINTS:
    POST /api/execute-code    {{ \"code\": string, \"language\": \"python\" }}
    GET  /health

EXAMPLES:
    code-sandbox                               # uses config/sandbox.toml
    code-sandbox /etc/code-sandbox/sandbox.toml
    RUST_LOG=debug code-sandbox                # with debug logging",
        env!("CARGO_PKG_VERSION"),
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    // Handle --help / --version before anything else
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("code-sandbox v{}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {}
        }
    }

    // Initialize logging (RUST_LOG=debug for debug mode)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("code_sandbox=info,tower_http=info")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/sandbox.toml".to_string());

    info!("Loading configuration from {config_path}");
    let config = Config::load(&config_path)
        .with_context(|| format!("cannot load configuration from {config_path}"))?;

    info!(
        "Interpreter: {} {}",
        config.sandbox.interpreter,
        config.sandbox.interpreter_args.join(" ")
    );
    info!(
        "Limits: code {} bytes, timeout {}ms, output {} bytes, retention {}s",
        config.sandbox.max_code_bytes,
        config.sandbox.timeout_ms,
        config.sandbox.max_output_bytes,
        config.sandbox.artifact_retention_secs
    );
    warn!("The deny-pattern gate is a best-effort filter, not a security boundary");

    let sandbox = Arc::new(Sandbox::start(&config).await?);
    let app = http::router(sandbox.clone());

    let addr = config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;
    info!("Listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Cannot listen for shutdown signal: {e}");
                std::future::pending::<()>().await;
            }
            info!("Shutdown signal received");
        })
        .await
        .context("server error")?;

    // Stop the reaper and let in-flight executions finish their cleanup
    sandbox.shutdown().await;
    Ok(())
}
