//! HTTP server binary for kwkhtmltopdf.
//!
//! A thin shim over the library crate that maps CLI flags and environment
//! variables to `ServerConfig` and serves until Ctrl-C.

use anyhow::{Context, Result};
use clap::Parser;
use kwkhtmltopdf::{serve, OutputSink, ServerConfig};
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"EXAMPLES:
  # Stream-through on the default port
  kwkhtmltopdf-server

  # Pinned renderer, file-relay, 2 minute deadline per render
  kwkhtmltopdf-server --renderer /opt/wkhtmltox/bin/wkhtmltopdf \
      --output-mode file --render-timeout 120

  # wkhtmltoimage behind the same protocol
  kwkhtmltopdf-server --renderer wkhtmltoimage --content-type image/png

PROTOCOL:
  POST / or /pdf with multipart/form-data:
    option   one renderer argument, in order
    file     one input file; its basename replaces it on the command line
"#;

/// Serve wkhtmltopdf over HTTP.
#[derive(Parser, Debug)]
#[command(
    name = "kwkhtmltopdf-server",
    version,
    about = "Serve wkhtmltopdf over HTTP",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Listen address.
    #[arg(long, env = "KWKHTMLTOPDF_BIND", default_value = "0.0.0.0:8080")]
    bind: SocketAddr,

    /// Renderer executable (bare names are looked up in PATH).
    #[arg(long, env = "KWKHTMLTOPDF_BIN", default_value = "wkhtmltopdf")]
    renderer: PathBuf,

    /// Where the renderer writes the document: stream (stdout) or file.
    #[arg(long, env = "KWKHTMLTOPDF_OUTPUT_MODE", value_enum, default_value = "stream")]
    output_mode: OutputModeArg,

    /// Content type of rendered documents.
    #[arg(long, env = "KWKHTMLTOPDF_CONTENT_TYPE", default_value = "application/pdf")]
    content_type: String,

    /// Output file extension in file mode.
    #[arg(long, env = "KWKHTMLTOPDF_OUTPUT_SUFFIX", default_value = ".pdf")]
    output_suffix: String,

    /// Parent directory of per-request workspaces.
    #[arg(long, env = "KWKHTMLTOPDF_TMPDIR")]
    workspace_root: Option<PathBuf>,

    /// Reject request bodies larger than this many bytes.
    #[arg(long, env = "KWKHTMLTOPDF_MAX_UPLOAD_BYTES")]
    max_upload_bytes: Option<usize>,

    /// Kill a render that runs longer than this many seconds.
    #[arg(long, env = "KWKHTMLTOPDF_RENDER_TIMEOUT",
          value_parser = clap::value_parser!(u64).range(1..))]
    render_timeout: Option<u64>,

    /// Log raw client addresses instead of reverse-resolved names.
    #[arg(long, env = "KWKHTMLTOPDF_NO_REVERSE_DNS")]
    no_reverse_dns: bool,

    /// Log argument vectors and enable DEBUG-level tracing.
    #[arg(short, long, env = "KWKHTMLTOPDF_VERBOSE")]
    verbose: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum OutputModeArg {
    Stream,
    File,
}

impl From<OutputModeArg> for OutputSink {
    fn from(v: OutputModeArg) -> Self {
        match v {
            OutputModeArg::Stream => OutputSink::Stdout,
            OutputModeArg::File => OutputSink::WorkspaceFile,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let config = build_config(&cli)?;
    info!(
        "Configuration: {}",
        serde_json::to_string(&config).context("Failed to serialise configuration")?
    );

    let listener = tokio::net::TcpListener::bind(cli.bind)
        .await
        .with_context(|| format!("Failed to bind {}", cli.bind))?;

    serve(listener, config, shutdown_signal())
        .await
        .context("Server failed")?;

    info!("Shut down");
    Ok(())
}

/// Map CLI args to `ServerConfig`.
fn build_config(cli: &Cli) -> Result<ServerConfig> {
    let mut builder = ServerConfig::builder()
        .renderer_bin(&cli.renderer)
        .output_sink(cli.output_mode.into())
        .content_type(&cli.content_type)
        .output_suffix(&cli.output_suffix)
        .resolve_client_names(!cli.no_reverse_dns)
        .verbose(cli.verbose);

    if let Some(ref root) = cli.workspace_root {
        builder = builder.workspace_root(root);
    }
    if let Some(limit) = cli.max_upload_bytes {
        builder = builder.max_upload_bytes(limit);
    }
    if let Some(secs) = cli.render_timeout {
        builder = builder.render_timeout(Duration::from_secs(secs));
    }

    builder.build().context("Invalid configuration")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Ctrl-C received, draining connections");
}
