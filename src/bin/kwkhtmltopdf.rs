//! Drop-in `wkhtmltopdf` replacement that renders on a kwkhtmltopdf server.
//!
//! Every argument is passed through verbatim; the server URL comes from
//! `KWKHTMLTOPDF_SERVER_URL` (or `--kwk-server-url`, which must come first).
//! A truncated transfer exits non-zero and leaves no output file behind.

use anyhow::{Context, Result};
use clap::Parser;
use kwkhtmltopdf::client::{self, MOCK_SERVER_URL, MOCK_VERSION};
use kwkhtmltopdf::{plan_invocation, Destination};
use std::io::{self, Write};
use tracing_subscriber::EnvFilter;

/// The client's only flag of its own. Recognised only before the first
/// renderer argument.
const SERVER_URL_FLAG: &str = "--kwk-server-url";

#[derive(Parser, Debug)]
#[command(
    name = "kwkhtmltopdf",
    disable_help_flag = true,
    disable_version_flag = true
)]
struct Cli {
    /// kwkhtmltopdf server endpoint.
    #[arg(long = "kwk-server-url", env = "KWKHTMLTOPDF_SERVER_URL")]
    server_url: String,
}

/// Split `argv` into the client's own leading flags (program name included)
/// and the renderer arguments, which are forwarded untouched, `--` included.
fn split_args(argv: &[String]) -> (&[String], &[String]) {
    let mut own = argv.len().min(1);
    while let Some(arg) = argv.get(own) {
        if arg == SERVER_URL_FLAG {
            own = (own + 2).min(argv.len());
        } else if arg
            .strip_prefix(SERVER_URL_FLAG)
            .is_some_and(|rest| rest.starts_with('='))
        {
            own += 1;
        } else {
            break;
        }
    }
    argv.split_at(own)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    if let Err(e) = run().await {
        eprintln!("kwkhtmltopdf: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let argv: Vec<String> = std::env::args().collect();
    let (own, renderer_args) = split_args(&argv);
    let cli = Cli::parse_from(own);

    if cli.server_url == MOCK_SERVER_URL {
        let mut out = io::stdout().lock();
        out.write_all(MOCK_VERSION.as_bytes())
            .context("Failed to write to stdout")?;
        return Ok(());
    }

    let invocation = plan_invocation(renderer_args)?;
    let http = reqwest::Client::builder()
        .build()
        .context("Failed to build HTTP client")?;

    let response = client::post(&http, &cli.server_url, &invocation)
        .await
        .with_context(|| format!("Request to {} failed", cli.server_url))?;

    let written = client::write_to_destination(response, &invocation.destination)
        .await
        .context("Failed to receive document")?;

    if let Destination::File(ref path) = invocation.destination {
        tracing::debug!("Wrote {} bytes to {}", written, path.display());
    }
    Ok(())
}
