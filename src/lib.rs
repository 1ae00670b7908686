//! # kwkhtmltopdf
//!
//! Run `wkhtmltopdf` on one machine and call it from many: an HTTP bridge
//! that turns a multipart request into a renderer invocation and streams the
//! result back, plus a drop-in client that speaks the same protocol.
//!
//! ## Why a bridge?
//!
//! wkhtmltopdf is sensitive to the exact Qt build, fonts and system libraries
//! it runs against. Pinning one known-good installation behind an HTTP
//! endpoint gives every caller byte-identical output without installing the
//! renderer everywhere; the client keeps the renderer's command line, so
//! existing callers switch by changing the executable name.
//!
//! ## Protocol
//!
//! ```text
//! POST / (or /pdf), multipart/form-data
//!   option  one literal command-line argument      (text)
//!   file    one input file, stored under basename  (bytes + filename)
//!
//! 200 application/pdf   rendered document, chunked
//! 200 text/plain        --help / --version / … output
//! 400 text/plain        malformed request, unknown part name
//! 500 text/plain        renderer could not be started
//! ```
//!
//! A failure after the 200 header was sent cannot change the status any
//! more; the server drops the connection instead and the client must treat
//! a truncated body as an error.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use kwkhtmltopdf::{serve, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::builder()
//!         .renderer_bin("/usr/local/bin/wkhtmltopdf")
//!         .build()?;
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//!     serve(listener, config, async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `kwkhtmltopdf-server` and `kwkhtmltopdf` binaries (clap + anyhow + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod client;
pub mod config;
pub mod context;
pub mod diagnostics;
pub mod error;
pub mod pipeline;
pub mod server;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use client::{plan_invocation, ClientInvocation, Destination, RequestItem};
pub use config::{OutputSink, ServerConfig, ServerConfigBuilder};
pub use context::RequestContext;
pub use error::{BridgeError, ClientError};
pub use pipeline::decode::Part;
pub use pipeline::respond::ResponseState;
pub use server::{router, serve};
