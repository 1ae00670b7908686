//! Error types for the kwkhtmltopdf bridge and client.
//!
//! Two distinct error types reflect the two sides of the protocol:
//!
//! * [`BridgeError`]: everything the server pipeline can fail with, from a
//!   malformed multipart body to a renderer that dies mid-document. Where the
//!   error surfaces depends on *when* it happens: before the response status
//!   is committed it becomes a plain-text HTTP error (see
//!   [`BridgeError::status_code`]); after that it is converted into an
//!   [`std::io::Error`] and fed into the response body, which makes the HTTP
//!   layer drop the connection mid-transfer.
//!
//! * [`ClientError`]: failures of the drop-in command-line client, including
//!   the truncated download that is the only trace of a post-commit server
//!   failure.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;

/// All errors produced by the server-side request pipeline.
#[derive(Debug, Error)]
pub enum BridgeError {
    // ── Decode errors (client's fault, 400) ─────────────────────────────
    /// The request body is not valid `multipart/form-data`.
    #[error("malformed multipart request: {0}")]
    MalformedRequest(String),

    /// A part carried a field name other than `option` or `file`.
    #[error("unexpected part name: {name}")]
    UnexpectedPartName { name: String },

    /// A `file` part had no usable file name.
    #[error("file part without a usable file name: {name:?}")]
    MissingFileName { name: Option<String> },

    /// Two `file` parts reduce to the same basename.
    #[error("duplicate file name '{name}' in request")]
    DuplicateFileName { name: String },

    // ── Server-side setup errors (500) ──────────────────────────────────
    /// The per-request temporary directory could not be created or written.
    #[error("workspace unavailable: {source}")]
    WorkspaceUnavailable {
        #[source]
        source: std::io::Error,
    },

    /// The renderer executable could not be located or executed.
    #[error("failed to start renderer '{program}': {source}")]
    SpawnError {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Render and relay errors (usually after the header is sent) ──────
    /// The renderer exited non-zero or was killed by a signal.
    #[error("renderer '{program}' failed: {status}")]
    ProcessFailure { program: PathBuf, status: ExitStatus },

    /// The renderer did not finish before the configured deadline.
    #[error("renderer did not finish within {secs}s")]
    RenderTimeout { secs: u64 },

    /// Reading renderer output or relaying it to the client failed.
    #[error("relaying renderer output failed: {0}")]
    StreamError(#[source] std::io::Error),

    // ── Diagnostics (always recovered locally) ──────────────────────────
    /// Reverse lookup of the client address failed.
    #[error("cannot resolve client address {addr}: {reason}")]
    DiagnosticLookupFailure { addr: String, reason: String },

    // ── Config errors ────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl BridgeError {
    /// HTTP status used when this error is reported before the response
    /// header has been committed.
    pub fn status_code(&self) -> StatusCode {
        match self {
            BridgeError::MalformedRequest(_)
            | BridgeError::UnexpectedPartName { .. }
            | BridgeError::MissingFileName { .. }
            | BridgeError::DuplicateFileName { .. } => StatusCode::BAD_REQUEST,
            BridgeError::WorkspaceUnavailable { .. }
            | BridgeError::SpawnError { .. }
            | BridgeError::ProcessFailure { .. }
            | BridgeError::RenderTimeout { .. }
            | BridgeError::StreamError(_)
            | BridgeError::DiagnosticLookupFailure { .. }
            | BridgeError::InvalidConfig(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// True for errors caused by the request itself rather than the server.
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        (self.status_code(), format!("{self}\n")).into_response()
    }
}

impl From<BridgeError> for std::io::Error {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::StreamError(source) => source,
            BridgeError::RenderTimeout { .. } => {
                std::io::Error::new(std::io::ErrorKind::TimedOut, err)
            }
            other => std::io::Error::other(other),
        }
    }
}

/// Errors returned by the command-line client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// `-` (stdin/stdout redirection) was passed as an argument.
    #[error("stdin/stdout input is not implemented")]
    StdioUnsupported,

    /// A local input file could not be read.
    #[error("cannot read input file '{path}': {source}")]
    ReadInput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The HTTP request could not be sent or its response not received.
    #[error("request to kwkhtmltopdf server failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server answered with something other than 200.
    #[error("server error ({status}): {message}")]
    ServerStatus { status: u16, message: String },

    /// The response body ended early: the server aborted the transfer.
    #[error("server error, response truncated after {received} bytes; consult server log for details")]
    Truncated { received: u64 },

    /// Writing the rendered output locally failed.
    #[error("failed to write output: {0}")]
    WriteOutput(#[source] std::io::Error),
}
