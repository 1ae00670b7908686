//! Drop-in client: renderer command line → multipart request.
//!
//! The client accepts the same arguments as the renderer and decides, one
//! argument at a time, whether it is an option (sent as text) or a local
//! input file (uploaded). The server sees the arguments in their original
//! order, so the renderer receives the same command line it would have got
//! locally, with file paths rewritten into its workspace.
//!
//! ## Classification, first match wins
//!
//! | Argument | Sent as |
//! |----------|---------|
//! | `-` | rejected (stdin/stdout redirection unsupported) |
//! | `-…` | `option` |
//! | `http://…`, `https://…` | `option` (the renderer fetches it) |
//! | `file://PATH` | `file` read from `PATH` |
//! | an existing local path | `file` |
//! | anything else | `option` |
//!
//! When the last two arguments both look like non-options, the last one is
//! the local output destination and is not sent.

use crate::error::ClientError;
use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Environment variable naming the server endpoint.
pub const SERVER_URL_ENV: &str = "KWKHTMLTOPDF_SERVER_URL";

/// Server URL value that short-circuits every call with [`MOCK_VERSION`].
pub const MOCK_SERVER_URL: &str = "MOCK";

/// Output of the client when the server URL is [`MOCK_SERVER_URL`].
pub const MOCK_VERSION: &str = "wkhtmltopdf 0.12.5 (mock)\n";

const FILE_SCHEME: &str = "file://";
const URL_SCHEMES: &[&str] = &["http://", "https://"];

/// One multipart part to send, in command-line order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestItem {
    Option(String),
    File(PathBuf),
}

/// Where the response body goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Stdout,
    File(PathBuf),
}

/// A translated command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInvocation {
    pub items: Vec<RequestItem>,
    pub destination: Destination,
}

/// Translate renderer arguments into request parts and an output destination.
///
/// No arguments behaves like `-h`, mirroring the renderer's own CLI.
pub fn plan_invocation(args: &[String]) -> Result<ClientInvocation, ClientError> {
    let help = ["-h".to_string()];
    let mut args = if args.is_empty() { &help[..] } else { args };

    let mut destination = Destination::Stdout;
    if let [.., input, output] = args {
        if !input.starts_with('-') && !output.starts_with('-') {
            destination = Destination::File(PathBuf::from(output));
            args = &args[..args.len() - 1];
        }
    }

    let items = args
        .iter()
        .map(|arg| classify(arg))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ClientInvocation { items, destination })
}

/// Classify one argument.
fn classify(arg: &str) -> Result<RequestItem, ClientError> {
    if arg == "-" {
        return Err(ClientError::StdioUnsupported);
    }
    if arg.starts_with('-') || URL_SCHEMES.iter().any(|s| arg.starts_with(s)) {
        return Ok(RequestItem::Option(arg.to_string()));
    }
    if let Some(path) = arg.strip_prefix(FILE_SCHEME) {
        return Ok(RequestItem::File(PathBuf::from(path)));
    }
    // TODO: an option value that happens to name a local file is uploaded;
    // telling them apart needs the renderer's option table (`--extended-help`).
    if Path::new(arg).exists() {
        return Ok(RequestItem::File(PathBuf::from(arg)));
    }
    Ok(RequestItem::Option(arg.to_string()))
}

/// Build the multipart form for `items`, reading local files.
pub async fn build_form(items: &[RequestItem]) -> Result<Form, ClientError> {
    let mut form = Form::new();
    for item in items {
        form = match item {
            RequestItem::Option(value) => form.text("option", value.clone()),
            RequestItem::File(path) => {
                let bytes = tokio::fs::read(path)
                    .await
                    .map_err(|source| ClientError::ReadInput {
                        path: path.clone(),
                        source,
                    })?;
                debug!("Uploading {} ({} bytes)", path.display(), bytes.len());
                let part = Part::bytes(bytes).file_name(path.to_string_lossy().into_owned());
                form.part("file", part)
            }
        };
    }
    Ok(form)
}

/// Send `invocation` to `url` and return the response once it is known to
/// be a 200.
pub async fn post(
    client: &reqwest::Client,
    url: &str,
    invocation: &ClientInvocation,
) -> Result<reqwest::Response, ClientError> {
    let form = build_form(&invocation.items).await?;
    let response = client.post(url).multipart(form).send().await?;

    let status = response.status();
    if status != reqwest::StatusCode::OK {
        let message = response.text().await.unwrap_or_default();
        return Err(ClientError::ServerStatus {
            status: status.as_u16(),
            message: message.trim().to_string(),
        });
    }
    Ok(response)
}

/// Stream the response body into `writer`, returning the byte count.
///
/// A body that ends in a transport error was aborted by the server and is
/// reported as [`ClientError::Truncated`].
pub async fn copy_body<W>(response: reqwest::Response, writer: &mut W) -> Result<u64, ClientError>
where
    W: AsyncWrite + Unpin,
{
    let mut received: u64 = 0;
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| {
            debug!("Response body failed: {}", e);
            ClientError::Truncated { received }
        })?;
        writer
            .write_all(&chunk)
            .await
            .map_err(ClientError::WriteOutput)?;
        received += chunk.len() as u64;
    }
    writer.flush().await.map_err(ClientError::WriteOutput)?;
    Ok(received)
}

/// Write the response body to `destination`.
///
/// File destinations are written to a temporary sibling and renamed into
/// place only after the whole body arrived, so an aborted transfer never
/// leaves a partial document behind.
pub async fn write_to_destination(
    response: reqwest::Response,
    destination: &Destination,
) -> Result<u64, ClientError> {
    match destination {
        Destination::Stdout => copy_body(response, &mut tokio::io::stdout()).await,
        Destination::File(path) => {
            let dir = match path.parent() {
                Some(p) if !p.as_os_str().is_empty() => p,
                _ => Path::new("."),
            };
            let tmp = tempfile::Builder::new()
                .prefix(".kwk-")
                .tempfile_in(dir)
                .map_err(ClientError::WriteOutput)?;
            let std_file = tmp.reopen().map_err(ClientError::WriteOutput)?;
            let mut file = tokio::fs::File::from_std(std_file);

            let received = copy_body(response, &mut file).await?;
            file.sync_all().await.map_err(ClientError::WriteOutput)?;
            drop(file);

            tmp.persist(path)
                .map_err(|e| ClientError::WriteOutput(e.error))?;
            Ok(received)
        }
    }
}
