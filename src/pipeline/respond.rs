//! Response streaming: commit the header, then relay renderer output.
//!
//! ## Why errors become connection aborts
//!
//! The 200 status and content type are committed as soon as the renderer has
//! started, and from then on nothing in HTTP/1.1 lets us take them back. A
//! renderer crash or an I/O error discovered mid-document is therefore
//! reported the only way left: the body stream yields an `Err`, and the HTTP
//! layer tears down the connection without writing the terminating chunk.
//! Clients see an incomplete chunked body, never a short but "complete" one.
//!
//! ## One code path, two shapes
//!
//! The [`RelaySource`] decided when the arguments were built selects the
//! shape:
//!
//! ```text
//! stream-through:  Stdout ──read…EOF──▶ wait ──▶ Exhausted
//! file-relay:      PendingFile ──wait──▶ File ──read…EOF──▶ Exhausted
//! ```
//!
//! In stream-through mode stdout is drained to EOF before the exit status is
//! collected (see [`crate::pipeline::process`]).
//!
//! ## Who drives the relay
//!
//! A spawned task reads the renderer and pushes [`Frame`]s into a small
//! bounded channel that the response body drains. The render deadline bounds
//! both reading and queueing, so a client that stops reading cannot keep the
//! renderer and workspace alive past it.

use crate::config::ServerConfig;
use crate::context::RequestContext;
use crate::error::BridgeError;
use crate::pipeline::args::OutputTarget;
use crate::pipeline::process::RendererProcess;
use axum::body::{Body, Bytes};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::ChildStdout;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_stream::Stream;
use tracing::{error, info, warn};

/// Content type of documentation responses.
pub const TEXT_CONTENT_TYPE: &str = "text/plain";

/// A boxed stream of response body chunks.
pub type RenderStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Lifecycle of one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseState {
    NotStarted,
    /// Status line and headers handed to the HTTP layer. Irreversible.
    HeaderSent,
    StreamingBody,
    /// Connection torn down to signal a failure after commit.
    Aborted,
    Completed,
}

impl ResponseState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ResponseState::Aborted | ResponseState::Completed)
    }
}

/// Where the next body bytes come from.
#[derive(Debug)]
pub enum RelaySource {
    /// Renderer stdout, read while the renderer runs.
    Stdout(ChildStdout),
    /// Output file not readable until the renderer has exited.
    PendingFile(PathBuf),
    /// Output file, read after a successful exit.
    File(tokio::fs::File),
    /// Nothing left to relay.
    Exhausted,
}

/// Content type for a response.
pub fn content_type(is_documentation: bool, rendered: &str) -> &str {
    if is_documentation {
        TEXT_CONTENT_TYPE
    } else {
        rendered
    }
}

/// Frames queued between the relay task and the response body.
const RELAY_QUEUE_DEPTH: usize = 4;

/// Commit a 200 response whose body relays the renderer's output.
///
/// The relay runs as its own task and feeds the body through a bounded
/// channel, so the render deadline holds even when the client stops reading
/// and the HTTP layer stops polling the body. The task owns the request
/// context (and with it the workspace) and the renderer process; both are
/// released when the relay completes, aborts, or finds the body dropped
/// because the client went away.
pub fn commit(
    ctx: RequestContext,
    mut process: RendererProcess,
    config: &ServerConfig,
) -> Response {
    let source = match ctx.arguments.target() {
        OutputTarget::Stdout => match process.take_stdout() {
            Some(stdout) => RelaySource::Stdout(stdout),
            None => RelaySource::Exhausted,
        },
        OutputTarget::File(path) => RelaySource::PendingFile(path.clone()),
    };

    let content_type = content_type(ctx.arguments.is_documentation(), &config.content_type);
    let content_type = HeaderValue::from_str(content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));

    let relay = Relay {
        deadline: config.render_timeout.map(|t| Instant::now() + t),
        timeout_secs: config.render_timeout.map(|t| t.as_secs()).unwrap_or_default(),
        chunk_size: config.read_chunk_size,
        bytes_sent: 0,
        state: ResponseState::NotStarted,
        ctx,
        process,
        source,
    };

    let (frames, rx) = mpsc::channel(RELAY_QUEUE_DEPTH);
    let (started, on_start) = oneshot::channel();
    tokio::spawn(relay.run(frames, on_start));

    let mut response = Response::new(Body::from_stream(body_stream(rx, started)));
    *response.status_mut() = StatusCode::OK;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, content_type);
    response
}

/// One message from the relay task to the response body.
#[derive(Debug)]
enum Frame {
    Data(Bytes),
    /// The document is complete; end the body normally.
    End,
    /// Fail the body so the connection is torn down.
    Abort(io::Error),
}

/// Turn relay frames into body items.
///
/// The first poll tells the relay that the header is on its way. A channel
/// that closes without [`Frame::End`] means the relay gave up, and is
/// reported as an error so the body can never look complete.
fn body_stream(rx: mpsc::Receiver<Frame>, started: oneshot::Sender<()>) -> RenderStream {
    Box::pin(futures::stream::unfold(
        Some((rx, Some(started))),
        |state| async move {
            let (mut rx, started) = state?;
            if let Some(started) = started {
                let _ = started.send(());
            }
            match rx.recv().await {
                Some(Frame::Data(chunk)) => Some((Ok(chunk), Some((rx, None)))),
                Some(Frame::End) => None,
                Some(Frame::Abort(err)) => Some((Err(err), None)),
                None => Some((
                    Err(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "relay stopped before the document was complete",
                    )),
                    None,
                )),
            }
        },
    ))
}

/// Why a frame did not reach the response body.
enum Undelivered {
    /// The body was dropped: the client went away.
    Disconnected,
    /// The render deadline elapsed while the client was not reading.
    DeadlineElapsed,
}

/// State of one response, driven by the relay task.
struct Relay {
    ctx: RequestContext,
    process: RendererProcess,
    source: RelaySource,
    state: ResponseState,
    deadline: Option<Instant>,
    timeout_secs: u64,
    chunk_size: usize,
    bytes_sent: u64,
}

impl Relay {
    /// Relay until the body is complete, aborted, or dropped.
    async fn run(mut self, frames: mpsc::Sender<Frame>, on_start: oneshot::Receiver<()>) {
        let started = match self.deadline {
            Some(at) => tokio::time::timeout_at(at, on_start).await,
            None => Ok(on_start.await),
        };
        match started {
            Ok(Ok(())) => self.state = ResponseState::HeaderSent,
            // Body dropped before it was ever polled.
            Ok(Err(_)) => return,
            Err(_) => {
                let err = BridgeError::RenderTimeout {
                    secs: self.timeout_secs,
                };
                self.abort(&err);
                return;
            }
        }

        loop {
            let next = tokio::select! {
                next = self.next_chunk() => next,
                // Drop reports the disconnect and stops the renderer.
                _ = frames.closed() => return,
            };
            let frame = match next {
                Some(Ok(chunk)) => Frame::Data(chunk),
                Some(Err(err)) => Frame::Abort(err),
                None => Frame::End,
            };
            let last = !matches!(frame, Frame::Data(_));

            match self.deliver(&frames, frame).await {
                Ok(()) if last => return,
                Ok(()) => {}
                // Drop reports the disconnect and stops the renderer.
                Err(Undelivered::Disconnected) => return,
                Err(Undelivered::DeadlineElapsed) => {
                    if !self.state.is_terminal() {
                        let err = BridgeError::RenderTimeout {
                            secs: self.timeout_secs,
                        };
                        self.abort(&err);
                    }
                    // Dropping the sender fails the body on its next poll.
                    return;
                }
            }
        }
    }

    /// Queue `frame` for the body, bounded by the render deadline.
    async fn deliver(&self, frames: &mpsc::Sender<Frame>, frame: Frame) -> Result<(), Undelivered> {
        let sent = match self.deadline {
            Some(at) => tokio::time::timeout_at(at, frames.send(frame))
                .await
                .map_err(|_| Undelivered::DeadlineElapsed)?,
            None => frames.send(frame).await,
        };
        sent.map_err(|_| Undelivered::Disconnected)
    }

    /// Next body item; `None` once the response is completed or aborted.
    async fn next_chunk(&mut self) -> Option<io::Result<Bytes>> {
        if self.state.is_terminal() {
            return None;
        }
        match self.pump().await {
            Ok(Some(chunk)) => {
                self.state = ResponseState::StreamingBody;
                self.bytes_sent += chunk.len() as u64;
                Some(Ok(chunk))
            }
            Ok(None) => {
                self.complete();
                None
            }
            Err(err) => {
                self.abort(&err);
                Some(Err(err.into()))
            }
        }
    }

    /// Advance the source until it yields bytes or runs dry.
    async fn pump(&mut self) -> Result<Option<Bytes>, BridgeError> {
        loop {
            match &mut self.source {
                RelaySource::Stdout(stdout) => {
                    let chunk =
                        read_chunk(stdout, self.chunk_size, self.deadline, self.timeout_secs).await?;
                    if chunk.is_some() {
                        return Ok(chunk);
                    }
                    self.source = RelaySource::Exhausted;
                    self.wait_renderer().await?;
                    return Ok(None);
                }
                RelaySource::PendingFile(path) => {
                    let path = path.clone();
                    self.wait_renderer().await?;
                    let file = tokio::fs::File::open(&path)
                        .await
                        .map_err(BridgeError::StreamError)?;
                    self.source = RelaySource::File(file);
                }
                RelaySource::File(file) => {
                    let chunk =
                        read_chunk(file, self.chunk_size, self.deadline, self.timeout_secs).await?;
                    if chunk.is_none() {
                        self.source = RelaySource::Exhausted;
                    }
                    return Ok(chunk);
                }
                RelaySource::Exhausted => return Ok(None),
            }
        }
    }

    async fn wait_renderer(&mut self) -> Result<(), BridgeError> {
        with_deadline(self.deadline, self.timeout_secs, self.process.wait()).await?;
        Ok(())
    }

    fn complete(&mut self) {
        self.state = ResponseState::Completed;
        info!(
            "Completed request from {}: {} bytes, renderer {}ms, total {}ms",
            self.ctx.identity,
            self.bytes_sent,
            self.process.duration().unwrap_or_default().as_millis(),
            self.ctx.elapsed().as_millis()
        );
        self.ctx.workspace.release();
    }

    fn abort(&mut self, err: &BridgeError) {
        self.state = ResponseState::Aborted;
        self.process.terminate();
        error!(
            "Aborting response to {} after {} bytes ({} ran {}ms, total {}ms): {}",
            self.ctx.identity,
            self.bytes_sent,
            self.process.program().display(),
            self.process.elapsed().as_millis(),
            self.ctx.elapsed().as_millis(),
            err
        );
        self.ctx.workspace.release();
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        match self.state {
            ResponseState::NotStarted => {
                warn!(
                    "Response to {} dropped before its header was sent; stopping renderer",
                    self.ctx.identity
                );
            }
            ResponseState::HeaderSent | ResponseState::StreamingBody => {
                // The HTTP layer dropped the body: the client disconnected.
                warn!(
                    "Client {} went away after {} bytes; stopping renderer",
                    self.ctx.identity, self.bytes_sent
                );
            }
            ResponseState::Aborted | ResponseState::Completed => return,
        }
        self.state = ResponseState::Aborted;
        self.process.terminate();
    }
}

/// Read up to `size` bytes. `None` at EOF.
async fn read_chunk<R>(
    reader: &mut R,
    size: usize,
    deadline: Option<Instant>,
    timeout_secs: u64,
) -> Result<Option<Bytes>, BridgeError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; size];
    let n = with_deadline(deadline, timeout_secs, async {
        reader.read(&mut buf).await.map_err(BridgeError::StreamError)
    })
    .await?;
    if n == 0 {
        return Ok(None);
    }
    buf.truncate(n);
    Ok(Some(Bytes::from(buf)))
}

/// Run `fut`, failing with [`BridgeError::RenderTimeout`] past `deadline`.
async fn with_deadline<T, F>(
    deadline: Option<Instant>,
    timeout_secs: u64,
    fut: F,
) -> Result<T, BridgeError>
where
    F: Future<Output = Result<T, BridgeError>>,
{
    match deadline {
        Some(at) => tokio::time::timeout_at(at, fut)
            .await
            .map_err(|_| BridgeError::RenderTimeout { secs: timeout_secs })?,
        None => fut.await,
    }
}
