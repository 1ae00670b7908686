//! Server configuration.
//!
//! Every knob of the bridge lives in [`ServerConfig`], built once at start-up
//! via [`ServerConfigBuilder`] and then shared read-only by all requests.
//! Nothing in the request path reads the environment: the binary maps its
//! flags and environment variables onto the builder, and the resulting value
//! is injected into the router.

use crate::error::BridgeError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Renderer executable used when none is configured.
pub const DEFAULT_RENDERER: &str = "wkhtmltopdf";

/// Content type of rendered (non-documentation) responses.
pub const DEFAULT_CONTENT_TYPE: &str = "application/pdf";

/// Read buffer used when relaying renderer output.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Configuration for the HTTP bridge.
///
/// Built via [`ServerConfig::builder()`] or using [`ServerConfig::default()`].
///
/// # Example
/// ```rust
/// use kwkhtmltopdf::{OutputSink, ServerConfig};
/// use std::time::Duration;
///
/// let config = ServerConfig::builder()
///     .renderer_bin("/usr/local/bin/wkhtmltopdf")
///     .output_sink(OutputSink::WorkspaceFile)
///     .render_timeout(Duration::from_secs(120))
///     .build()
///     .unwrap();
/// assert_eq!(config.output_sink, OutputSink::WorkspaceFile);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Renderer executable. A bare name is resolved through `PATH`.
    /// Default: `wkhtmltopdf`.
    pub renderer_bin: PathBuf,

    /// Where the renderer writes the document. Default: [`OutputSink::Stdout`].
    pub output_sink: OutputSink,

    /// Content type of rendered responses. Default: `application/pdf`.
    ///
    /// Documentation requests (`--help`, `--version`, …) are always served
    /// as `text/plain` regardless of this value.
    pub content_type: String,

    /// Extension given to the output file in file-relay mode. Default: `.pdf`.
    ///
    /// wkhtmltoimage picks its output format from this extension, so the
    /// suffix is configurable alongside the renderer binary.
    pub output_suffix: String,

    /// Parent directory of per-request workspaces. Default: system temp dir.
    pub workspace_root: Option<PathBuf>,

    /// Maximum accepted request body size in bytes. Default: unlimited.
    pub max_upload_bytes: Option<usize>,

    /// Deadline for one render, measured from spawn. Default: none.
    ///
    /// When it elapses the renderer is killed and the response aborted.
    pub render_timeout: Option<Duration>,

    /// Reverse-resolve client addresses for request logs. Default: true.
    pub resolve_client_names: bool,

    /// Upper bound on one reverse lookup. Default: 2 s.
    pub lookup_timeout: Duration,

    /// Read buffer size when relaying output. Default: 64 KiB.
    pub read_chunk_size: usize,

    /// Log argument vectors (redacted) at INFO instead of DEBUG. Default: false.
    pub verbose: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            renderer_bin: PathBuf::from(DEFAULT_RENDERER),
            output_sink: OutputSink::default(),
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            output_suffix: ".pdf".to_string(),
            workspace_root: None,
            max_upload_bytes: None,
            render_timeout: None,
            resolve_client_names: true,
            lookup_timeout: Duration::from_secs(2),
            read_chunk_size: DEFAULT_CHUNK_SIZE,
            verbose: false,
        }
    }
}

impl ServerConfig {
    /// Create a new builder for `ServerConfig`.
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ServerConfig`].
#[derive(Debug)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    pub fn renderer_bin(mut self, bin: impl Into<PathBuf>) -> Self {
        self.config.renderer_bin = bin.into();
        self
    }

    pub fn output_sink(mut self, sink: OutputSink) -> Self {
        self.config.output_sink = sink;
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.config.content_type = content_type.into();
        self
    }

    pub fn output_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.config.output_suffix = suffix.into();
        self
    }

    pub fn workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.workspace_root = Some(root.into());
        self
    }

    pub fn max_upload_bytes(mut self, limit: usize) -> Self {
        self.config.max_upload_bytes = Some(limit);
        self
    }

    pub fn render_timeout(mut self, timeout: Duration) -> Self {
        self.config.render_timeout = Some(timeout);
        self
    }

    pub fn resolve_client_names(mut self, v: bool) -> Self {
        self.config.resolve_client_names = v;
        self
    }

    pub fn lookup_timeout(mut self, timeout: Duration) -> Self {
        self.config.lookup_timeout = timeout;
        self
    }

    pub fn read_chunk_size(mut self, size: usize) -> Self {
        self.config.read_chunk_size = size;
        self
    }

    pub fn verbose(mut self, v: bool) -> Self {
        self.config.verbose = v;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServerConfig, BridgeError> {
        let c = &self.config;
        if c.renderer_bin.as_os_str().is_empty() {
            return Err(BridgeError::InvalidConfig(
                "renderer binary must not be empty".into(),
            ));
        }
        if c.content_type.trim().is_empty() {
            return Err(BridgeError::InvalidConfig(
                "content type must not be empty".into(),
            ));
        }
        if c.output_suffix.contains(['/', '\\']) {
            return Err(BridgeError::InvalidConfig(format!(
                "output suffix must not contain a path separator, got {:?}",
                c.output_suffix
            )));
        }
        if c.read_chunk_size == 0 {
            return Err(BridgeError::InvalidConfig(
                "read chunk size must be ≥ 1".into(),
            ));
        }
        if c.render_timeout == Some(Duration::ZERO) {
            return Err(BridgeError::InvalidConfig(
                "render timeout must be positive".into(),
            ));
        }
        Ok(self.config)
    }
}

/// Where the renderer is told to write a rendered document.
///
/// The choice is made once per request, before the renderer starts, and the
/// response streamer follows it without further branching on deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputSink {
    /// Stream-through: pass `-` so the renderer writes to stdout, and relay
    /// bytes as they are produced. (default)
    #[default]
    Stdout,
    /// File-relay: pass a reserved path inside the workspace, and relay the
    /// file once the renderer has exited successfully.
    WorkspaceFile,
}
