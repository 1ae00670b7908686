//! Per-request state.

use crate::pipeline::args::ArgumentVector;
use crate::pipeline::workspace::Workspace;
use std::time::{Duration, Instant};

/// Everything one request accumulates on its way to the renderer.
///
/// Owned by a single handler invocation and never shared. Once the response
/// is committed it moves into the response body, which drops it (removing
/// the workspace) when the transfer ends.
#[derive(Debug)]
pub struct RequestContext {
    /// Human-readable client identity for logs.
    pub identity: String,
    pub arguments: ArgumentVector,
    pub workspace: Workspace,
    pub started: Instant,
}

impl RequestContext {
    pub fn new(
        identity: String,
        arguments: ArgumentVector,
        workspace: Workspace,
        started: Instant,
    ) -> Self {
        Self {
            identity,
            arguments,
            workspace,
            started,
        }
    }

    /// True when the response is the renderer's plain-text documentation.
    pub fn is_documentation(&self) -> bool {
        self.arguments.is_documentation()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}
