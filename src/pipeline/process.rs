//! Renderer process: spawn, expose stdout, wait.
//!
//! ## Drain before wait
//!
//! The renderer can write far more than a pipe buffer holds. If the parent
//! waited for exit before reading everything, the child would block on a
//! full pipe and neither side would make progress. [`RendererProcess`]
//! therefore hands out its stdout separately ([`RendererProcess::take_stdout`])
//! and the response streamer only calls [`RendererProcess::wait`] after it
//! has read stdout to EOF.
//!
//! stderr is inherited, so renderer diagnostics land next to the service's
//! own logs and never in a response.

use crate::error::BridgeError;
use crate::pipeline::args::{ArgumentVector, OutputTarget};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, warn};

/// One running renderer invocation. Never reused across requests.
#[derive(Debug)]
pub struct RendererProcess {
    program: PathBuf,
    child: Child,
    stdout: Option<ChildStdout>,
    started: Instant,
    duration: Option<Duration>,
}

impl RendererProcess {
    /// Spawn `program` with `argv`.
    ///
    /// stdout is piped when the document (or documentation text) goes to
    /// stdout, and discarded in file-relay mode. The child is killed if this
    /// handle is dropped before it exits.
    pub fn start(program: &Path, argv: &ArgumentVector) -> Result<Self, BridgeError> {
        let stdout = match argv.target() {
            OutputTarget::Stdout => Stdio::piped(),
            OutputTarget::File(_) => Stdio::null(),
        };

        let mut child = Command::new(program)
            .args(argv.as_slice())
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| BridgeError::SpawnError {
                program: program.to_path_buf(),
                source,
            })?;

        debug!(
            "Spawned renderer {} (pid {:?})",
            program.display(),
            child.id()
        );

        Ok(Self {
            program: program.to_path_buf(),
            stdout: child.stdout.take(),
            child,
            started: Instant::now(),
            duration: None,
        })
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Take the readable end of the renderer's stdout. `None` in file-relay
    /// mode or if already taken.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    /// Wait for the renderer to exit.
    ///
    /// Returns the wall-clock run time on success; a non-zero exit or signal
    /// termination is [`BridgeError::ProcessFailure`].
    pub async fn wait(&mut self) -> Result<Duration, BridgeError> {
        let status = self.child.wait().await.map_err(BridgeError::StreamError)?;
        let duration = self.started.elapsed();
        self.duration = Some(duration);

        if status.success() {
            debug!(
                "Renderer {} exited successfully after {}ms",
                self.program.display(),
                duration.as_millis()
            );
            Ok(duration)
        } else {
            Err(BridgeError::ProcessFailure {
                program: self.program.clone(),
                status,
            })
        }
    }

    /// Run time once the renderer has exited.
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    /// Time since spawn.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Kill the renderer if it is still running. Best effort.
    pub fn terminate(&mut self) {
        if self.duration.is_some() {
            return;
        }
        if let Err(e) = self.child.start_kill() {
            // Already reaped or never ran: nothing left to stop.
            debug!("Renderer {} not killed: {}", self.program.display(), e);
        } else {
            warn!(
                "Killed renderer {} after {}ms",
                self.program.display(),
                self.elapsed().as_millis()
            );
        }
    }
}
