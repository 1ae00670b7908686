//! Argument building: decoded parts → renderer argument vector.
//!
//! The renderer is order-sensitive (page options precede the page they
//! apply to, the output target comes last), so arguments are appended in
//! exactly the order the parts arrived. Option values are passed through
//! untouched; unknown or malformed renderer flags are the renderer's
//! business and surface as a process failure.

use crate::config::OutputSink;
use crate::error::BridgeError;
use crate::pipeline::decode::Part;
use crate::pipeline::workspace::Workspace;
use std::fmt;
use std::path::PathBuf;

/// Flags that make the renderer print text (help, version, license, manual)
/// instead of producing a document.
pub const DOCUMENTATION_FLAGS: &[&str] = &[
    "-h",
    "--help",
    "-H",
    "--extended-help",
    "-V",
    "--version",
    "--readme",
    "--license",
    "--htmldoc",
    "--manpage",
];

/// Stdout marker understood by the renderer as output target.
pub const STDOUT_MARKER: &str = "-";

/// Flags whose values carry credentials, with the number of values each
/// takes. Those values never reach the logs.
const SENSITIVE_FLAGS: &[(&str, usize)] = &[
    ("--cookie", 2),
    ("--custom-header", 2),
    ("--password", 1),
    ("--ssl-key-password", 1),
];

/// True if `arg` is one of [`DOCUMENTATION_FLAGS`].
pub fn is_documentation_flag(arg: &str) -> bool {
    DOCUMENTATION_FLAGS.contains(&arg)
}

/// Where the rendered bytes end up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    /// Renderer stdout.
    Stdout,
    /// A reserved file inside the workspace.
    File(PathBuf),
}

/// The renderer's full argument list plus what it implies for the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentVector {
    args: Vec<String>,
    documentation: bool,
    target: OutputTarget,
}

impl ArgumentVector {
    /// Arguments in renderer order, output entry included.
    pub fn as_slice(&self) -> &[String] {
        &self.args
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// True when a documentation flag was present: the response is the
    /// renderer's plain-text stdout and no output entry was appended.
    pub fn is_documentation(&self) -> bool {
        self.documentation
    }

    pub fn target(&self) -> &OutputTarget {
        &self.target
    }

    /// Loggable view with credential values masked.
    pub fn redacted(&self) -> Redacted<'_> {
        Redacted(&self.args)
    }
}

/// Build the argument vector for `parts`.
///
/// Options are appended verbatim, files as their stored path. Unless a
/// documentation flag was seen, one synthetic output entry is appended last,
/// chosen by `sink`: `-` for stream-through, a freshly reserved workspace
/// file for file-relay.
pub fn build_arguments(
    parts: &[Part],
    sink: OutputSink,
    workspace: &Workspace,
    output_suffix: &str,
) -> Result<ArgumentVector, BridgeError> {
    let mut args = Vec::with_capacity(parts.len() + 1);
    let mut documentation = false;

    for part in parts {
        match part {
            Part::Option(value) => {
                if is_documentation_flag(value) {
                    documentation = true;
                }
                args.push(value.clone());
            }
            Part::File { path, .. } => args.push(path.to_string_lossy().into_owned()),
        }
    }

    let target = if documentation {
        OutputTarget::Stdout
    } else {
        match sink {
            OutputSink::Stdout => {
                args.push(STDOUT_MARKER.to_string());
                OutputTarget::Stdout
            }
            OutputSink::WorkspaceFile => {
                let path = workspace.reserve_output(output_suffix)?;
                args.push(path.to_string_lossy().into_owned());
                OutputTarget::File(path)
            }
        }
    };

    Ok(ArgumentVector {
        args,
        documentation,
        target,
    })
}

/// Argument list formatter that masks credential values.
pub struct Redacted<'a>(&'a [String]);

impl fmt::Display for Redacted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut masked = 0;
        for (i, arg) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            if masked > 0 {
                f.write_str("***")?;
                masked -= 1;
                continue;
            }
            f.write_str(arg)?;
            if let Some((_, n)) = SENSITIVE_FLAGS.iter().find(|(flag, _)| flag == arg) {
                masked = *n;
            }
        }
        Ok(())
    }
}
