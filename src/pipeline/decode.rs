//! Request decoding: multipart body → ordered [`Part`] list.
//!
//! Every segment is classified once, by field name, into the closed
//! [`PartKind`] set. `option` bodies are read as text; `file` bodies are
//! streamed straight into the request's [`Workspace`], so decoding has the
//! side effect of creating files and is not idempotent across retries.

use crate::error::BridgeError;
use crate::pipeline::workspace::Workspace;
use axum::extract::Multipart;
use std::path::PathBuf;
use tracing::debug;

/// A decoded multipart segment, in the order it was received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    /// One literal command-line argument.
    Option(String),
    /// An uploaded file, already materialised in the workspace.
    File { original_name: String, path: PathBuf },
}

/// The only field names the protocol knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartKind {
    Option,
    File,
}

impl PartKind {
    /// Classify a multipart field name.
    pub fn from_field_name(name: Option<&str>) -> Result<Self, BridgeError> {
        match name {
            Some("option") => Ok(PartKind::Option),
            Some("file") => Ok(PartKind::File),
            other => Err(BridgeError::UnexpectedPartName {
                name: other.unwrap_or_default().to_string(),
            }),
        }
    }
}

/// Decode all parts of `multipart`, storing file parts in `workspace`.
///
/// Stops at the first error; files stored so far stay in the workspace and
/// go away with it.
pub async fn decode_parts(
    multipart: &mut Multipart,
    workspace: &Workspace,
) -> Result<Vec<Part>, BridgeError> {
    let mut parts = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| BridgeError::MalformedRequest(e.body_text()))?
    {
        match PartKind::from_field_name(field.name())? {
            PartKind::Option => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| BridgeError::MalformedRequest(e.body_text()))?;
                parts.push(Part::Option(value));
            }
            PartKind::File => {
                let original_name = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or(BridgeError::MissingFileName { name: None })?;
                let path = workspace.store(&original_name, field).await?;
                parts.push(Part::File {
                    original_name,
                    path,
                });
            }
        }
    }

    debug!("Decoded {} parts", parts.len());
    Ok(parts)
}
