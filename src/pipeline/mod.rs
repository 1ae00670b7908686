//! Pipeline stages of one render request.
//!
//! Each submodule implements exactly one step, so each can be tested on its
//! own and the HTTP handler in [`crate::server`] only wires them together.
//!
//! ## Data Flow
//!
//! ```text
//! decode ──▶ args ──▶ process ──▶ respond
//!   │                               │
//!   └──────── workspace ◀───────────┘
//! (multipart)  (argv)   (renderer)  (200 + relay / abort)
//! ```
//!
//! 1. [`workspace`]: per-request temp dir; removed exactly once on every
//!    exit path
//! 2. [`decode`]:    multipart parts into the closed `option` / `file` set,
//!    file bodies streamed into the workspace
//! 3. [`args`]:      ordered argument vector, documentation detection,
//!    output target, log redaction
//! 4. [`process`]:   spawn the renderer, stdout piped, stderr inherited
//! 5. [`respond`]:   commit the header, relay bytes, abort the connection
//!    on post-commit failure

pub mod args;
pub mod decode;
pub mod process;
pub mod respond;
pub mod workspace;
