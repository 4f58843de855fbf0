#![forbid(unsafe_code)]

//! The native side of a parity run: build the tokenizer under test once,
//! then invoke it per input and read back its token section.

mod builder;
mod capture;
pub mod protocol;
mod runner;

use std::path::PathBuf;

use thiserror::Error;

pub use builder::{ArtifactBuilder, BuildArtifact, BuildCommand};
pub use capture::CaptureLimits;
pub use protocol::{
    ProtocolError, SectionFraming, TOKENS_END, TOKENS_START, TokenStream, parse_token_section,
};
pub use runner::NativeRunner;

#[derive(Debug, Error)]
pub enum NativeError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("build command `{command}` failed: status={status}\n{output}")]
    BuildFailed {
        command: String,
        status: String,
        output: String,
    },
    #[error("artifact not found: {}", path.display())]
    ArtifactMissing { path: PathBuf },
    #[error("native tokenizer failed: status={status}, stderr={stderr}")]
    ExecutionFailed { status: String, stderr: String },
    #[error("{label} timed out after {timeout_ms}ms")]
    Timeout { label: String, timeout_ms: u64 },
    #[error("{label} {stream} exceeds max bytes: max={max_bytes}")]
    OutputOverflow {
        label: String,
        stream: &'static str,
        max_bytes: usize,
    },
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
