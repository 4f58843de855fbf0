use std::io::Write;
use std::process::Command;

use tp_types::TokenSequence;

use crate::NativeError;
use crate::builder::BuildArtifact;
use crate::capture::{CaptureLimits, run_bounded};
use crate::protocol::{TokenStream, parse_token_section};

/// Runs the native artifact once per input: `artifact <input-file>`.
#[derive(Debug)]
pub struct NativeRunner<'a> {
    artifact: &'a BuildArtifact,
    limits: CaptureLimits,
}

impl<'a> NativeRunner<'a> {
    #[must_use]
    pub fn new(artifact: &'a BuildArtifact, limits: CaptureLimits) -> Self {
        Self { artifact, limits }
    }

    /// Write `input` to a uniquely named temporary file, invoke the artifact
    /// on it and parse the token section from stdout. The temporary file is
    /// removed on every return path.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(bytes = input.len())))]
    pub fn run(&self, input: &str) -> Result<TokenStream, NativeError> {
        let mut file = tempfile::Builder::new()
            .prefix("tp-input-")
            .suffix(".txt")
            .tempfile()?;
        file.write_all(input.as_bytes())?;
        file.flush()?;
        let input_path = file.into_temp_path();

        let mut command = Command::new(self.artifact.path());
        command.arg(input_path.as_os_str());
        let output = run_bounded(&mut command, &self.limits, "native tokenizer")?;

        if !output.status.success() {
            return Err(NativeError::ExecutionFailed {
                status: output.status.to_string(),
                stderr: output.stderr,
            });
        }

        let stream = parse_token_section(&output.stdout)?;
        #[cfg(feature = "tracing")]
        tracing::debug!(tokens = stream.tokens.len(), framing = ?stream.framing, "native run complete");
        Ok(stream)
    }

    pub fn run_tokens(&self, input: &str) -> Result<TokenSequence, NativeError> {
        self.run(input).map(|stream| stream.tokens)
    }
}
