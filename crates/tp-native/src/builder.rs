use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};

use crate::NativeError;
use crate::capture::{CaptureLimits, run_bounded};

/// Toolchain invocation that turns the native sources into an executable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Executable produced by the build, relative to the working directory.
    #[serde(default = "default_artifact")]
    pub artifact: PathBuf,
}

fn default_artifact() -> PathBuf {
    PathBuf::from("tokenizer")
}

impl BuildCommand {
    /// `g++ tokenizer.cpp -licuuc -o tokenizer`
    #[must_use]
    pub fn gxx_default() -> Self {
        Self {
            program: "g++".to_owned(),
            args: ["tokenizer.cpp", "-licuuc", "-o", "tokenizer"]
                .into_iter()
                .map(str::to_owned)
                .collect(),
            artifact: default_artifact(),
        }
    }

    #[must_use]
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Default for BuildCommand {
    fn default() -> Self {
        Self::gxx_default()
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactBuilder {
    work_dir: PathBuf,
    command: BuildCommand,
    limits: CaptureLimits,
}

impl ArtifactBuilder {
    #[must_use]
    pub fn new(work_dir: impl Into<PathBuf>, command: BuildCommand) -> Self {
        Self {
            work_dir: work_dir.into(),
            command,
            limits: CaptureLimits::for_build(),
        }
    }

    #[must_use]
    pub fn with_limits(mut self, limits: CaptureLimits) -> Self {
        self.limits = limits;
        self
    }

    #[must_use]
    pub fn artifact_path(&self) -> PathBuf {
        self.work_dir.join(&self.command.artifact)
    }

    /// Run the build once. A non-zero exit returns
    /// [`NativeError::BuildFailed`] carrying the toolchain output verbatim.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(skip_all, fields(command = %self.command.display()))
    )]
    pub fn prepare(&self) -> Result<BuildArtifact, NativeError> {
        let mut command = Command::new(&self.command.program);
        command.args(&self.command.args).current_dir(&self.work_dir);
        let output = run_bounded(&mut command, &self.limits, "build")?;

        if !output.status.success() {
            return Err(NativeError::BuildFailed {
                command: self.command.display(),
                status: output.status.to_string(),
                output: format!("{}{}", output.stdout, output.stderr),
            });
        }

        let path = self.artifact_path();
        if !path.is_file() {
            return Err(NativeError::ArtifactMissing { path });
        }

        #[cfg(feature = "tracing")]
        tracing::info!(artifact = %path.display(), "native artifact built");

        Ok(BuildArtifact {
            path,
            owned: true,
            removed: false,
        })
    }
}

/// Executable under test. Owned artifacts (produced by
/// [`ArtifactBuilder::prepare`]) are deleted on teardown or drop; prebuilt
/// ones are left alone.
#[derive(Debug)]
pub struct BuildArtifact {
    path: PathBuf,
    owned: bool,
    removed: bool,
}

impl BuildArtifact {
    pub fn prebuilt(path: impl Into<PathBuf>) -> Result<Self, NativeError> {
        let path = path.into();
        if !path.is_file() {
            return Err(NativeError::ArtifactMissing { path });
        }
        Ok(Self {
            path,
            owned: false,
            removed: false,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// Best-effort removal. Returns a warning when the file exists but
    /// cannot be deleted; an already-missing file is not an error.
    pub fn teardown(mut self) -> Option<String> {
        self.remove()
    }

    fn remove(&mut self) -> Option<String> {
        if !self.owned || self.removed {
            return None;
        }
        self.removed = true;
        match std::fs::remove_file(&self.path) {
            Ok(()) => None,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => Some(format!(
                "could not remove compiled artifact {}: {err}",
                self.path.display()
            )),
        }
    }
}

impl Drop for BuildArtifact {
    fn drop(&mut self) {
        let _ = self.remove();
    }
}
