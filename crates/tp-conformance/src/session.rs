use std::time::Instant;

use serde::{Deserialize, Serialize};
use tp_native::{ArtifactBuilder, BuildArtifact, CaptureLimits, NativeError, NativeRunner};
use tp_reference::ReferenceTokenizer;
use tp_types::{CaseId, InputCase};

use crate::diagnostics::{Comparison, MismatchReport, compare, explain};
use crate::discovery::FixtureFile;
use crate::{HarnessConfig, HarnessError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Pass,
    Fail,
}

/// Why a single case failed. None of these abort the suite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CaseFailure {
    /// Fixture could not be read (I/O, invalid UTF-8).
    Fixture { message: String },
    /// Native process failed, timed out or overflowed its capture.
    Execution { message: String },
    /// Native token section was malformed.
    Protocol { message: String },
    /// Reference encode failed for this input.
    Reference { message: String },
    Mismatch { report: Box<MismatchReport> },
}

impl CaseFailure {
    fn from_native(err: NativeError) -> Self {
        match err {
            NativeError::Protocol(err) => Self::Protocol {
                message: err.to_string(),
            },
            other => Self::Execution {
                message: other.to_string(),
            },
        }
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Fixture { .. } => "fixture error",
            Self::Execution { .. } => "execution error",
            Self::Protocol { .. } => "protocol error",
            Self::Reference { .. } => "reference error",
            Self::Mismatch { .. } => "token mismatch",
        }
    }

    #[must_use]
    pub fn render_plain(&self) -> String {
        match self {
            Self::Fixture { message }
            | Self::Execution { message }
            | Self::Protocol { message }
            | Self::Reference { message } => format!("{}: {message}\n", self.label()),
            Self::Mismatch { report } => report.render_plain(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseResult {
    pub case_id: CaseId,
    pub file_name: String,
    pub status: CaseStatus,
    pub native_tokens: Option<usize>,
    pub reference_tokens: Option<usize>,
    pub failure: Option<CaseFailure>,
    pub elapsed_ms: u64,
}

impl CaseResult {
    #[must_use]
    pub fn passed(&self) -> bool {
        matches!(self.status, CaseStatus::Pass)
    }
}

/// Session-scoped state shared read-only by every case: the artifact built
/// once in [`Session::setup`] and the reference tokenizer.
pub struct Session<'r> {
    artifact: BuildArtifact,
    reference: &'r dyn ReferenceTokenizer,
    limits: CaptureLimits,
}

impl<'r> Session<'r> {
    /// Build the native artifact (or adopt a prebuilt one). A build failure
    /// is fatal: no session, no cases.
    pub fn setup(
        config: &HarnessConfig,
        reference: &'r dyn ReferenceTokenizer,
    ) -> Result<Self, HarnessError> {
        let artifact = match &config.prebuilt_artifact {
            Some(path) => BuildArtifact::prebuilt(config.resolve(path)),
            None => ArtifactBuilder::new(&config.work_dir, config.build.clone())
                .with_limits(config.build_limits)
                .prepare(),
        }
        .map_err(HarnessError::Build)?;

        Ok(Self {
            artifact,
            reference,
            limits: config.limits,
        })
    }

    #[must_use]
    pub fn artifact(&self) -> &BuildArtifact {
        &self.artifact
    }

    #[must_use]
    pub fn reference_name(&self) -> &str {
        self.reference.name()
    }

    /// Read, run both tokenizers, compare. Every failure is captured in the
    /// returned record.
    pub fn run_fixture(&self, fixture: &FixtureFile) -> CaseResult {
        let started = Instant::now();
        let mut result = match fixture.load() {
            Ok(case) => self.run_case(&case),
            Err(err) => CaseResult {
                case_id: fixture.id.clone(),
                file_name: fixture.file_name.clone(),
                status: CaseStatus::Fail,
                native_tokens: None,
                reference_tokens: None,
                failure: Some(CaseFailure::Fixture {
                    message: err.to_string(),
                }),
                elapsed_ms: 0,
            },
        };
        result.elapsed_ms = started.elapsed().as_millis() as u64;
        result
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(case = %case.id)))]
    pub fn run_case(&self, case: &InputCase) -> CaseResult {
        let started = Instant::now();
        let mut result = CaseResult {
            case_id: case.id.clone(),
            file_name: case.file_name.clone(),
            status: CaseStatus::Fail,
            native_tokens: None,
            reference_tokens: None,
            failure: None,
            elapsed_ms: 0,
        };

        let failure = self.evaluate(case, &mut result);
        result.status = if failure.is_none() {
            CaseStatus::Pass
        } else {
            CaseStatus::Fail
        };
        result.failure = failure;
        result.elapsed_ms = started.elapsed().as_millis() as u64;

        #[cfg(feature = "tracing")]
        tracing::info!(status = ?result.status, elapsed_ms = result.elapsed_ms, "case finished");
        result
    }

    fn evaluate(&self, case: &InputCase, result: &mut CaseResult) -> Option<CaseFailure> {
        let runner = NativeRunner::new(&self.artifact, self.limits);
        let stream = match runner.run(&case.text) {
            Ok(stream) => stream,
            Err(err) => return Some(CaseFailure::from_native(err)),
        };
        result.native_tokens = Some(stream.tokens.len());

        let expected = match self.reference.encode(&case.text) {
            Ok(expected) => expected,
            Err(err) => {
                return Some(CaseFailure::Reference {
                    message: err.to_string(),
                });
            }
        };
        result.reference_tokens = Some(expected.len());

        match compare(&stream.tokens, &expected) {
            Comparison::Match => None,
            Comparison::Mismatch(_) => {
                let report = explain(self.reference, &case.text, &stream.tokens, &expected)
                    .with_framing(stream.framing);
                Some(CaseFailure::Mismatch {
                    report: Box::new(report),
                })
            }
        }
    }

    /// Remove the artifact. Returns a warning if removal failed.
    pub fn teardown(self) -> Option<String> {
        let warning = self.artifact.teardown();
        #[cfg(feature = "tracing")]
        if let Some(warning) = &warning {
            tracing::warn!(%warning, "artifact teardown");
        }
        warning
    }
}
