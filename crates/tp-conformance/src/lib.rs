#![forbid(unsafe_code)]

pub mod diagnostics;
pub mod discovery;
pub mod session;

use std::fs;
use std::fmt::Write as _;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tp_native::{BuildCommand, CaptureLimits, NativeError};
use tp_reference::{ReferenceError, ReferenceTokenizer};
use tp_types::TypeError;

pub use diagnostics::{
    CONTEXT_RADIUS, Comparison, DecodeOutcome, Divergence, MismatchReport, TokenProbe, compare,
    context_window, explain, first_divergence,
};
pub use discovery::{FixtureFile, discover_fixtures};
pub use session::{CaseFailure, CaseResult, CaseStatus, Session};

pub const SUITE_NAME: &str = "tokenizer_parity";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Directory the build runs in; relative paths below resolve against it.
    pub work_dir: PathBuf,
    pub fixture_root: PathBuf,
    pub fixture_extension: String,
    pub reference_tokenizer: PathBuf,
    pub add_special_tokens: bool,
    pub build: BuildCommand,
    /// Skip the build and run this executable instead. Never deleted.
    pub prebuilt_artifact: Option<PathBuf>,
    /// Bounds for each native run.
    pub limits: CaptureLimits,
    /// Bounds for the one-off build.
    pub build_limits: CaptureLimits,
    pub artifact_root: PathBuf,
}

impl HarnessConfig {
    #[must_use]
    pub fn default_paths() -> Self {
        Self {
            work_dir: PathBuf::from("."),
            fixture_root: PathBuf::from("tests/input_texts"),
            fixture_extension: "txt".to_owned(),
            reference_tokenizer: PathBuf::from("tokenizer.json"),
            add_special_tokens: true,
            build: BuildCommand::gxx_default(),
            prebuilt_artifact: None,
            limits: CaptureLimits::default(),
            build_limits: CaptureLimits::for_build(),
            artifact_root: PathBuf::from("artifacts/tokparity"),
        }
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, HarnessError> {
        let body = fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&body)?)
    }

    #[must_use]
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.work_dir.join(path)
        }
    }

    #[must_use]
    pub fn fixture_dir(&self) -> PathBuf {
        self.resolve(&self.fixture_root)
    }

    #[must_use]
    pub fn reference_path(&self) -> PathBuf {
        self.resolve(&self.reference_tokenizer)
    }

    #[must_use]
    pub fn artifact_output_root(&self) -> PathBuf {
        self.resolve(&self.artifact_root)
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::default_paths()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SuiteOptions {
    /// Run only cases whose id or file name contains this substring.
    pub case_filter: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParityReport {
    pub suite: String,
    pub reference: String,
    pub artifact: PathBuf,
    pub fixture_count: usize,
    pub passed: usize,
    pub failed: usize,
    pub results: Vec<CaseResult>,
    #[serde(default)]
    pub teardown_warning: Option<String>,
}

impl ParityReport {
    /// At least one case ran and none failed.
    #[must_use]
    pub fn is_green(&self) -> bool {
        self.failed == 0 && self.fixture_count > 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &CaseResult> {
        self.results.iter().filter(|result| !result.passed())
    }

    #[must_use]
    pub fn render_summary(&self) -> String {
        let verdict = if self.is_green() {
            "OK".to_owned()
        } else if self.fixture_count == 0 {
            "FAILED (no fixtures ran)".to_owned()
        } else {
            format!("FAILED (failures={})", self.failed)
        };
        format!(
            "Ran {} tests: passed={} failed={}\n\n{verdict}",
            self.fixture_count, self.passed, self.failed
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WrittenArtifacts {
    pub parity_report_path: PathBuf,
    pub mismatch_corpus_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftHistoryEntry {
    pub ts_unix_ms: u64,
    pub suite: String,
    pub reference: String,
    pub fixture_count: usize,
    pub passed: usize,
    pub failed: usize,
    pub green: bool,
    pub report_hash: String,
}

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
    #[error(transparent)]
    Type(#[from] TypeError),
    #[error(
        "fixture directory {} did not exist and was created; add .{extension} input files to it and rerun",
        path.display()
    )]
    FixturesCreated { path: PathBuf, extension: String },
    #[error("reference tokenizer unavailable: {0}")]
    Reference(#[from] ReferenceError),
    #[error(transparent)]
    Build(NativeError),
}

pub fn run_suite(
    config: &HarnessConfig,
    reference: &dyn ReferenceTokenizer,
    options: &SuiteOptions,
) -> Result<ParityReport, HarnessError> {
    run_suite_with(config, reference, options, |_| {})
}

/// Discover fixtures, build once, run every case in order, tear down.
/// `on_case` observes each result as soon as it is recorded.
///
/// Fatal errors (missing fixture directory, build failure) return `Err`
/// before any case runs; per-case failures are recorded in the report.
pub fn run_suite_with(
    config: &HarnessConfig,
    reference: &dyn ReferenceTokenizer,
    options: &SuiteOptions,
    mut on_case: impl FnMut(&CaseResult),
) -> Result<ParityReport, HarnessError> {
    let fixtures = discover_fixtures(&config.fixture_dir(), &config.fixture_extension)?
        .into_iter()
        .filter(|fixture| {
            options
                .case_filter
                .as_deref()
                .is_none_or(|filter| fixture.matches_filter(filter))
        })
        .collect::<Vec<_>>();

    #[cfg(feature = "tracing")]
    tracing::info!(fixtures = fixtures.len(), "building native artifact");

    let session = Session::setup(config, reference)?;
    let artifact = session.artifact().path().to_path_buf();

    let mut results = Vec::with_capacity(fixtures.len());
    for fixture in &fixtures {
        let result = session.run_fixture(fixture);
        on_case(&result);
        results.push(result);
    }
    let teardown_warning = session.teardown();

    let failed = results.iter().filter(|result| !result.passed()).count();
    Ok(ParityReport {
        suite: SUITE_NAME.to_owned(),
        reference: reference.name().to_owned(),
        artifact,
        fixture_count: results.len(),
        passed: results.len().saturating_sub(failed),
        failed,
        results,
        teardown_warning,
    })
}

pub fn write_report_artifacts(
    config: &HarnessConfig,
    report: &ParityReport,
) -> Result<WrittenArtifacts, HarnessError> {
    let root = config.artifact_output_root();
    fs::create_dir_all(&root)?;

    let parity_report_path = root.join("parity_report.json");
    fs::write(&parity_report_path, serde_json::to_string_pretty(report)?)?;

    let mismatch_corpus_path = root.join("parity_mismatch_corpus.json");
    let mismatches = report.failures().cloned().collect::<Vec<_>>();
    let mismatch_payload = serde_json::json!({
        "suite": report.suite,
        "mismatch_count": mismatches.len(),
        "mismatches": mismatches,
    });
    fs::write(
        &mismatch_corpus_path,
        serde_json::to_string_pretty(&mismatch_payload)?,
    )?;

    Ok(WrittenArtifacts {
        parity_report_path,
        mismatch_corpus_path,
    })
}

pub fn append_drift_history(
    config: &HarnessConfig,
    report: &ParityReport,
) -> Result<PathBuf, HarnessError> {
    let history_path = config.artifact_output_root().join("drift_history.jsonl");
    if let Some(parent) = history_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&history_path)?;

    let report_json = serde_json::to_vec(report)?;
    let entry = DriftHistoryEntry {
        ts_unix_ms: now_unix_ms(),
        suite: report.suite.clone(),
        reference: report.reference.clone(),
        fixture_count: report.fixture_count,
        passed: report.passed,
        failed: report.failed,
        green: report.is_green(),
        report_hash: format!("sha256:{}", hash_bytes(&report_json)),
    };
    writeln!(file, "{}", serde_json::to_string(&entry)?)?;

    Ok(history_path)
}

fn hash_bytes(bytes: &[u8]) -> String {
    Sha256::digest(bytes).iter().fold(String::with_capacity(64), |mut out, byte| {
        let _ = write!(out, "{byte:02x}");
        out
    })
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use tp_native::CaptureLimits;
    use tp_types::CaseId;

    use super::{
        CaseFailure, CaseResult, CaseStatus, HarnessConfig, ParityReport, append_drift_history,
        write_report_artifacts,
    };

    fn report(failed: usize) -> ParityReport {
        let mut results = vec![CaseResult {
            case_id: CaseId::for_fixture(1, "a.txt").expect("id"),
            file_name: "a.txt".to_owned(),
            status: CaseStatus::Pass,
            native_tokens: Some(2),
            reference_tokens: Some(2),
            failure: None,
            elapsed_ms: 3,
        }];
        for idx in 0..failed {
            results.push(CaseResult {
                case_id: CaseId::for_fixture(idx + 2, "b.txt").expect("id"),
                file_name: "b.txt".to_owned(),
                status: CaseStatus::Fail,
                native_tokens: None,
                reference_tokens: None,
                failure: Some(CaseFailure::Execution {
                    message: "native tokenizer failed".to_owned(),
                }),
                elapsed_ms: 1,
            });
        }
        ParityReport {
            suite: super::SUITE_NAME.to_owned(),
            reference: "mock".to_owned(),
            artifact: PathBuf::from("./tokenizer"),
            fixture_count: results.len(),
            passed: 1,
            failed,
            results,
            teardown_warning: None,
        }
    }

    #[test]
    fn default_config_mirrors_gxx_layout() {
        let cfg = HarnessConfig::default_paths();
        assert_eq!(cfg.fixture_dir(), PathBuf::from("./tests/input_texts"));
        assert_eq!(cfg.reference_path(), PathBuf::from("./tokenizer.json"));
        assert_eq!(cfg.build.artifact, PathBuf::from("tokenizer"));
        assert!(cfg.add_special_tokens);
    }

    #[test]
    fn yaml_config_overrides_only_given_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tokparity.yaml");
        fs::write(
            &path,
            "work_dir: /srv/tok\nfixture_root: corpus\nlimits:\n  timeout_ms: 500\n",
        )
        .expect("write");

        let cfg = HarnessConfig::from_yaml_file(&path).expect("config");
        assert_eq!(cfg.fixture_dir(), PathBuf::from("/srv/tok/corpus"));
        assert_eq!(cfg.limits.timeout_ms, 500);
        assert_eq!(
            cfg.limits.max_stdout_bytes,
            HarnessConfig::default_paths().limits.max_stdout_bytes
        );
        assert_eq!(cfg.fixture_extension, "txt");
    }

    #[test]
    fn yaml_build_section_defaults_artifact_and_limits() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tokparity.yaml");
        fs::write(
            &path,
            "build:\n  program: make\n  args: [tokenizer]\nbuild_limits:\n  timeout_ms: 90000\n",
        )
        .expect("write");

        let cfg = HarnessConfig::from_yaml_file(&path).expect("config");
        assert_eq!(cfg.build.program, "make");
        assert_eq!(cfg.build.args, vec!["tokenizer".to_owned()]);
        assert_eq!(cfg.build.artifact, PathBuf::from("tokenizer"));
        assert_eq!(cfg.build_limits.timeout_ms, 90_000);
        assert_eq!(
            cfg.build_limits.max_stderr_bytes,
            CaptureLimits::default().max_stderr_bytes
        );
        assert_eq!(cfg.limits, CaptureLimits::default());
    }

    #[test]
    fn report_hash_is_lowercase_sha256_hex() {
        assert_eq!(
            super::hash_bytes(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn green_requires_cases_and_no_failures() {
        assert!(report(0).is_green());
        assert!(!report(1).is_green());

        let mut empty = report(0);
        empty.results.clear();
        empty.fixture_count = 0;
        empty.passed = 0;
        assert!(!empty.is_green());
        assert!(empty.render_summary().contains("no fixtures ran"));
    }

    #[test]
    fn summary_counts_failures() {
        let summary = report(2).render_summary();
        assert!(summary.starts_with("Ran 3 tests"), "{summary}");
        assert!(summary.ends_with("FAILED (failures=2)"), "{summary}");
    }

    #[test]
    fn artifacts_include_only_failed_cases_in_corpus() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = HarnessConfig {
            work_dir: dir.path().to_path_buf(),
            ..HarnessConfig::default_paths()
        };
        let written = write_report_artifacts(&cfg, &report(1)).expect("write");

        let corpus: serde_json::Value = serde_json::from_str(
            &fs::read_to_string(&written.mismatch_corpus_path).expect("read"),
        )
        .expect("json");
        assert_eq!(corpus["mismatch_count"], 1);
        assert_eq!(corpus["mismatches"][0]["failure"]["kind"], "execution");

        let parity: ParityReport = serde_json::from_str(
            &fs::read_to_string(&written.parity_report_path).expect("read"),
        )
        .expect("json");
        assert_eq!(parity, report(1));
    }

    #[test]
    fn drift_history_appends_hashed_rows() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = HarnessConfig {
            work_dir: dir.path().to_path_buf(),
            ..HarnessConfig::default_paths()
        };
        append_drift_history(&cfg, &report(0)).expect("first");
        let path = append_drift_history(&cfg, &report(1)).expect("second");

        let contents = fs::read_to_string(path).expect("history");
        let rows: Vec<serde_json::Value> = contents
            .lines()
            .map(|line| serde_json::from_str(line).expect("json row"))
            .collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["green"], true);
        assert_eq!(rows[1]["failed"], 1);
        assert!(
            rows[1]["report_hash"]
                .as_str()
                .is_some_and(|hash| hash.starts_with("sha256:"))
        );
    }
}
