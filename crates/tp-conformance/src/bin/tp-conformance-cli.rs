#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::process::ExitCode;

use tp_conformance::{
    CaseFailure, CaseResult, HarnessConfig, SuiteOptions, append_drift_history, run_suite_with,
    write_report_artifacts,
};
use tp_native::BuildCommand;
use tp_reference::HfReference;

#[derive(Debug, Clone, Default)]
struct CliArgs {
    config: Option<PathBuf>,
    work_dir: Option<PathBuf>,
    fixtures: Option<PathBuf>,
    reference: Option<PathBuf>,
    artifact: Option<PathBuf>,
    build: Option<Vec<String>>,
    build_artifact: Option<PathBuf>,
    timeout_ms: Option<u64>,
    build_timeout_ms: Option<u64>,
    filter: Option<String>,
    no_special_tokens: bool,
    write_artifacts: bool,
    write_drift_history: bool,
    quiet: bool,
}

fn main() -> ExitCode {
    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(error) => {
            eprintln!("tp-conformance-cli error: {error}");
            ExitCode::from(2)
        }
    }
}

fn run() -> Result<bool, Box<dyn std::error::Error>> {
    let Some(args) = parse_args()? else {
        print_help();
        return Ok(true);
    };

    #[cfg(feature = "tracing")]
    init_tracing();

    let config = build_config(&args)?;
    let reference = HfReference::from_file(&config.reference_path(), config.add_special_tokens)?;
    let options = SuiteOptions {
        case_filter: args.filter.clone(),
    };

    let report = run_suite_with(&config, &reference, &options, |result| {
        print_case(result, args.quiet);
    })?;

    println!("{}", "-".repeat(70));
    println!("{}", report.render_summary());
    if let Some(warning) = &report.teardown_warning {
        eprintln!("warning: {warning}");
    }

    if args.write_artifacts {
        let written = write_report_artifacts(&config, &report)?;
        println!(
            "wrote parity={} mismatch_corpus={}",
            written.parity_report_path.display(),
            written.mismatch_corpus_path.display()
        );
    }
    if args.write_artifacts || args.write_drift_history {
        let history_path = append_drift_history(&config, &report)?;
        println!("wrote drift_history={}", history_path.display());
    }

    Ok(report.is_green())
}

fn print_case(result: &CaseResult, quiet: bool) {
    let Some(failure) = &result.failure else {
        if !quiet {
            println!("{} ... ok", result.case_id);
        }
        return;
    };

    println!("{} ... FAIL", result.case_id);
    match failure {
        CaseFailure::Mismatch { .. } => println!("Mismatch in file: {}", result.file_name),
        _ => println!("Failed file: {}", result.file_name),
    }
    print!("{}", failure.render_plain());
    println!();
}

fn build_config(args: &CliArgs) -> Result<HarnessConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => HarnessConfig::from_yaml_file(path)?,
        None => HarnessConfig::default_paths(),
    };

    if let Some(work_dir) = &args.work_dir {
        config.work_dir = work_dir.clone();
    }
    if let Some(fixtures) = &args.fixtures {
        config.fixture_root = fixtures.clone();
    }
    if let Some(reference) = &args.reference {
        config.reference_tokenizer = reference.clone();
    }
    if let Some(artifact) = &args.artifact {
        config.prebuilt_artifact = Some(artifact.clone());
    }
    if let Some(words) = &args.build {
        let (program, rest) = words.split_first().ok_or("--build requires a command")?;
        config.build = BuildCommand {
            program: program.clone(),
            args: rest.to_vec(),
            artifact: config.build.artifact.clone(),
        };
    }
    if let Some(build_artifact) = &args.build_artifact {
        config.build.artifact = build_artifact.clone();
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.limits.timeout_ms = timeout_ms;
    }
    if let Some(build_timeout_ms) = args.build_timeout_ms {
        config.build_limits.timeout_ms = build_timeout_ms;
    }
    if args.no_special_tokens {
        config.add_special_tokens = false;
    }
    Ok(config)
}

/// `Ok(None)` means help was requested.
fn parse_args() -> Result<Option<CliArgs>, Box<dyn std::error::Error>> {
    let mut parsed = CliArgs::default();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let value = args.next().ok_or("--config requires a path")?;
                parsed.config = Some(PathBuf::from(value));
            }
            "--work-dir" => {
                let value = args.next().ok_or("--work-dir requires a path")?;
                parsed.work_dir = Some(PathBuf::from(value));
            }
            "--fixtures" => {
                let value = args.next().ok_or("--fixtures requires a path")?;
                parsed.fixtures = Some(PathBuf::from(value));
            }
            "--reference" => {
                let value = args.next().ok_or("--reference requires a tokenizer.json path")?;
                parsed.reference = Some(PathBuf::from(value));
            }
            "--artifact" => {
                let value = args.next().ok_or("--artifact requires a path")?;
                parsed.artifact = Some(PathBuf::from(value));
            }
            "--build" => {
                let value = args
                    .next()
                    .ok_or("--build requires a command (e.g. \"make tokenizer\")")?;
                let words = value.split_whitespace().map(str::to_owned).collect::<Vec<_>>();
                if words.is_empty() {
                    return Err("--build requires a non-empty command".into());
                }
                parsed.build = Some(words);
            }
            "--build-artifact" => {
                let value = args.next().ok_or("--build-artifact requires a path")?;
                parsed.build_artifact = Some(PathBuf::from(value));
            }
            "--timeout-ms" => {
                let value = args.next().ok_or("--timeout-ms requires a value")?;
                let timeout_ms = value
                    .parse::<u64>()
                    .map_err(|err| format!("invalid --timeout-ms {value:?}: {err}"))?;
                parsed.timeout_ms = Some(timeout_ms);
            }
            "--build-timeout-ms" => {
                let value = args.next().ok_or("--build-timeout-ms requires a value")?;
                let build_timeout_ms = value
                    .parse::<u64>()
                    .map_err(|err| format!("invalid --build-timeout-ms {value:?}: {err}"))?;
                parsed.build_timeout_ms = Some(build_timeout_ms);
            }
            "--filter" => {
                let value = args.next().ok_or("--filter requires a substring")?;
                parsed.filter = Some(value);
            }
            "--no-special-tokens" => {
                parsed.no_special_tokens = true;
            }
            "--write-artifacts" => {
                parsed.write_artifacts = true;
            }
            "--write-drift-history" => {
                parsed.write_drift_history = true;
            }
            "--quiet" | "-q" => {
                parsed.quiet = true;
            }
            "--help" | "-h" => return Ok(None),
            other => return Err(format!("unknown argument: {other}").into()),
        }
    }

    Ok(Some(parsed))
}

#[cfg(feature = "tracing")]
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn print_help() {
    println!(
        "tp-conformance-cli\n\
         Usage:\n\
         \ttp-conformance-cli [--config tokparity.yaml] [--work-dir <dir>] [--filter <substr>] [--write-artifacts]\n\
         Options:\n\
         \t--config <path>          YAML harness config (defaults apply to omitted fields)\n\
         \t--work-dir <dir>         Directory the build runs in; relative paths resolve against it\n\
         \t--fixtures <dir>         Fixture directory (default: tests/input_texts)\n\
         \t--reference <path>       Reference tokenizer.json (default: tokenizer.json)\n\
         \t--artifact <path>        Run a prebuilt native tokenizer instead of building; never deleted\n\
         \t--build \"<cmd>\"          Build command, split on whitespace (default: g++ tokenizer.cpp -licuuc -o tokenizer)\n\
         \t--build-artifact <path>  Executable the build produces (default: tokenizer)\n\
         \t--timeout-ms <ms>        Per-case native run timeout\n\
         \t--build-timeout-ms <ms>  Build step timeout (default: 600000)\n\
         \t--filter <substr>        Run only cases whose id or file name contains <substr>\n\
         \t--no-special-tokens      Encode reference without special tokens\n\
         \t--write-artifacts        Write parity_report.json and parity_mismatch_corpus.json\n\
         \t--write-drift-history    Append a run summary row to drift_history.jsonl\n\
         \t-q, --quiet              Only print failing cases and the summary\n\
         \t-h, --help               Show this help\n\
         Exit codes:\n\
         \t0 all cases passed, 1 a case failed or none ran, 2 setup error"
    );
}
