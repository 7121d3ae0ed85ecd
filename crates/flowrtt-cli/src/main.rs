use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use flowrtt_core::{CaptureDump, TrackerConfig};
use glob::glob;
use log::{LevelFilter, debug};

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("FLOWRTT_BUILD_COMMIT"),
    " ",
    env!("FLOWRTT_BUILD_DATE"),
    ")"
);

const EXAMPLES: &str = "Examples:\n  flowrtt pcap analyse capture.pcapng -o report.json\n  flowrtt pcap analyze capture.pcap --stdout --pretty\n  flowrtt pcap analyse 'captures/*.pcapng' -o report.json --config tracker.json\n  flowrtt pcap analyse capture.pcap --stdout --capture segments.txt --dump-payload";

#[derive(Parser, Debug)]
#[command(name = "flowrtt")]
#[command(version = VERSION)]
#[command(
    about = "Passive TCP session tracker: round-trip times, throughput and HTTP exchanges from captures.",
    long_about = None,
    after_help = EXAMPLES
)]
struct Cli {
    /// Log level (error, warn, info, debug, trace); overrides RUST_LOG
    #[arg(long, global = true)]
    log_level: Option<LevelFilter>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Operations on PCAP/PCAPNG inputs.
    Pcap {
        #[command(subcommand)]
        command: PcapCommands,
    },
}

#[derive(Subcommand, Debug)]
enum PcapCommands {
    /// Track every TCP session of a capture and write a versioned JSON report.
    #[command(alias = "analyze")]
    #[command(after_help = EXAMPLES)]
    Analyse {
        /// Path (or glob pattern) to a .pcap or .pcapng file
        input: PathBuf,

        /// Output report path (JSON)
        #[arg(short = 'o', long, required_unless_present = "stdout")]
        report: Option<PathBuf>,

        /// Write JSON report to stdout
        #[arg(long, conflicts_with = "report")]
        stdout: bool,

        /// Pretty-print JSON output
        #[arg(long, conflicts_with = "compact")]
        pretty: bool,

        /// Compact JSON output (default)
        #[arg(long)]
        compact: bool,

        /// Suppress non-error output
        #[arg(long)]
        quiet: bool,

        /// Tracker configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Write a one-line dump of every TCP segment to this file
        #[arg(long, value_name = "FILE")]
        capture: Option<PathBuf>,

        /// Include a hex view of payloads in the capture dump
        #[arg(long, requires = "capture")]
        dump_payload: bool,
    },
}

struct AnalyseArgs {
    input: PathBuf,
    report: Option<PathBuf>,
    stdout: bool,
    pretty: bool,
    compact: bool,
    quiet: bool,
    config: Option<PathBuf>,
    capture: Option<PathBuf>,
    dump_payload: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Pcap { command } => match command {
            PcapCommands::Analyse {
                input,
                report,
                stdout,
                pretty,
                compact,
                quiet,
                config,
                capture,
                dump_payload,
            } => {
                init_logging(cli.log_level, quiet);
                cmd_pcap_analyse(AnalyseArgs {
                    input,
                    report,
                    stdout,
                    pretty,
                    compact,
                    quiet,
                    config,
                    capture,
                    dump_payload,
                })
            }
        },
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", err.message);
            if let Some(hint) = err.hint {
                eprintln!("hint: {}", hint);
            }
            ExitCode::from(2)
        }
    }
}

/// `warn` by default, `RUST_LOG` when set, `--log-level` above both.
/// `--quiet` caps an implicit level at `error`.
fn init_logging(level: Option<LevelFilter>, quiet: bool) {
    let default = if quiet { "error" } else { "warn" };
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default));
    if let Some(level) = level {
        builder.filter_level(level);
    }
    builder.format_target(false);
    let _ = builder.try_init();
}

#[derive(Debug)]
struct CliError {
    message: String,
    hint: Option<String>,
}

impl CliError {
    fn new(message: impl Into<String>, hint: Option<String>) -> Self {
        Self {
            message: message.into(),
            hint,
        }
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

impl From<anyhow::Error> for CliError {
    fn from(err: anyhow::Error) -> Self {
        CliError::new(format!("{:#}", err), None)
    }
}

fn cmd_pcap_analyse(args: AnalyseArgs) -> Result<(), CliError> {
    if args.pretty && args.compact {
        return Err(CliError::new(
            "cannot use --pretty and --compact together",
            Some("choose one output format".to_string()),
        ));
    }

    let resolved_input = resolve_input_path(&args.input)?;
    validate_input_file(&resolved_input)?;
    let input_abs = fs::canonicalize(&resolved_input)
        .with_context(|| format!("Failed to resolve input path: {}", resolved_input.display()))?;

    let report = if args.stdout {
        None
    } else {
        Some(args.report.clone().ok_or_else(|| {
            CliError::new(
                "missing output path",
                Some("use -o/--report or --stdout".to_string()),
            )
        })?)
    };
    if let Some(report_path) = report.as_ref() {
        ensure_distinct_output("report", report_path, &input_abs)?;
    }
    if let Some(capture_path) = args.capture.as_ref() {
        ensure_distinct_output("capture dump", capture_path, &input_abs)?;
    }

    let config = load_config(args.config.as_deref())?;
    debug!("tracker configuration: {:?}", config);

    let rep = match args.capture.as_ref() {
        Some(capture_path) => {
            let dump = CaptureDump::create(capture_path, args.dump_payload).with_context(|| {
                format!("Failed to create capture dump: {}", capture_path.display())
            })?;
            flowrtt_core::analyze_pcap_file_with_dump(&resolved_input, &config, Arc::new(dump))
        }
        None => flowrtt_core::analyze_pcap_file(&resolved_input, &config),
    }
    .context("PCAP/PCAPNG analysis failed")?;
    let json = serialize_report(&rep, args.pretty)?;

    let Some(report) = report else {
        print!("{}", json);
        return Ok(());
    };

    if let Some(parent) = report.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create output directory: {}", parent.display())
            })?;
        }
    }
    fs::write(&report, json)
        .with_context(|| format!("Failed to write report: {}", report.display()))?;

    if !args.quiet {
        eprintln!(
            "OK: report written -> {} ({} sessions, {} exchanges)",
            report.display(),
            rep.sessions.len(),
            rep.exchanges.len()
        );
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<TrackerConfig, CliError> {
    let Some(path) = path else {
        return Ok(TrackerConfig::default());
    };
    TrackerConfig::from_path(path).map_err(|err| {
        CliError::new(
            format!("invalid configuration {}: {}", path.display(), err),
            Some("expected a JSON object such as {\"idle_timeout_secs\": 120}".to_string()),
        )
    })
}

fn ensure_distinct_output(
    what: &str,
    report_path: &Path,
    input_abs: &Path,
) -> Result<(), CliError> {
    let report_dir = match report_path.parent() {
        Some(parent) if parent.as_os_str().is_empty() => fs::canonicalize("."),
        Some(parent) => fs::canonicalize(parent),
        None => return Ok(()),
    };
    // A missing output directory cannot contain the input.
    let Ok(report_dir) = report_dir else {
        return Ok(());
    };
    let file_name = report_path
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("Invalid report path: {}", report_path.display()))?;
    if report_dir.join(file_name) == input_abs {
        return Err(CliError::new(
            format!(
                "{} path must differ from input: {}",
                what,
                report_path.display()
            ),
            Some("choose a different output path".to_string()),
        ));
    }
    Ok(())
}

fn serialize_report(rep: &flowrtt_core::Report, pretty: bool) -> Result<String, CliError> {
    let json = if pretty {
        serde_json::to_string_pretty(rep)
    } else {
        serde_json::to_string(rep)
    };
    json.context("JSON serialization failed").map_err(Into::into)
}

fn validate_input_file(input: &Path) -> Result<(), CliError> {
    if !input.exists() {
        return Err(CliError::new(
            format!("input file not found: {}", input.display()),
            Some("use a .pcap or .pcapng file".to_string()),
        ));
    }
    if !input.is_file() {
        return Err(CliError::new(
            format!("input is not a file: {}", input.display()),
            Some("use a .pcap or .pcapng file".to_string()),
        ));
    }
    let ext = input
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    if ext != "pcap" && ext != "pcapng" {
        return Err(CliError::new(
            format!("unsupported input format '{}'", input.display()),
            Some("expected a .pcap or .pcapng file".to_string()),
        ));
    }
    Ok(())
}

fn resolve_input_path(input: &Path) -> Result<PathBuf, CliError> {
    let pattern = input.to_string_lossy();
    if !is_glob_pattern(&pattern) {
        return Ok(input.to_path_buf());
    }

    let paths = glob(&pattern).map_err(|err| {
        CliError::new(
            format!("invalid input pattern '{}'", pattern),
            Some(format!("pattern error: {}", err.msg)),
        )
    })?;
    let mut matches = Vec::new();
    for entry in paths {
        let path = entry.map_err(|err| {
            CliError::new(
                format!("invalid input pattern '{}'", pattern),
                Some(format!("pattern error: {}", err)),
            )
        })?;
        if path.is_file() {
            matches.push(path);
        }
    }

    match matches.len() {
        0 => Err(CliError::new(
            format!("no files match pattern '{}'", pattern),
            Some("check the path or quote the pattern; expected .pcap or .pcapng".to_string()),
        )),
        1 => Ok(matches.remove(0)),
        count => {
            let mut listed = matches
                .iter()
                .take(3)
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ");
            if count > 3 {
                listed.push_str(", ...");
            }
            Err(CliError::new(
                format!(
                    "multiple files match pattern '{}' ({} matches); matches: {}",
                    pattern, count, listed
                ),
                Some("pass a single capture file, or run once per file".to_string()),
            ))
        }
    }
}

fn is_glob_pattern(input: &str) -> bool {
    input.contains('*') || input.contains('?') || input.contains('[')
}
