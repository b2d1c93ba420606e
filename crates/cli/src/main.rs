mod config;
mod serve;

use std::path::{Path, PathBuf};
use std::process;

use ce_analyze::AnalysisReport;
use ce_core::{CrdtDocument, MergeOutcome, ScenarioDefinition};
use ce_interchange::{parse_request, MergeResponse};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use crate::config::{Config, FlagOverrides};

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Cause-and-effect test session sync and deviation analysis.
#[derive(Parser)]
#[command(
    name = "cesync",
    version,
    about = "Cause-and-effect test session sync and deviation analysis"
)]
struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP sync server
    Serve {
        /// Port to listen on (overrides the config file)
        #[arg(long, env = "CESYNC_PORT")]
        port: Option<u16>,
        /// Path to a TOML configuration file
        #[arg(long, env = "CESYNC_CONFIG")]
        config: Option<PathBuf>,
        /// Directory of scenario definition JSON files
        #[arg(long, env = "CESYNC_SCENARIOS_DIR")]
        scenarios: Option<PathBuf>,
        /// Path to TLS certificate PEM file (requires the `tls` feature)
        #[arg(long)]
        tls_cert: Option<PathBuf>,
        /// Path to TLS private key PEM file (requires the `tls` feature)
        #[arg(long)]
        tls_key: Option<PathBuf>,
    },

    /// Merge two session documents offline and report the result
    Merge {
        /// Path to the local session document JSON
        local: PathBuf,
        /// Path to the incoming session document JSON
        incoming: PathBuf,
        /// Path to the scenario definition JSON
        #[arg(long)]
        scenario: PathBuf,
    },

    /// Compare a session document against its scenario
    Analyze {
        /// Path to the session document JSON
        document: PathBuf,
        /// Path to the scenario definition JSON
        #[arg(long)]
        scenario: PathBuf,
    },

    /// Apply a device merge request to a session document offline
    Ingest {
        /// Path to the merge request JSON
        request: PathBuf,
        /// Path to the scenario definition JSON
        #[arg(long)]
        scenario: PathBuf,
        /// Existing session document to merge into (default: empty session)
        #[arg(long)]
        document: Option<PathBuf>,
    },
}

fn init_tracing(quiet: bool) {
    let default = if quiet { "warn" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.quiet);

    match cli.command {
        Commands::Serve {
            port,
            config,
            scenarios,
            tls_cert,
            tls_key,
        } => {
            cmd_serve(
                port,
                config.as_deref(),
                scenarios,
                tls_cert,
                tls_key,
                cli.output,
                cli.quiet,
            );
        }
        Commands::Merge {
            local,
            incoming,
            scenario,
        } => {
            cmd_merge(&local, &incoming, &scenario, cli.output, cli.quiet);
        }
        Commands::Analyze { document, scenario } => {
            cmd_analyze(&document, &scenario, cli.output, cli.quiet);
        }
        Commands::Ingest {
            request,
            scenario,
            document,
        } => {
            cmd_ingest(
                &request,
                &scenario,
                document.as_deref(),
                cli.output,
                cli.quiet,
            );
        }
    }
}

// ── Subcommands ───────────────────────────────────────────────────────────────

fn cmd_serve(
    port: Option<u16>,
    config_path: Option<&Path>,
    scenarios: Option<PathBuf>,
    tls_cert: Option<PathBuf>,
    tls_key: Option<PathBuf>,
    output: OutputFormat,
    quiet: bool,
) {
    // Both TLS flags or neither.
    if tls_cert.is_some() != tls_key.is_some() {
        report_error(
            "error: --tls-cert and --tls-key must both be provided",
            output,
            quiet,
        );
        process::exit(1);
    }

    let flags = FlagOverrides {
        port,
        scenarios_dir: scenarios,
    };
    let config = match Config::load(config_path, &flags) {
        Ok(c) => c,
        Err(e) => {
            report_error(&format!("config error: {}", e), output, quiet);
            process::exit(1);
        }
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            report_error(
                &format!("failed to create tokio runtime: {}", e),
                output,
                quiet,
            );
            process::exit(1);
        }
    };
    if let Err(e) = rt.block_on(serve::start_server(config, tls_cert, tls_key)) {
        report_error(&format!("server error: {}", e), output, quiet);
        process::exit(1);
    }
}

fn cmd_merge(
    local_path: &Path,
    incoming_path: &Path,
    scenario_path: &Path,
    output: OutputFormat,
    quiet: bool,
) {
    let scenario = load_scenario(scenario_path, output, quiet);
    let local = load_document(local_path, output, quiet);
    let incoming = load_document(incoming_path, output, quiet);

    let outcome = match ce_analyze::merge_engine(&scenario).merge(&local, &incoming) {
        Ok(o) => o,
        Err(e) => {
            report_error(&format!("merge failed: {}", e), output, quiet);
            process::exit(1);
        }
    };
    let report = ce_analyze::analyze(&scenario, &outcome.document);
    print_merge(&outcome, &report, output, quiet);
}

fn cmd_analyze(document_path: &Path, scenario_path: &Path, output: OutputFormat, quiet: bool) {
    let scenario = load_scenario(scenario_path, output, quiet);
    let document = load_document(document_path, output, quiet);
    if document.scenario_id != scenario.scenario_id {
        let msg = format!(
            "document '{}' runs scenario '{}', not '{}'",
            document.document_id, document.scenario_id, scenario.scenario_id
        );
        report_error(&msg, output, quiet);
        process::exit(1);
    }

    let report = ce_analyze::analyze(&scenario, &document);
    match output {
        OutputFormat::Json => print_json(&report, output, quiet),
        OutputFormat::Text => {
            if quiet {
                return;
            }
            print_report_text(&report);
        }
    }
}

fn cmd_ingest(
    request_path: &Path,
    scenario_path: &Path,
    document_path: Option<&Path>,
    output: OutputFormat,
    quiet: bool,
) {
    let scenario = load_scenario(scenario_path, output, quiet);
    let request = match parse_request(&read_json(request_path, output, quiet)) {
        Ok(r) => r,
        Err(e) => {
            report_error(&format!("invalid merge request: {}", e), output, quiet);
            process::exit(1);
        }
    };
    let validated = match request.validate() {
        Ok(v) => v,
        Err(e) => {
            report_error(&format!("invalid merge request: {}", e), output, quiet);
            process::exit(1);
        }
    };

    let local = match document_path {
        Some(path) => {
            let document = load_document(path, output, quiet);
            if let Err(e) = request.check_document(&document.document_id) {
                report_error(&e.to_string(), output, quiet);
                process::exit(1);
            }
            document
        }
        None => CrdtDocument::new(
            validated.document_id.clone(),
            scenario.scenario_id.clone(),
        ),
    };

    if let Err(e) = validated.check_sequence(&local) {
        report_error(&e.to_string(), output, quiet);
        process::exit(1);
    }
    let incoming = validated.to_document(&local);
    let outcome = match ce_analyze::merge_engine(&scenario).merge(&local, &incoming) {
        Ok(o) => o,
        Err(e) => {
            report_error(&format!("merge failed: {}", e), output, quiet);
            process::exit(1);
        }
    };
    let report = ce_analyze::analyze(&scenario, &outcome.document);
    print_merge(&outcome, &report, output, quiet);
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn read_json(path: &Path, output: OutputFormat, quiet: bool) -> serde_json::Value {
    let content = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            let msg = format!("error reading file '{}': {}", path.display(), e);
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    };
    match serde_json::from_str(&content) {
        Ok(v) => v,
        Err(e) => {
            let msg = format!("error parsing JSON in '{}': {}", path.display(), e);
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    }
}

fn load_scenario(path: &Path, output: OutputFormat, quiet: bool) -> ScenarioDefinition {
    match ScenarioDefinition::from_json(&read_json(path, output, quiet)) {
        Ok(s) => s,
        Err(e) => {
            report_error(&format!("{}: {}", path.display(), e), output, quiet);
            process::exit(1);
        }
    }
}

fn load_document(path: &Path, output: OutputFormat, quiet: bool) -> CrdtDocument {
    match serde_json::from_value(read_json(path, output, quiet)) {
        Ok(d) => d,
        Err(e) => {
            let msg = format!("invalid session document '{}': {}", path.display(), e);
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T, output: OutputFormat, quiet: bool) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(e) => {
            report_error(&format!("serialization error: {}", e), output, quiet);
            process::exit(1);
        }
    }
}

fn print_merge(outcome: &MergeOutcome, report: &AnalysisReport, output: OutputFormat, quiet: bool) {
    match output {
        OutputFormat::Json => print_json(&MergeResponse::merged(outcome, report), output, quiet),
        OutputFormat::Text => {
            if quiet {
                return;
            }
            let document = &outcome.document;
            println!("document {} ({})", document.document_id, document.scenario_id);
            println!("  clock: {}", document.vector_clock);
            for (step_id, record) in &outcome.resolved {
                let duration = record
                    .actual_duration
                    .map(|d| format!(" {}s", d))
                    .unwrap_or_default();
                let flag = if record.conflicting_outcomes {
                    " [review]"
                } else {
                    ""
                };
                println!("  {}: {}{}{}", step_id, record.status, duration, flag);
            }
            println!("conflicts resolved: {}", outcome.conflicts_resolved);
            if !outcome.review_required.is_empty() {
                println!("review required: {}", outcome.review_required.join(", "));
            }
            print_report_text(report);
        }
    }
}

fn print_report_text(report: &AnalysisReport) {
    println!("overall status: {}", report.overall_status.as_str());
    for deviation in report.deviations.iter().filter(|d| d.severity.raises_fault()) {
        let code = deviation.code.map(|c| c.as_str()).unwrap_or("-");
        println!(
            "  [{}] {} ({}): {}",
            deviation.severity, deviation.step_id, code, deviation.description
        );
    }
    println!("faults: {}", report.faults.len());
    for finding in &report.findings {
        println!("  note: {}", finding.message);
    }
}

/// Report an error in the selected output format.
pub(crate) fn report_error(msg: &str, output: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match output {
        OutputFormat::Text => eprintln!("{}", msg),
        OutputFormat::Json => {
            eprintln!("{}", serde_json::json!({ "error": msg }));
        }
    }
}
