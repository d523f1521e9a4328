use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use analysis_coordinator::{format, Config};

#[derive(Parser, Debug)]
#[command(
    name = "analysis-coordinator",
    version,
    about = "Versioned background analysis for open documents",
    long_about = "Keeps a background analysis of every open document up to date and \
        answers queries only from an analysis of the current version.\n\n\
        Examples:\n  \
        analysis-coordinator analyze module.py other.py\n  \
        analysis-coordinator analyze module.py --timeout-ms 500 --format markdown\n  \
        analysis-coordinator lsp"
)]
struct Cli {
    #[arg(
        long,
        global = true,
        default_value = "json",
        help = "Output format",
        long_help = "Output format.\n  json     JSON (default, best for programmatic use)\n  markdown Human-readable markdown"
    )]
    format: OutputFormat,

    #[arg(long, global = true, help = "Log at debug level (same as ANALYSIS_COORDINATOR_TRACE=1)")]
    trace: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(ValueEnum, Clone, Debug)]
enum OutputFormat {
    Json,
    Markdown,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyze files and print one report per file
    ///
    /// Exit code 1 if any file could not be analyzed in time.
    #[command(long_about = "Open each file, wait for its analysis and print a report.\n\n\
        A file whose analysis fails (for example unbalanced brackets) is\n\
        reported as timed out: failures are logged, never returned to waiters.\n\n\
        Examples:\n  \
        analysis-coordinator analyze module.py\n  \
        analysis-coordinator analyze a.py b.py --timeout-ms 2000")]
    Analyze {
        /// Files to analyze
        #[arg(required = true)]
        files: Vec<PathBuf>,

        #[arg(long, short, help = "Per-file wait bound in milliseconds (default from config)")]
        timeout_ms: Option<u64>,
    },

    /// Start the Language Server Protocol server (stdio)
    Lsp,
}

/// Logs go to stderr; stdout carries command output or the LSP transport.
fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_directive()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = Config::load();
    if cli.trace {
        config.trace_logging = true;
    }
    init_tracing(&config);

    match run(cli, config).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, config: Config) -> anyhow::Result<ExitCode> {
    match cli.command {
        Command::Analyze { files, timeout_ms } => {
            let timeout = timeout_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| config.default_timeout());
            let reports = analysis_coordinator::analyze_files(&files, timeout, config).await?;
            let all_ok = reports.iter().all(|r| r.error.is_none());
            match cli.format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&reports)?);
                }
                OutputFormat::Markdown => {
                    print!("{}", format::reports(&reports));
                }
            }
            Ok(if all_ok {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            })
        }

        Command::Lsp => {
            analysis_coordinator::lsp::serve_stdio(config).await;
            Ok(ExitCode::SUCCESS)
        }
    }
}
