#![forbid(unsafe_code)]

//! `csend-ctl`: one-shot companion CLI for `csend-bridge`.
//!
//! Sends a single machine-mode command to a fresh CSend process, and
//! searches the reference documentation and platform logs.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use csend_bridge::config::{GlobalConfig, SearchConfig};
use csend_bridge::machine::MachineClient;
use csend_bridge::search::docs::{self, DocCatalog, SearchOptions, DEFAULT_SECTION_LINES};
use csend_bridge::search::logs::{self, LevelSelector, LogFilter};
use csend_bridge::{AppError, Result};

#[derive(Debug, Parser)]
#[command(
    name = "csend-ctl",
    about = "Local CLI companion for csend-bridge",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start CSend, send one command, print the response, and stop.
    Send {
        /// CSend executable; overrides the config file and environment.
        #[arg(long)]
        executable: Option<PathBuf>,

        /// Username announced while connected.
        #[arg(long)]
        identity: Option<String>,

        /// Command words, e.g. `/status` or `/history 5`.
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        words: Vec<String>,
    },

    /// Search the reference documentation.
    #[command(subcommand)]
    Docs(DocsCommand),

    /// Filter platform logs.
    #[command(subcommand)]
    Logs(LogsCommand),
}

#[derive(Debug, Subcommand)]
enum DocsCommand {
    /// List available documents.
    List {
        #[command(flatten)]
        location: DocsLocation,
    },

    /// Search documents for a regex.
    Search {
        #[command(flatten)]
        location: DocsLocation,

        /// Regex to search for.
        query: String,

        /// Only documents whose id contains this text.
        #[arg(long)]
        filter: Option<String>,

        /// Context lines around each match.
        #[arg(long, default_value_t = 3)]
        context: usize,

        /// Match case exactly.
        #[arg(long)]
        case_sensitive: bool,

        /// Matches shown per document.
        #[arg(long, default_value_t = 10)]
        max_results: usize,
    },

    /// Print a section of one document.
    Section {
        #[command(flatten)]
        location: DocsLocation,

        /// Document id (see `docs list`).
        doc: String,

        /// Section heading text.
        name: String,

        /// Lines to print from the heading on.
        #[arg(long, default_value_t = DEFAULT_SECTION_LINES)]
        lines: usize,
    },
}

#[derive(Debug, Args)]
struct DocsLocation {
    /// Documentation directory; overrides `search.docs_dir`.
    #[arg(long)]
    docs_dir: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum LogsCommand {
    /// List configured logs that exist, newest first.
    List,

    /// Run the filter script over a log.
    Filter(FilterArgs),
}

#[derive(Debug, Args)]
struct FilterArgs {
    /// Platform log to use (e.g. `posix`); newest log when omitted.
    #[arg(long)]
    platform: Option<String>,

    /// Explicit log file; overrides `--platform`.
    #[arg(long)]
    file: Option<PathBuf>,

    /// Filter script; overrides `search.filter_script`.
    #[arg(long)]
    script: Option<PathBuf>,

    /// Summary report only.
    #[arg(long)]
    summary: bool,

    /// ERROR lines only.
    #[arg(long, group = "severity")]
    errors: bool,

    /// WARNING and ERROR lines.
    #[arg(long, group = "severity")]
    warnings: bool,

    /// Everything but DEBUG.
    #[arg(long, group = "severity")]
    no_debug: bool,

    /// Lines at or above this level.
    #[arg(long, group = "severity")]
    level: Option<String>,

    /// Log category.
    #[arg(long)]
    category: Option<String>,

    /// Peer name or IP address.
    #[arg(long)]
    peer: Option<String>,

    /// Test-related lines only.
    #[arg(long)]
    tests: bool,

    /// Timestamp prefix, e.g. `16:44:2`.
    #[arg(long)]
    time: Option<String>,

    /// Context lines around matches.
    #[arg(long)]
    context: Option<usize>,

    /// First N lines, or last N when negative.
    #[arg(long, allow_negative_numbers = true)]
    lines: Option<i64>,
}

impl FilterArgs {
    fn to_filter(&self) -> LogFilter {
        let level = if self.errors {
            Some(LevelSelector::ErrorsOnly)
        } else if self.warnings {
            Some(LevelSelector::WarningsOnly)
        } else if self.no_debug {
            Some(LevelSelector::ExcludeDebug)
        } else {
            self.level.clone().map(LevelSelector::AtLeast)
        };
        LogFilter {
            level,
            category: self.category.clone(),
            peer: self.peer.clone(),
            test_only: self.tests,
            time_pattern: self.time.clone(),
            context_lines: self.context,
            num_lines: self.lines,
            summary: self.summary,
        }
    }
}

fn main() {
    let args = Cli::parse();
    init_tracing();

    match run(args) {
        Ok(output) => println!("{output}"),
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    }
}

fn run(args: Cli) -> Result<String> {
    match args.command {
        Command::Send {
            executable,
            identity,
            words,
        } => {
            let config = GlobalConfig::resolve(args.config.as_deref(), executable, identity)?;
            block_on(send(&config, &words.join(" ")))
        }
        Command::Docs(command) => run_docs(&search_config(args.config.as_deref())?, command),
        Command::Logs(command) => {
            let search = search_config(args.config.as_deref())?;
            block_on(run_logs(search, command))
        }
    }
}

fn block_on<F: std::future::Future<Output = Result<String>>>(fut: F) -> Result<String> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(fut)
}

/// Search settings from the config file, or defaults without one.
fn search_config(path: Option<&Path>) -> Result<SearchConfig> {
    match path {
        Some(path) => Ok(GlobalConfig::load_from_path(path)?.search),
        None => Ok(SearchConfig::default()),
    }
}

async fn send(config: &GlobalConfig, command: &str) -> Result<String> {
    let client = MachineClient::connect(config).await?;
    let outcome = client.request(command).await;
    client.disconnect().await;

    let frame = outcome?;
    if let Some(err) = &frame.error {
        return Err(AppError::Protocol(format!("{} ({})", err.message, err.code)));
    }
    serde_json::to_string_pretty(&frame)
        .map_err(|err| AppError::Protocol(format!("cannot render response: {err}")))
}

fn catalog(search: &SearchConfig, location: &DocsLocation) -> Result<DocCatalog> {
    let dir = location
        .docs_dir
        .as_ref()
        .or(search.docs_dir.as_ref())
        .ok_or_else(|| {
            AppError::Config("no documentation directory; pass --docs-dir or set search.docs_dir".into())
        })?;
    DocCatalog::discover(dir)
}

fn run_docs(search: &SearchConfig, command: DocsCommand) -> Result<String> {
    match command {
        DocsCommand::List { location } => Ok(catalog(search, &location)?.list()),
        DocsCommand::Search {
            location,
            query,
            filter,
            context,
            case_sensitive,
            max_results,
        } => {
            let options = SearchOptions {
                context_lines: context,
                case_sensitive,
                max_results,
            };
            let results = catalog(search, &location)?.search(&query, filter.as_deref(), &options)?;
            Ok(docs::render_results(&query, &results))
        }
        DocsCommand::Section {
            location,
            doc,
            name,
            lines,
        } => match catalog(search, &location)?.section(&doc, &name, lines)? {
            Some(section) => Ok(section.to_string()),
            None => Ok(format!("Section '{name}' not found in {doc}")),
        },
    }
}

async fn run_logs(search: SearchConfig, command: LogsCommand) -> Result<String> {
    match command {
        LogsCommand::List => {
            let found = logs::available_logs(&search.log_files);
            if found.is_empty() {
                return Ok("No log files found.".into());
            }
            Ok(found
                .iter()
                .map(|info| {
                    format!(
                        "{:<16} {}  (modified {})",
                        info.platform,
                        info.path.display(),
                        info.modified.format("%Y-%m-%d %H:%M:%S UTC")
                    )
                })
                .collect::<Vec<_>>()
                .join("\n"))
        }
        LogsCommand::Filter(args) => {
            let file = match &args.file {
                Some(file) => file.clone(),
                None => logs::find_log_file(&search.log_files, args.platform.as_deref())
                    .ok_or_else(|| AppError::Search("no log file found".into()))?,
            };
            if !file.exists() {
                return Err(AppError::Search(format!(
                    "log file not found: {}",
                    file.display()
                )));
            }
            let script = args
                .script
                .clone()
                .or(search.filter_script)
                .ok_or_else(|| {
                    AppError::Config("no filter script; pass --script or set search.filter_script".into())
                })?;
            logs::run_filter(&script, &args.to_filter().to_args(&file)).await
        }
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
}
