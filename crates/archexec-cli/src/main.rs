//! archexec CLI: run Arch Linux maintenance commands through the privileged
//! runner, with live output, sudo prompts and Ctrl-C cancellation.

// CLI-specific lint allowances (CLI binary, not library)
#![allow(missing_docs)]
#![allow(clippy::print_stdout)] // CLI must print to stdout
#![allow(clippy::print_stderr)] // CLI must print to stderr
#![allow(clippy::exit)] // CLI uses exit codes
#![allow(clippy::fn_params_excessive_bools)] // CLI flags are naturally bools

mod progress;
mod terminal;

use archexec::config::{load_config_file, load_queue_file};
use archexec::elevation::{find_in_path, ElevationStatus};
use archexec::lockcheck::{inspect_lock, LockState, SysinfoProcessTable};
use archexec::model::{CommandRequest, CommandResult, ElevationMode, QueueStatus, RunnerConfig};
use archexec::policy::explain_command;
use archexec::queue::{CommandQueue, QueueOptions, QueueSummary};
use archexec::runner::{ErrorCode, ExecutionObserver, NoopObserver, Runner, RunnerError};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::progress::QueueProgress;
use crate::terminal::{print_summary, LiveOutput, TerminalInteraction};

/// Color output mode
#[derive(Copy, Clone, Debug, Default, ValueEnum)]
enum ColorMode {
    /// Auto-detect based on terminal and `NO_COLOR` env
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

#[derive(Debug, Parser)]
#[command(
    name = "archexec",
    version,
    about = "Run Arch Linux maintenance commands with policy checks and sudo handling"
)]
struct Cli {
    /// Control color output
    #[arg(long, value_enum, default_value = "auto", global = true)]
    color: ColorMode,

    /// Log runner decisions to stderr
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one command line
    Run(RunArgs),
    /// Show how a command would be validated and elevated without running it
    Check(CheckArgs),
    /// Run several commands in order, stopping at the first failure
    Queue(QueueArgs),
    /// Report elevation helper, lock and configuration state
    Doctor(DoctorArgs),
    /// Print shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Args)]
struct RunArgs {
    #[arg(long)]
    json: bool,
    #[arg(long, help = "Runner configuration file (.yaml, .yml or .json)")]
    config: Option<PathBuf>,
    #[arg(long, help = "Run without the elevation helper")]
    no_elevate: bool,
    #[arg(long, help = "Timeout in seconds, 0 disables it")]
    timeout: Option<u64>,
    #[arg(long, help = "Working directory (absolute path)")]
    cwd: Option<PathBuf>,
    #[arg(short, long, help = "Remove a stale package database lock without asking")]
    yes: bool,
    #[arg(last = true, required = true)]
    command: Vec<String>,
}

#[derive(Debug, Args)]
struct CheckArgs {
    #[arg(long)]
    json: bool,
    #[arg(long, help = "Runner configuration file (.yaml, .yml or .json)")]
    config: Option<PathBuf>,
    #[arg(long, help = "Explain the command as if run without elevation")]
    no_elevate: bool,
    #[arg(last = true, required = true)]
    command: Vec<String>,
}

#[derive(Debug, Args)]
struct QueueArgs {
    #[arg(long)]
    json: bool,
    #[arg(long, help = "Runner configuration file (.yaml, .yml or .json)")]
    config: Option<PathBuf>,
    #[arg(long, help = "Queue file listing catalog items")]
    file: Option<PathBuf>,
    #[arg(
        short = 'c',
        long = "command",
        required_unless_present = "file",
        help = "Command line to append (repeatable)"
    )]
    commands: Vec<String>,
    #[arg(long, help = "Keep going after a failed command")]
    continue_on_failure: bool,
    #[arg(long, help = "Run without the elevation helper")]
    no_elevate: bool,
    #[arg(long, help = "Timeout per command in seconds, 0 disables it")]
    timeout: Option<u64>,
    #[arg(short, long, help = "Remove a stale package database lock without asking")]
    yes: bool,
}

#[derive(Debug, Args)]
struct DoctorArgs {
    #[arg(long)]
    json: bool,
    #[arg(long, help = "Runner configuration file (.yaml, .yml or .json)")]
    config: Option<PathBuf>,
}

/// Configure color output based on CLI flag and environment
fn configure_colors(mode: ColorMode) {
    let use_color = match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => {
            if std::env::var("NO_COLOR").is_ok() {
                false
            } else {
                supports_color::on(supports_color::Stream::Stderr).is_some()
            }
        }
    };

    console::set_colors_enabled(use_color);
    console::set_colors_enabled_stderr(use_color);
    miette::set_hook(Box::new(move |_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .color(use_color)
                .unicode(use_color)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set
}

/// `RUST_LOG` wins; otherwise `-v` raises the default `warn` to `debug`.
fn init_tracing(verbose: u8) {
    let fallback = match verbose {
        0 => "warn",
        1 => "archexec=debug,warn",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .ok();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    configure_colors(cli.color);
    init_tracing(cli.verbose);
    let verbose = cli.verbose > 0;
    match cli.command {
        Commands::Run(args) => cmd_run(args, verbose),
        Commands::Check(args) => cmd_check(args),
        Commands::Queue(args) => cmd_queue(args, verbose),
        Commands::Doctor(args) => cmd_doctor(args),
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            generate(shell, &mut command, "archexec", &mut std::io::stdout());
            Ok(())
        }
    }
}

// =============================================================================
// Subcommands
// =============================================================================

fn cmd_run(args: RunArgs, verbose: bool) -> Result<()> {
    let json = args.json;
    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(err) => return emit_error(json, err),
    };
    if args.cwd.as_ref().is_some_and(|dir| !dir.is_absolute()) {
        return emit_error(json, RunnerError::cli_invalid_arg("--cwd must be an absolute path"));
    }

    let mut request = config
        .request(command_line(&args.command))
        .with_elevation(!args.no_elevate);
    if let Some(secs) = args.timeout {
        request = request.with_timeout_secs(secs);
    }
    if let Some(dir) = args.cwd {
        request = request.in_directory(dir);
    }

    let observer: Arc<dyn ExecutionObserver> = if json {
        Arc::new(NoopObserver)
    } else {
        Arc::new(LiveOutput::new(verbose))
    };
    let runner = Runner::builder(config)
        .observer(observer)
        .interaction(Arc::new(TerminalInteraction::new(args.yes, None)))
        .build();
    let handle = runner.cancel_handle();
    install_interrupt_handler(move || {
        handle.cancel();
    });

    let result = runner.execute(request);
    emit_result(json, &result)
}

fn cmd_check(args: CheckArgs) -> Result<()> {
    let json = args.json;
    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(err) => return emit_error(json, err),
    };
    let explanation = explain_command(&command_line(&args.command), !args.no_elevate, &config);

    if json {
        let payload = serde_json::to_string(&explanation).into_diagnostic()?;
        println!("{payload}");
    } else if explanation.accepted {
        println!("policy: accepted");
        println!("argv: {}", shell_words::join(&explanation.argv));
        println!("elevated: {}", explanation.elevated);
        println!("credential on stdin: {}", explanation.credential_on_stdin);
        println!("lock check: {}", explanation.lock_check);
    } else {
        println!("policy: rejected ({})", explanation.reason);
    }
    if !explanation.accepted {
        std::process::exit(ErrorCode::PolicyDenied.exit_code());
    }
    Ok(())
}

fn cmd_queue(args: QueueArgs, verbose: bool) -> Result<()> {
    let json = args.json;
    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(err) => return emit_error(json, err),
    };
    let mut queue = match build_queue(&args, &config) {
        Ok(queue) => queue,
        Err(err) => return emit_error(json, err),
    };

    let progress = (!json).then(|| Arc::new(QueueProgress::new(verbose)));
    let observer: Arc<dyn ExecutionObserver> = match &progress {
        Some(progress) => Arc::clone(progress) as Arc<dyn ExecutionObserver>,
        None => Arc::new(NoopObserver),
    };
    let runner = Runner::builder(config)
        .observer(observer)
        .interaction(Arc::new(TerminalInteraction::new(args.yes, progress.clone())))
        .build();
    let canceller = queue.canceller(&runner);
    install_interrupt_handler(move || canceller.cancel());

    let summary = queue.run_with(&runner, |update| {
        if let Some(progress) = &progress {
            progress.on_update(update);
        }
    });
    emit_queue(json, &queue, &summary)
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    config: String,
    helper: String,
    helper_path: Option<PathBuf>,
    elevation_mode: ElevationMode,
    elevation: Option<ElevationStatus>,
    lock_path: PathBuf,
    lock: Option<LockState>,
    history_limit: usize,
}

fn cmd_doctor(args: DoctorArgs) -> Result<()> {
    let json = args.json;
    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(err) => return emit_error(json, err),
    };
    let elevation = (config.elevation.mode != ElevationMode::Direct)
        .then(|| Runner::new(config.clone()).elevation_status());
    let lock = config
        .lock
        .enabled
        .then(|| inspect_lock(&config.lock, &SysinfoProcessTable));
    let report = DoctorReport {
        config: args
            .config
            .as_ref()
            .map_or_else(|| "defaults".to_string(), |path| path.display().to_string()),
        helper_path: find_in_path(&config.elevation.helper),
        helper: config.elevation.helper.clone(),
        elevation_mode: config.elevation.mode,
        elevation,
        lock_path: config.lock.lock_path.clone(),
        lock,
        history_limit: config.history.max_entries,
    };

    if json {
        let payload = serde_json::to_string(&report).into_diagnostic()?;
        println!("{payload}");
        return Ok(());
    }
    println!("config: {}", report.config);
    match &report.helper_path {
        Some(path) => println!("helper: {} ({})", report.helper, path.display()),
        None => println!("helper: {} (not found)", report.helper),
    }
    println!("elevation mode: {}", report.elevation_mode);
    if let Some(status) = report.elevation {
        println!("elevation: {}", describe_elevation(status));
    }
    match report.lock {
        Some(state) => println!("lock {}: {}", report.lock_path.display(), describe_lock(state)),
        None => println!("lock check: disabled"),
    }
    Ok(())
}

// =============================================================================
// Helpers
// =============================================================================

fn load_config(path: Option<&Path>) -> Result<RunnerConfig, RunnerError> {
    match path {
        Some(path) => load_config_file(path),
        None => Ok(RunnerConfig::default()),
    }
}

/// A single argument is taken as a complete command line; several are
/// re-quoted so each stays one word.
fn command_line(words: &[String]) -> String {
    match words {
        [single] => single.clone(),
        _ => shell_words::join(words),
    }
}

fn build_queue(args: &QueueArgs, config: &RunnerConfig) -> Result<CommandQueue, RunnerError> {
    let file = args.file.as_deref().map(load_queue_file).transpose()?;

    let mut options = QueueOptions::from(config);
    if let Some(stop) = file.as_ref().and_then(|file| file.stop_on_failure) {
        options.stop_on_failure = stop;
    }
    if args.continue_on_failure {
        options.stop_on_failure = false;
    }
    let timeout = args
        .timeout
        .or_else(|| file.as_ref().and_then(|file| file.timeout_secs))
        .unwrap_or(config.execution.default_timeout_secs);
    let template = CommandRequest::new("")
        .with_elevation(!args.no_elevate)
        .with_timeout_secs(timeout);

    let mut queue = CommandQueue::new(options);
    for item in file.iter().flat_map(|file| &file.commands) {
        if let Some(missing) = item.requires.iter().find(|exe| find_in_path(exe).is_none()) {
            eprintln!("skipping {}: {missing} is not installed", item.name);
            continue;
        }
        queue.add_catalog_item(item, &template);
    }
    for command in &args.commands {
        let request = CommandRequest {
            command: command.clone(),
            ..template.clone()
        };
        queue.add_request(request, command.clone());
    }
    Ok(queue)
}

fn install_interrupt_handler<F>(on_interrupt: F)
where
    F: FnMut() + Send + 'static,
{
    if let Err(err) = ctrlc::set_handler(on_interrupt) {
        tracing::warn!(error = %err, "failed to install Ctrl-C handler");
    }
}

fn describe_elevation(status: ElevationStatus) -> &'static str {
    match status {
        ElevationStatus::Available => "available without a password",
        ElevationStatus::RequiresCredential => "password required",
        ElevationStatus::Unavailable => "unavailable",
    }
}

fn describe_lock(state: LockState) -> &'static str {
    match state {
        LockState::Absent => "absent",
        LockState::Held => "held by a running package manager",
        LockState::Stale => "stale",
    }
}

// =============================================================================
// Output and exit codes
// =============================================================================

fn emit_result(json: bool, result: &CommandResult) -> Result<()> {
    if json {
        let payload = serde_json::to_string(result).into_diagnostic()?;
        println!("{payload}");
    } else {
        print_summary(result);
    }
    if !result.succeeded() {
        std::process::exit(exit_code_for_result(result));
    }
    Ok(())
}

fn emit_queue(json: bool, queue: &CommandQueue, summary: &QueueSummary) -> Result<()> {
    if json {
        let payload = serde_json::to_string(&serde_json::json!({
            "summary": summary,
            "entries": queue.entries(),
        }))
        .into_diagnostic()?;
        println!("{payload}");
    } else {
        eprintln!(
            "queue: {} completed, {} failed, {} pending",
            summary.completed, summary.failed, summary.pending
        );
    }
    if !summary.all_succeeded() {
        std::process::exit(exit_code_for_queue(queue, summary));
    }
    Ok(())
}

fn emit_error(json: bool, err: RunnerError) -> Result<()> {
    let code = err.exit_code();
    if json {
        let payload = serde_json::to_string(&err.to_error_info()).into_diagnostic()?;
        println!("{payload}");
    } else {
        eprintln!("{:?}", miette::Report::new(err));
    }
    std::process::exit(code);
}

fn exit_code_for_result(result: &CommandResult) -> i32 {
    result
        .error_code()
        .and_then(ErrorCode::parse)
        .map_or(1, ErrorCode::exit_code)
}

fn exit_code_for_queue(queue: &CommandQueue, summary: &QueueSummary) -> i32 {
    if summary.cancelled {
        return ErrorCode::Cancelled.exit_code();
    }
    queue
        .entries()
        .iter()
        .filter(|entry| entry.status == QueueStatus::Failed)
        .find_map(|entry| entry.result.as_ref())
        .map_or(1, exit_code_for_result)
}
