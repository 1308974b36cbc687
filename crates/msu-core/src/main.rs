//! MSU Study Reporter - command line entry point
//!
//! Records "most significant unit" choices, shows the accumulated
//! observations and sends the daily aggregate report to the study endpoint.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use msu_core::daemon::{run_loop, DaemonConfig, DaemonState};
use msu_core::exit_codes::ExitCode;
use msu_core::logging::config::ENV_LOG;
use msu_core::logging::{generate_run_id, init_logging, level_from_flags, LogConfig, LogFormat};
use msu_core::output::{
    render_daemon_summary, render_enrollment, render_outcome, render_preview, render_records,
    render_status, to_json, OutputFormat, RecordRow, ReportPreview, StatusView,
};
use msu_core::runtime::{CliError, Runtime, RuntimeOptions};
use msu_telemetry::{parse_study_date, MostSignificantUnit, ReportWindow, StoreError};
use serde::Serialize;
use tracing::{debug, info_span};

/// MSU Study Reporter - date-format choice telemetry
#[derive(Parser)]
#[command(name = "msu-core")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOpts,
}

/// Global options available to all commands
#[derive(Args, Debug)]
struct GlobalOpts {
    /// Path to study.json
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the state directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'f', global = true, default_value = "human")]
    format: OutputFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease verbosity (quiet mode)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log format on stderr (human, jsonl)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    /// Pin the study date (YYYY-MM-DD)
    #[arg(long, global = true, hide = true, value_parser = parse_today)]
    today: Option<NaiveDate>,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll in the study (no-op when already enrolled)
    Init,

    /// Record one date-format choice
    Record(RecordArgs),

    /// Show enrollment and accumulated observations
    Show,

    /// Send the aggregate report for days not yet reported
    Report(ReportArgs),

    /// Delete all study data
    Purge(PurgeArgs),

    /// Trigger reports on a fixed interval
    Daemon(DaemonArgs),

    /// Print version information
    Version,
}

#[derive(Args, Debug)]
struct RecordArgs {
    /// Page or site the choice was made on
    #[arg(long)]
    context: String,

    /// Date pattern that was chosen
    #[arg(long)]
    pattern: String,

    /// Most significant unit of the pattern (day-first, month-first, year-first)
    #[arg(long)]
    unit: MostSignificantUnit,

    /// Distance signal for the choice; omitted means no distance
    #[arg(long, allow_negative_numbers = true)]
    distance: Option<f64>,

    /// Record into this day bucket instead of today's
    #[arg(long)]
    day: Option<u32>,
}

#[derive(Args, Debug)]
struct ReportArgs {
    /// Print the payload without sending or advancing the watermark
    #[arg(long)]
    dry_run: bool,

    /// Override the endpoint base URL
    #[arg(long)]
    api_url: Option<String>,
}

#[derive(Args, Debug)]
struct PurgeArgs {
    /// Enroll again immediately with a fresh participant id
    #[arg(long)]
    reinit: bool,
}

#[derive(Args, Debug)]
struct DaemonArgs {
    /// Seconds between report triggers (default from config)
    #[arg(long)]
    interval_secs: Option<u64>,

    /// Stop after this many triggers
    #[arg(long)]
    max_ticks: Option<u64>,

    /// Override the endpoint base URL
    #[arg(long)]
    api_url: Option<String>,
}

fn parse_today(s: &str) -> Result<NaiveDate, String> {
    parse_study_date(s).map_err(|e| format!("expected YYYY-MM-DD: {}", e))
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if err.use_stderr() {
                ExitCode::ArgsError
            } else {
                ExitCode::Clean
            };
            let _ = err.print();
            std::process::exit(code.as_i32());
        }
    };

    let cli_level = level_from_flags(cli.global.verbose, cli.global.quiet);
    let honor_rust_log = cli_level.is_none() && std::env::var_os(ENV_LOG).is_none();
    let log_config = LogConfig::from_env(cli_level, cli.global.log_format);
    init_logging(&log_config, honor_rust_log);

    let exit_code = match run(&cli) {
        Ok(code) => code,
        Err(err) => output_error(&cli.global, &err),
    };

    std::process::exit(exit_code.as_i32());
}

fn run(cli: &Cli) -> Result<ExitCode, CliError> {
    let global = &cli.global;
    if let Commands::Version = cli.command {
        print_version(global)?;
        return Ok(ExitCode::Clean);
    }

    let runtime = Runtime::open(&RuntimeOptions {
        config_path: global.config.clone(),
        data_dir: global.data_dir.clone(),
        today: global.today,
    })?;
    debug!(data_dir = %runtime.data_dir.display(), "state directory");

    match &cli.command {
        Commands::Init => run_init(global, &runtime),
        Commands::Record(args) => run_record(global, &runtime, args),
        Commands::Show => run_show(global, &runtime),
        Commands::Report(args) => run_report(global, &runtime, args),
        Commands::Purge(args) => run_purge(global, &runtime, args),
        Commands::Daemon(args) => run_daemon(global, &runtime, args),
        Commands::Version => Ok(ExitCode::Clean),
    }
}

/// Print `value` as JSON or through the human renderer.
fn emit<T: Serialize>(
    global: &GlobalOpts,
    value: &T,
    human: impl FnOnce(&T) -> String,
) -> Result<(), CliError> {
    match global.format {
        OutputFormat::Json => println!("{}", to_json(value)?),
        OutputFormat::Human => print!("{}", human(value)),
    }
    Ok(())
}

fn run_init(global: &GlobalOpts, runtime: &Runtime) -> Result<ExitCode, CliError> {
    let enrollment = runtime.store.init_study()?;
    emit(global, &enrollment, render_enrollment)?;
    Ok(ExitCode::Clean)
}

fn run_record(
    global: &GlobalOpts,
    runtime: &Runtime,
    args: &RecordArgs,
) -> Result<ExitCode, CliError> {
    let distance = args.distance.unwrap_or(f64::INFINITY);
    let store = &runtime.store;
    let record = match args.day {
        Some(day) => {
            store.try_record_choice(&args.context, &args.pattern, args.unit, distance, day)?
        }
        None => store.record_choice_today(&args.context, &args.pattern, args.unit, distance)?,
    };
    let row = RecordRow::from(&record);
    emit(global, &row, |r| render_records(std::slice::from_ref(r)))?;
    Ok(ExitCode::Clean)
}

fn run_show(global: &GlobalOpts, runtime: &Runtime) -> Result<ExitCode, CliError> {
    let store = &runtime.store;
    let state = store.study_state()?;
    let records = store.try_all_records()?;
    let view = StatusView::new(&state, &records, store.today());
    emit(global, &view, render_status)?;
    Ok(ExitCode::Clean)
}

fn run_report(
    global: &GlobalOpts,
    runtime: &Runtime,
    args: &ReportArgs,
) -> Result<ExitCode, CliError> {
    if args.dry_run {
        let store = &runtime.store;
        let state = store.study_state()?;
        let enrollment = state.enrollment().ok_or(StoreError::NotEnrolled)?;
        let window =
            ReportWindow::evaluate(enrollment.opt_in_date, state.last_report_date, store.today());
        let report = store.build_report(window.start_day)?;
        let preview = ReportPreview {
            start_day: window.start_day,
            reported_today: window.reported_today,
            report,
        };
        emit(global, &preview, render_preview)?;
        return Ok(ExitCode::Clean);
    }

    let dispatcher = runtime.dispatcher(args.api_url.as_deref())?;
    let outcome = dispatcher.run();
    emit(global, &outcome, render_outcome)?;
    Ok(ExitCode::for_outcome(&outcome))
}

#[derive(Serialize)]
struct PurgeSummary {
    purged: bool,
    data_dir: PathBuf,
}

fn run_purge(global: &GlobalOpts, runtime: &Runtime, args: &PurgeArgs) -> Result<ExitCode, CliError> {
    if args.reinit {
        let enrollment = runtime.store.reset_study()?;
        emit(global, &enrollment, render_enrollment)?;
        return Ok(ExitCode::Clean);
    }

    runtime.store.purge()?;
    let summary = PurgeSummary {
        purged: true,
        data_dir: runtime.data_dir.clone(),
    };
    emit(global, &summary, |s| {
        format!("Study data purged from {}\n", s.data_dir.display())
    })?;
    Ok(ExitCode::Clean)
}

fn run_daemon(global: &GlobalOpts, runtime: &Runtime, args: &DaemonArgs) -> Result<ExitCode, CliError> {
    let config = DaemonConfig {
        interval_secs: args
            .interval_secs
            .unwrap_or(runtime.config.reporting.interval_secs),
        max_ticks: args.max_ticks,
    };
    if config.interval_secs == 0 {
        return Err(CliError::Usage(
            "--interval-secs must be greater than zero".to_string(),
        ));
    }

    let dispatcher = runtime.dispatcher(args.api_url.as_deref())?;
    let mut state = DaemonState::new(generate_run_id());
    let span = info_span!("daemon", run_id = %state.run_id);
    let _enter = span.enter();

    run_loop(
        &config,
        &mut state,
        &mut || dispatcher.run(),
        &mut |interval| std::thread::sleep(interval),
    );

    emit(global, &state, render_daemon_summary)?;
    Ok(ExitCode::Clean)
}

fn print_version(global: &GlobalOpts) -> Result<(), CliError> {
    let version_info = serde_json::json!({
        "msu_core_version": env!("CARGO_PKG_VERSION"),
        "config_schema_version": msu_config::CONFIG_SCHEMA_VERSION,
        "store_format_version": msu_telemetry::STORE_FORMAT_VERSION,
    });

    match global.format {
        OutputFormat::Json => println!("{}", to_json(&version_info)?),
        OutputFormat::Human => {
            println!("msu-core {}", env!("CARGO_PKG_VERSION"));
            println!("config schema: {}", msu_config::CONFIG_SCHEMA_VERSION);
            println!("store format: {}", msu_telemetry::STORE_FORMAT_VERSION);
        }
    }
    Ok(())
}

fn output_error(global: &GlobalOpts, error: &CliError) -> ExitCode {
    let exit_code = error.exit_code();
    match global.format {
        OutputFormat::Json => {
            let response = serde_json::json!({
                "status": "error",
                "error": {
                    "code": error.code(),
                    "exit_code": exit_code.as_i32(),
                    "message": error.to_string(),
                }
            });
            eprintln!(
                "{}",
                serde_json::to_string_pretty(&response).unwrap_or_else(|_| response.to_string())
            );
        }
        OutputFormat::Human => eprintln!("error: {}", error),
    }
    exit_code
}
