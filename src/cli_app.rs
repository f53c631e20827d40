//! Top-level CLI definition and dispatch.

use std::io::{self, Write};
use std::path::PathBuf;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use probemon_stats::core::config::Config;
use probemon_stats::core::dates::{local_datetime_of, now_epoch, parse_day, parse_timestamp};
use probemon_stats::core::errors::{ErrorKind, ProbeError};
use probemon_stats::logger::jsonl::{EventType, Journal, LogEntry, Severity};
use probemon_stats::stats::consolidate::{BackfillReport, Consolidator, DayOutcome};
use probemon_stats::stats::daily::{DAY_FORMAT, DailySummary, TIME_FORMAT};
use probemon_stats::stats::filter::ReportCriteria;
use probemon_stats::stats::merge::MergedSummary;
use probemon_stats::stats::report::{Report, ReportEngine, ReportOutput, ReportRequest};
use probemon_stats::store::sqlite::{ProbeEvent, ProbeStore, is_locally_administered};

const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const MAX_VENDOR_LENGTH: usize = 25;
const MAX_NETWORK_LENGTH: usize = 15;

/// Daily statistics and ad-hoc reports over a probemon database.
#[derive(Debug, Parser)]
#[command(
    name = "probestats",
    author,
    version,
    about = "Probe request statistics: daily consolidation and reporting",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Database file (overrides config and PROBESTATS_DB).
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Per-day progress on stderr.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
    /// Quiet mode (errors only).
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Build and maintain the daily stats table.
    Consolidate(ConsolidateArgs),
    /// Show statistics about devices and probed networks.
    Report(ReportArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args)]
struct ConsolidateArgs {
    #[command(subcommand)]
    command: ConsolidateCommand,
}

#[derive(Debug, Clone, Subcommand)]
enum ConsolidateCommand {
    /// Backfill every day from the first to the last recorded event.
    Init,
    /// Drop the stats table.
    Clear,
    /// Consolidate one day (YYYY-MM-DD or YYYYMMDD).
    Day {
        #[arg(value_name = "DAY")]
        day: String,
    },
    /// Consolidate yesterday.
    Update,
}

#[derive(Debug, Clone, Args)]
struct ReportArgs {
    /// Only events after this time (YYYY-MM-DDTHH:MM, or a day meaning noon).
    #[arg(short, long, value_name = "TIMESTAMP")]
    after: Option<String>,
    /// Only events before this time.
    #[arg(short, long, value_name = "TIMESTAMP")]
    before: Option<String>,
    /// Only the last 24 hours.
    #[arg(short, long)]
    day: bool,
    /// Device address, full (exact) or partial (prefix). Repeatable.
    #[arg(short, long = "mac", value_name = "ADDRESS")]
    macs: Vec<String>,
    /// Only samples with a signal strength above this value.
    #[arg(short, long, allow_negative_numbers = true, value_name = "DBM")]
    rssi: Option<i32>,
    /// Drop samples whose signal strength was not recorded.
    #[arg(short, long)]
    zero: bool,
    /// Merge all locally-administered addresses into one subject.
    #[arg(short, long)]
    privacy: bool,
    /// Day-by-day stats for the given devices.
    #[arg(long)]
    day_by_day: bool,
    /// Never read the stats table.
    #[arg(long)]
    no_summaries: bool,
    /// List network names with the devices that probed them.
    #[arg(long)]
    list_networks: bool,
    /// Dump every matching event.
    #[arg(short, long)]
    log: bool,
    /// Devices that probed this network name.
    #[arg(short, long, value_name = "NAME")]
    ssid: Option<String>,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Probe(#[from] ProbeError),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract: 1 for bad input, 2 for everything else.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Probe(e) => match e.kind() {
                ErrorKind::Input => 1,
                ErrorKind::Storage | ErrorKind::Environment => 2,
            },
            Self::Json(_) | Self::Io(_) => 2,
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Consolidate(args) => {
            let config = load_config(cli)?;
            run_consolidate(cli, &config, &args.command)
        }
        Command::Report(args) => {
            let config = load_config(cli)?;
            run_report(cli, &config, args)
        }
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config, CliError> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(db) = &cli.db {
        config.paths.database.clone_from(db);
    }
    Ok(config)
}

// ---------------------------------------------------------------------------
// consolidate
// ---------------------------------------------------------------------------

fn run_consolidate(
    cli: &Cli,
    config: &Config,
    command: &ConsolidateCommand,
) -> Result<(), CliError> {
    let mut journal = Journal::from_config(config);
    let result = consolidate(cli, config, command, &mut journal);
    if let Err(CliError::Probe(e)) = &result {
        journal.record(&LogEntry::failure(e));
    }
    journal.flush();
    result
}

fn consolidate(
    cli: &Cli,
    config: &Config,
    command: &ConsolidateCommand,
    journal: &mut Journal,
) -> Result<(), CliError> {
    // Parse before touching the database: bad input does no work.
    let day = match command {
        ConsolidateCommand::Day { day } => Some(parse_day(day)?),
        _ => None,
    };

    let store = ProbeStore::open_read_write(&config.paths.database)?;
    let consolidator = Consolidator::new(&store)?;
    let mode = output_mode(cli);

    match command {
        ConsolidateCommand::Init => {
            let mut start = LogEntry::new(EventType::BackfillStart, Severity::Info);
            start.details = Some(config.paths.database.display().to_string());
            journal.record(&start);

            let report = consolidator.consolidate_range(None, None, |outcome| {
                journal.record(&LogEntry::day_consolidated(outcome));
                if cli.verbose {
                    eprintln!("probestats: {}", describe_day(outcome));
                }
            })?;
            journal.record(&LogEntry::backfill_complete(&report));
            emit_backfill(cli, mode, &report)
        }
        ConsolidateCommand::Clear => {
            consolidator.clear()?;
            journal.record(&LogEntry::new(EventType::StatsCleared, Severity::Info));
            match mode {
                OutputMode::Human => {
                    if !cli.quiet {
                        println!("probestats: stats table dropped");
                    }
                }
                OutputMode::Json => {
                    write_json_line(&json!({"command": "consolidate clear", "ok": true}))?;
                }
            }
            Ok(())
        }
        ConsolidateCommand::Day { .. } | ConsolidateCommand::Update => {
            let outcome = match day {
                Some(day) => consolidator.consolidate_day(day)?,
                None => consolidator.consolidate_latest()?,
            };
            journal.record(&LogEntry::day_consolidated(&outcome));
            emit_day(cli, mode, &outcome)
        }
    }
}

fn describe_day(outcome: &DayOutcome) -> String {
    format!(
        "{}: {} device(s), {} row(s) in {}ms",
        outcome.day,
        outcome.devices,
        outcome.rows_written,
        outcome.duration.as_millis()
    )
}

fn emit_day(cli: &Cli, mode: OutputMode, outcome: &DayOutcome) -> Result<(), CliError> {
    match mode {
        OutputMode::Human => {
            if !cli.quiet {
                println!("probestats: {}", describe_day(outcome));
            }
        }
        OutputMode::Json => {
            write_json_line(&json!({
                "command": "consolidate day",
                "day": outcome.day.format(DAY_FORMAT).to_string(),
                "devices": outcome.devices,
                "rows": outcome.rows_written,
                "duration_ms": u64::try_from(outcome.duration.as_millis()).unwrap_or(u64::MAX),
            }))?;
        }
    }
    Ok(())
}

fn emit_backfill(cli: &Cli, mode: OutputMode, report: &BackfillReport) -> Result<(), CliError> {
    match mode {
        OutputMode::Human => {
            if cli.quiet {
                return Ok(());
            }
            match report.range {
                Some((first, last)) => println!(
                    "probestats: consolidated {} day(s) from {first} to {last}, {} row(s)",
                    report.days.len(),
                    report.rows_written()
                ),
                None => println!("probestats: no events to consolidate"),
            }
        }
        OutputMode::Json => {
            let range = report.range.map(|(first, last)| {
                json!({
                    "first": first.format(DAY_FORMAT).to_string(),
                    "last": last.format(DAY_FORMAT).to_string(),
                })
            });
            write_json_line(&json!({
                "command": "consolidate init",
                "range": range,
                "days": report.days.len(),
                "rows": report.rows_written(),
            }))?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// report
// ---------------------------------------------------------------------------

fn report_request(args: &ReportArgs) -> Result<ReportRequest, CliError> {
    let after = args.after.as_deref().map(parse_timestamp).transpose()?;
    let before = args.before.as_deref().map(parse_timestamp).transpose()?;
    Ok(ReportRequest {
        criteria: ReportCriteria {
            after,
            before,
            last_day: args.day,
            devices: args.macs.clone(),
            min_signal: args.rssi,
            exclude_zero: args.zero,
        },
        privacy: args.privacy,
        day_by_day: args.day_by_day,
        use_summaries: !args.no_summaries,
        list_networks: args.list_networks,
        log: args.log,
        network: args.ssid.clone(),
    })
}

fn run_report(cli: &Cli, config: &Config, args: &ReportArgs) -> Result<(), CliError> {
    let request = report_request(args)?;
    // Validate the combination before opening anything.
    request.clone().resolve()?;

    let store = ProbeStore::open_read_only(&config.paths.database)?;
    let engine = ReportEngine::new(&store, &config.ignored)?;
    let output = engine.run(request, now_epoch())?;

    match output_mode(cli) {
        OutputMode::Json => write_json_line(&serde_json::to_value(&output)?),
        OutputMode::Human => {
            if !cli.quiet {
                for notice in &output.notices {
                    eprintln!("probestats: :: {}", notice.message());
                }
            }
            let mut stdout = io::stdout().lock();
            render_report(&mut stdout, &output)?;
            Ok(())
        }
    }
}

fn render_report(out: &mut impl Write, output: &ReportOutput) -> io::Result<()> {
    if output.report.is_empty() {
        return writeln!(out, "no data found");
    }
    match &output.report {
        Report::NetworkLookup(found) => {
            writeln!(out, "{} : {}", found.network_name, found.devices.join(", "))?;
        }
        Report::Log(events) => {
            for event in events {
                writeln!(out, "{}", log_line(event))?;
            }
        }
        Report::Networks(listing) => {
            for row in listing {
                let devices: Vec<&str> = row.devices.iter().map(String::as_str).collect();
                writeln!(out, "{}: {}", row.network_name, devices.join(", "))?;
            }
        }
        Report::DayByDay(devices) => {
            for device in devices {
                writeln!(
                    out,
                    "{}",
                    device_header(&device.address, device.locally_administered, &device.vendor)
                )?;
                for day in &device.days {
                    writeln!(out, "{}", day_line(day))?;
                }
            }
        }
        Report::Aggregate(subjects) => {
            for subject in subjects {
                writeln!(
                    out,
                    "{}",
                    device_header(&subject.subject, subject.locally_administered, &subject.vendor)
                )?;
                write_merged(out, &subject.summary)?;
            }
        }
    }
    Ok(())
}

fn device_header(address: &str, laa: bool, vendor: &str) -> String {
    let laa = if laa {
        format!(" {}", "(LAA)".yellow())
    } else {
        String::new()
    };
    format!("MAC: {}{laa}, VENDOR: {vendor}", address.bold())
}

fn day_line(day: &DailySummary) -> String {
    format!(
        "  {}: [{}-{}]   RSSI: #: {:4}, min: {:3}, max: {:3}, avg: {:3}, median: {:3}",
        day.day.format(DAY_FORMAT),
        day.first_seen.format(TIME_FORMAT),
        day.last_seen.format(TIME_FORMAT),
        day.count,
        day.min,
        day.max,
        day.avg,
        day.median
    )
}

fn write_merged(out: &mut impl Write, summary: &MergedSummary) -> io::Result<()> {
    let names: Vec<&str> = summary.network_names.iter().map(String::as_str).collect();
    writeln!(out, "  SSIDs: {}", names.join(","))?;
    match summary.signal {
        Some(s) => writeln!(
            out,
            "  RSSI: #: {:4}, min: {:3}, max: {:3}, avg: {:3}, median: {:3}",
            s.count, s.min, s.max, s.avg, s.median
        )?,
        None => writeln!(out, "  RSSI: Nothing found.")?,
    }
    writeln!(
        out,
        "  First seen at {} and last seen at {}",
        summary.first_seen.format(DATETIME_FORMAT),
        summary.last_seen.format(DATETIME_FORMAT)
    )
}

fn log_line(event: &ProbeEvent) -> String {
    let when = local_datetime_of(event.timestamp);
    let address = if is_locally_administered(&event.address) {
        format!("{} (LAA)", event.address)
    } else {
        event.address.clone()
    };
    [
        when.format(DATETIME_FORMAT).to_string(),
        address,
        fit(&event.vendor, MAX_VENDOR_LENGTH),
        fit(&event.network_name, MAX_NETWORK_LENGTH),
        event.signal.to_string(),
    ]
    .join("\t")
}

/// Pad to `width`, or cut with an ellipsis when longer.
fn fit(value: &str, width: usize) -> String {
    if value.chars().count() > width {
        let kept: String = value.chars().take(width.saturating_sub(3)).collect();
        format!("{kept}...")
    } else {
        format!("{value:<width$}")
    }
}

// ---------------------------------------------------------------------------
// output helpers
// ---------------------------------------------------------------------------

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("PROBESTATS_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }
    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        _ => OutputMode::Human,
    }
}
