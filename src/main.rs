mod aggregate;
mod config;
mod dashboard;
mod error;
mod layout;
mod pricing;
mod range;
mod report;
mod session;
mod tui;
mod view;

use std::{fs::OpenOptions, path::PathBuf, sync::Mutex};

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use crate::{
    config::{
        DEFAULT_PAGE_SIZE, DefaultsConfig, FileConfig, expand_tilde, layered, load_config,
        parse_timezone, reference_date, resolve_data_dirs,
    },
    dashboard::Dashboard,
    layout::resolve_locale,
    pricing::{Family, PricingTable, default_override_path, ensure_override_file},
    range::ALL,
    report::{build_report, output_report},
    session::{SessionDirs, SessionSource, collect_session_files},
};

#[derive(Parser, Debug)]
#[command(
    name = "gemini-usage",
    about = "Report Gemini CLI token usage and cost from local session logs"
)]
struct Cli {
    /// Gemini home directories (defaults: $GEMINI_CONFIG_DIR, ~/.gemini). You can repeat this flag.
    #[arg(long = "data-dir", global = true)]
    data_dirs: Vec<PathBuf>,

    /// Optional config file (JSON). If omitted, tries ./gemini-usage.json then the user config dir
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Pricing override file (default: <first data dir>/pricing.json)
    #[arg(long, global = true)]
    pricing_file: Option<PathBuf>,

    /// Timezone used to decide what "today" is (IANA name, e.g. UTC, Europe/Berlin)
    #[arg(long, global = true)]
    timezone: Option<String>,

    /// Reference date for named filters (YYYY-MM-DD) instead of the clock
    #[arg(long, global = true)]
    today: Option<String>,

    /// Locale for token counts (e.g. en, fr, de). Falls back to en.
    #[arg(long, global = true)]
    locale: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Default: print a usage table for a date range
    Report(ReportArgs),
    /// Live, scrollable terminal dashboard
    Dashboard(DashboardArgs),
    /// Create the pricing override file if needed and show effective rates
    Pricing(PricingArgs),
}

#[derive(Args, Debug, Clone, Default)]
struct ReportArgs {
    /// all, today, yesterday, this-week, last-week, this-month, last-month or YYYY-MM-DD:YYYY-MM-DD
    #[arg(long)]
    filter: Option<String>,

    /// One row per date and model, with per-model subtotals
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    models: Option<bool>,

    /// Output JSON instead of a table
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    json: Option<bool>,
}

#[derive(Args, Debug, Clone, Default)]
struct DashboardArgs {
    /// Rows moved by PageUp/PageDown (default 10)
    #[arg(long)]
    page_size: Option<usize>,
}

#[derive(Args, Debug, Clone, Default)]
struct PricingArgs {
    /// Open the override file in $VISUAL / $EDITOR
    #[arg(long)]
    edit: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let interactive = matches!(cli.command, Some(Command::Dashboard(_)));
    init_tracing(interactive);

    let file_cfg = load_config(cli.config.as_ref())?;
    let command = cli
        .command
        .clone()
        .unwrap_or(Command::Report(ReportArgs::default()));

    match command {
        Command::Report(args) => run_report(&cli, &file_cfg, &args),
        Command::Dashboard(args) => run_dashboard(&cli, &file_cfg, &args),
        Command::Pricing(args) => run_pricing(&cli, &file_cfg, &args),
    }
}

/// Options shared by every subcommand after layering CLI, command config and defaults.
struct Common {
    data_dirs: Vec<PathBuf>,
    pricing_path: PathBuf,
    locale: num_format::Locale,
    tz: chrono_tz::Tz,
}

fn resolve_common(
    cli: &Cli,
    cmd: Option<&DefaultsConfig>,
    defaults: Option<&DefaultsConfig>,
) -> Result<Common> {
    let data_dirs = resolve_data_dirs(&cli.data_dirs)?;
    let pricing_path = match layered(
        cli.pricing_file.as_ref(),
        cmd.and_then(|c| c.pricing_file.as_ref()),
        defaults.and_then(|d| d.pricing_file.as_ref()),
    ) {
        Some(path) => expand_tilde(&path),
        None => default_override_path(&data_dirs).context("no data directory for pricing.json")?,
    };
    let locale = layered(
        cli.locale.as_ref(),
        cmd.and_then(|c| c.locale.as_ref()),
        defaults.and_then(|d| d.locale.as_ref()),
    );
    let timezone = layered(
        cli.timezone.as_ref(),
        cmd.and_then(|c| c.timezone.as_ref()),
        defaults.and_then(|d| d.timezone.as_ref()),
    );
    let tz = parse_timezone(timezone.as_deref())?;
    Ok(Common {
        data_dirs,
        pricing_path,
        locale: resolve_locale(locale.as_deref()),
        tz,
    })
}

fn run_report(cli: &Cli, file_cfg: &FileConfig, args: &ReportArgs) -> Result<()> {
    let cmd_cfg = file_cfg.report();
    let defaults = file_cfg.defaults();
    let common = resolve_common(cli, cmd_cfg, defaults)?;
    let filter = layered(
        args.filter.as_ref(),
        cmd_cfg.and_then(|c| c.filter.as_ref()),
        defaults.and_then(|d| d.filter.as_ref()),
    )
    .unwrap_or_else(|| ALL.to_string());
    let grouped = layered(
        args.models.as_ref(),
        cmd_cfg.and_then(|c| c.models.as_ref()),
        defaults.and_then(|d| d.models.as_ref()),
    )
    .unwrap_or(false);
    let json = layered(
        args.json.as_ref(),
        cmd_cfg.and_then(|c| c.json.as_ref()),
        defaults.and_then(|d| d.json.as_ref()),
    )
    .unwrap_or(false);
    let today = reference_date(cli.today.as_deref(), &common.tz)?;
    // A bad filter fails even when there is nothing to report.
    range::resolve_filter(&filter, today)?;

    let source = SessionDirs::new(common.data_dirs.clone());
    let records = source.load()?;
    if records.is_empty() && !json {
        println!(
            "No Gemini session files found. Looked under: {}",
            display_paths(source.data_dirs())
        );
        return Ok(());
    }

    let pricing = PricingTable::load(Some(&common.pricing_path));
    let report = build_report(&records, &pricing, &filter, today, grouped, &common.locale)?;
    output_report(&report, json)
}

fn run_dashboard(cli: &Cli, file_cfg: &FileConfig, args: &DashboardArgs) -> Result<()> {
    let cmd_cfg = file_cfg.dashboard();
    let defaults = file_cfg.defaults();
    let common = resolve_common(cli, cmd_cfg, defaults)?;
    let page_size = layered(
        args.page_size.as_ref(),
        cmd_cfg.and_then(|c| c.page_size.as_ref()),
        defaults.and_then(|d| d.page_size.as_ref()),
    )
    .unwrap_or(DEFAULT_PAGE_SIZE);
    let fixed_today = match cli.today.as_deref() {
        Some(raw) => Some(reference_date(Some(raw), &common.tz)?),
        None => None,
    };
    let tz = common.tz;
    let today: Box<dyn Fn() -> NaiveDate> = Box::new(move || {
        fixed_today.unwrap_or_else(|| Utc::now().with_timezone(&tz).date_naive())
    });

    tracing::info!(dirs = %display_paths(&common.data_dirs), "starting dashboard");
    let mut dashboard = Dashboard::new(
        SessionDirs::new(common.data_dirs),
        common.pricing_path,
        common.locale,
        page_size,
        today,
    );
    tui::run(&mut dashboard)
}

fn run_pricing(cli: &Cli, file_cfg: &FileConfig, args: &PricingArgs) -> Result<()> {
    let common = resolve_common(cli, None, file_cfg.defaults())?;
    ensure_override_file(&common.pricing_path)
        .with_context(|| format!("creating {}", common.pricing_path.display()))?;
    if args.edit {
        tui::open_in_editor(&common.pricing_path)?;
    }

    let pricing = PricingTable::load(Some(&common.pricing_path));
    println!("{} {}", "Pricing file:".bold(), common.pricing_path.display());
    if let Some(warning) = pricing.warning() {
        eprintln!("{} {warning}; using built-in pricing", "warning:".yellow().bold());
    }

    println!("{}", "Built-in families (USD per 1M tokens)".cyan().bold());
    for family in [Family::FlashLite, Family::Flash, Family::Pro] {
        print_tiers(family.name(), family.pricing().tiers());
    }
    let overrides = pricing.override_models();
    if !overrides.is_empty() {
        println!("{}", "Overrides".cyan().bold());
        for model in overrides {
            print_tiers(model, pricing.pricing_for(model).tiers());
        }
    }

    let sessions = collect_session_files(&common.data_dirs).len();
    println!("{sessions} session files under {}", display_paths(&common.data_dirs));
    Ok(())
}

fn print_tiers(name: &str, tiers: &[pricing::PricingRule]) {
    for tier in tiers {
        let bound = match tier.token_threshold {
            Some(limit) => format!("input <= {limit}"),
            None => "any input".to_string(),
        };
        println!(
            "  {name:<24} {bound:<18} in {:>8.3}  cached {:>8.3}  out {:>8.3}",
            tier.rates.input, tier.rates.cached, tier.rates.output
        );
    }
}

/// Batch commands log to stderr; the dashboard logs to a file so the screen stays clean.
fn init_tracing(interactive: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    if !interactive {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        return;
    }
    let log_file = config::dashboard_log_path().and_then(|path| {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok()?;
        }
        OpenOptions::new().create(true).append(true).open(path).ok()
    });
    match log_file {
        Some(file) => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init(),
        None => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::sink)
            .init(),
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    let parts: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
    parts.join(", ")
}
