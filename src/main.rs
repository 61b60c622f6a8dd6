use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use telemetry_peak_analyzer::analysis::{RunError, RunOptions, Runner, ThresholdAdvisor};
use telemetry_peak_analyzer::analyzers::AnalyzerRegistry;
use telemetry_peak_analyzer::config::{Config, LogFormat, SourceKind, StoreKind};
use telemetry_peak_analyzer::detect::Report;
use telemetry_peak_analyzer::model::{TableEntry, Window};
use telemetry_peak_analyzer::source::{json::read_file, JsonFileSource, RecordFilter, SqliteSource};
use telemetry_peak_analyzer::storage::{self, StoreError};

#[derive(Parser)]
#[command(
    name = "telemetry-peak-analyzer",
    about = "Detect peaks in telemetry against a rolling historical baseline",
    version,
    long_about = None
)]
struct Cli {
    /// Configuration file (defaults to $PEAK_ANALYZER_CONFIG, then ./peak-analyzer.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze one window and update the baseline
    Analyze(AnalyzeArgs),

    /// List the available analyzers
    Analyzers,

    /// Show the stored baseline of an analyzer
    Baseline {
        /// Analyzer name
        #[arg(short, long, default_value = "file-type")]
        analyzer: String,

        #[command(flatten)]
        store: StoreArgs,

        /// Number of entries to show
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },

    /// Load JSON telemetry into the SQLite record store
    Import {
        /// JSON file or directory of JSON files
        #[arg(short, long)]
        input: PathBuf,

        /// SQLite database to create or extend
        #[arg(short, long)]
        database: PathBuf,

        /// Attribute holding the observation time
        #[arg(long, default_value = "utc_timestamp")]
        timestamp_field: String,
    },
}

#[derive(Args)]
struct StoreArgs {
    /// Baseline location (JSON file or SQLite database)
    #[arg(short = 'g', long)]
    global_table: Option<PathBuf>,

    /// Baseline store kind
    #[arg(long, value_enum)]
    store_kind: Option<StoreKind>,
}

#[derive(Args)]
struct AnalyzeArgs {
    /// Analyzer name
    #[arg(short, long, default_value = "file-type")]
    analyzer: String,

    /// First day of the window (YYYY-MM-DD, inclusive)
    #[arg(short, long)]
    start_date: Option<NaiveDate>,

    /// Day after the window (YYYY-MM-DD, exclusive)
    #[arg(short, long, requires = "start_date")]
    end_date: Option<NaiveDate>,

    /// Window length in days when no end date is given
    #[arg(short, long, default_value = "1")]
    delta: i64,

    /// Days between the window end and today
    #[arg(short = 'y', long, default_value = "0")]
    delay: i64,

    /// Explicit threshold; disables the advisor
    #[arg(short, long)]
    threshold: Option<u64>,

    /// Multiplier k of the advised threshold ceil(mean + k*std)
    #[arg(short = 'k', long)]
    multiplier: Option<f64>,

    /// Never advise below the historical maximum
    #[arg(long)]
    conservative: bool,

    /// Telemetry input (JSON file, directory, or SQLite database)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Telemetry source kind
    #[arg(long, value_enum)]
    source_kind: Option<SourceKind>,

    #[command(flatten)]
    store: StoreArgs,

    /// Only fetch records where FIELD matches one of the values (FIELD=V1,V2)
    #[arg(long, value_parser = parse_filter)]
    filter: Option<RecordFilter>,

    /// Build a first baseline from history when none exists
    #[arg(short, long)]
    bootstrap: bool,

    /// Detect only; do not update the baseline
    #[arg(long)]
    dry_run: bool,

    /// Write the report as JSON to this file
    #[arg(short, long)]
    output_file: Option<PathBuf>,

    /// Print the report as JSON instead of a table
    #[arg(long)]
    json: bool,
}

fn parse_filter(raw: &str) -> std::result::Result<RecordFilter, String> {
    let (field, values) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected FIELD=V1,V2, got '{}'", raw))?;
    let values: Vec<String> = values
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
        .collect();
    if field.is_empty() || values.is_empty() {
        return Err(format!("expected FIELD=V1,V2, got '{}'", raw));
    }
    Ok(RecordFilter::new(field, values))
}

fn init_tracing(cfg: &Config, verbose: bool, format: Option<LogFormat>) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.logging.level))
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format.unwrap_or(cfg.logging.format) {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

fn resolve_window(args: &AnalyzeArgs) -> Result<Window> {
    let window = match (args.start_date, args.end_date) {
        (Some(start), Some(end)) => Window::from_dates(start, end)?,
        (Some(start), None) => Window::starting(start, args.delta)?,
        _ => Window::trailing_days(Utc::now().date_naive(), args.delta, args.delay)?,
    };
    Ok(window)
}

fn apply_store_args(cfg: &mut Config, args: &StoreArgs) {
    if let Some(path) = &args.global_table {
        cfg.store.path = path.clone();
    }
    if let Some(kind) = args.store_kind {
        cfg.store.kind = kind;
    }
}

async fn run_analyze(mut cfg: Config, args: AnalyzeArgs) -> Result<()> {
    if let Some(input) = &args.input {
        cfg.source.input = input.clone();
    }
    if let Some(kind) = args.source_kind {
        cfg.source.kind = kind;
    }
    apply_store_args(&mut cfg, &args.store);
    if args.bootstrap {
        cfg.analysis.bootstrap = true;
    }

    let window = resolve_window(&args)?;
    let registry = AnalyzerRegistry::with_schemas(&cfg.analyzers)?;
    let analyzer = registry.get(&args.analyzer)?;

    let mut options = RunOptions::from_config(&cfg.analysis);
    options.threshold = args.threshold;
    options.filter = args.filter.clone();
    if args.multiplier.is_some() || args.conservative {
        options.advisor = ThresholdAdvisor::new(
            args.multiplier.unwrap_or(cfg.analysis.threshold_multiplier),
            args.conservative || cfg.analysis.conservative_floor,
        );
    }

    let source = telemetry_peak_analyzer::open_source(&cfg.source)?;
    let store = telemetry_peak_analyzer::open_store(&cfg.store)?;
    let runner = Runner::new(analyzer, source, store, options);
    let timeout = Duration::from_secs(cfg.source.fetch_timeout_secs);

    let result = telemetry_peak_analyzer::analyze(runner, window, timeout, !args.dry_run).await;
    let report = match result {
        Ok(outcome) => outcome.report,
        Err(RunError::Persist { source, report }) => {
            print_report(&report, &args)?;
            return Err(source).context("detection completed but the baseline was not saved");
        }
        Err(e) => return Err(e.into()),
    };
    print_report(&report, &args)
}

fn print_report(report: &Report, args: &AnalyzeArgs) -> Result<()> {
    if let Some(path) = &args.output_file {
        report.write_json(path)?;
        tracing::info!(path = %path.display(), "report written");
    }
    if args.json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print!("{}", report.render_text());
    }
    Ok(())
}

fn show_baseline(cfg: &Config, analyzer: &str, limit: usize) -> Result<()> {
    let store = telemetry_peak_analyzer::open_store(&cfg.store)?;
    let table = match store.load(analyzer) {
        Ok(table) => table,
        Err(e @ StoreError::NotFound { .. }) => {
            println!("{}", e);
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    println!("Baseline '{}' in {}", analyzer, store.location());
    println!("Window: {}", table.window);
    println!("Keys:   {}", table.len());
    if table.is_empty() {
        return Ok(());
    }

    let mut rows: Vec<_> = table.iter().collect();
    rows.sort_by(|a, b| {
        b.1.stats()
            .samp_sub_count_max
            .cmp(&a.1.stats().samp_sub_count_max)
            .then_with(|| a.0.cmp(b.0))
    });

    println!();
    println!(
        "{:<14} | {:<28} | {:>8} | {:>6} | {:>8} | {:>8} | {:>7}",
        "Index", "Dimensions", "Subs", "Max", "Mean", "Std", "Windows"
    );
    println!("{}", "-".repeat(97));
    for (key, entry) in rows.into_iter().take(limit) {
        let s = entry.stats();
        println!(
            "{:<14} | {:<28} | {:>8} | {:>6} | {:>8.2} | {:>8.2} | {:>7}",
            key.index.to_string(),
            key.dimensions.to_string(),
            s.sub_count,
            s.samp_sub_count_max,
            s.samp_sub_count_mean,
            s.samp_sub_count_std,
            entry.contributions.len()
        );
    }
    Ok(())
}

fn import(input: PathBuf, database: PathBuf, timestamp_field: &str) -> Result<()> {
    let files = JsonFileSource::new(&input).files()?;
    if files.is_empty() {
        bail!("no JSON files found in {}", input.display());
    }
    let pool = storage::open_pool(&database)
        .with_context(|| format!("failed to open {}", database.display()))?;
    let sink = SqliteSource::new(pool, database.display().to_string());

    let mut inserted = 0;
    let mut skipped = 0;
    for file in &files {
        let records = read_file(file)?;
        let summary = sink.ingest(&records, timestamp_field)?;
        tracing::info!(
            file = %file.display(),
            inserted = summary.inserted,
            skipped = summary.skipped,
            "file imported"
        );
        inserted += summary.inserted;
        skipped += summary.skipped;
    }
    println!(
        "Imported {} records from {} file(s) into {} ({} without timestamp skipped).",
        inserted,
        files.len(),
        database.display(),
        skipped
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut cfg = Config::resolve(cli.config.as_deref())?;
    init_tracing(&cfg, cli.verbose, cli.log_format);

    match cli.command {
        Commands::Analyze(args) => {
            tracing::info!(analyzer = %args.analyzer, "Starting analysis");
            run_analyze(cfg, args).await?;
        }
        Commands::Analyzers => {
            let registry = AnalyzerRegistry::with_schemas(&cfg.analyzers)?;
            for name in registry.names() {
                println!("{}", name);
            }
        }
        Commands::Baseline {
            analyzer,
            store,
            limit,
        } => {
            apply_store_args(&mut cfg, &store);
            show_baseline(&cfg, &analyzer, limit)?;
        }
        Commands::Import {
            input,
            database,
            timestamp_field,
        } => {
            import(input, database, &timestamp_field)?;
        }
    }

    Ok(())
}
