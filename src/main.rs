use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use modscan::config::{PipelineConfig, ScanConfig, BATCH_SIZE, DEFAULT_THREADS};
use modscan::stats::{ScanStats, StatsSnapshot};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "modscan")]
#[command(about = "Scan mod archives for assets, tags and recipes and resolve tag references")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline: scan, clean, resolve, index and aggregate
    Scan(ScanArgs),
    /// Clean and deduplicate raw asset and recipe files
    Clean(OutputArgs),
    /// Resolve tag references in raw tag files
    Resolve(ResolveArgs),
    /// Build the item to tags index and tag categories from closed tags
    Index(IndexArgs),
    /// Build per-namespace collections from finished outputs
    Aggregate(AggregateArgs),
}

#[derive(Args)]
struct OutputArgs {
    /// Output directory
    #[arg(short, long)]
    output: PathBuf,

    /// Directory for raw append-only files (defaults to <output>/raw)
    #[arg(long)]
    raw_dir: Option<PathBuf>,
}

impl OutputArgs {
    fn raw_dir(&self) -> PathBuf {
        self.raw_dir
            .clone()
            .unwrap_or_else(|| self.output.join("raw"))
    }
}

#[derive(Args)]
struct ScanArgs {
    /// Directory holding *.jar / *.zip mod archives
    #[arg(short, long)]
    input: PathBuf,

    #[command(flatten)]
    output: OutputArgs,

    /// Worker threads (capped at available cores)
    #[arg(short, long, default_value_t = DEFAULT_THREADS)]
    threads: usize,

    /// Archives per batch; output handles are closed between batches
    #[arg(long, default_value_t = BATCH_SIZE)]
    batch_size: usize,

    /// Only collect this namespace (case-insensitive)
    #[arg(short, long)]
    namespace: Option<String>,

    /// Unpacked data roots searched for referenced tags (repeatable)
    #[arg(long = "tag-root")]
    tag_roots: Vec<PathBuf>,

    /// Delete raw files once merged
    #[arg(long)]
    discard_raw: bool,

    /// Clear the output directory before starting
    #[arg(long)]
    clean: bool,
}

#[derive(Args)]
struct ResolveArgs {
    #[command(flatten)]
    output: OutputArgs,

    /// Unpacked data roots searched for referenced tags (repeatable)
    #[arg(long = "tag-root")]
    tag_roots: Vec<PathBuf>,
}

#[derive(Args)]
struct IndexArgs {
    /// Output directory
    #[arg(short, long)]
    output: PathBuf,
}

#[derive(Args)]
struct AggregateArgs {
    /// Output directory
    #[arg(short, long)]
    output: PathBuf,

    /// Only collect this namespace (case-insensitive)
    #[arg(short, long)]
    namespace: Option<String>,
}

fn run_scan(args: ScanArgs) -> Result<()> {
    let output = &args.output.output;
    if args.clean && output.exists() {
        info!("Cleaning output directory: {}", output.display());
        fs::remove_dir_all(output)
            .with_context(|| format!("Failed to clean output directory: {}", output.display()))?;
    }
    fs::create_dir_all(output)
        .with_context(|| format!("Failed to create output directory: {}", output.display()))?;

    let mut scan = ScanConfig::new(&args.input, output);
    scan.raw_dir = args.output.raw_dir();
    scan.threads = args.threads;
    scan.batch_size = args.batch_size;
    scan.namespace_filter = args.namespace;

    let mut config = PipelineConfig::new(scan);
    config.tag_roots = args.tag_roots;
    config.keep_raw = !args.discard_raw;

    let start = Instant::now();
    let report = modscan::pipeline::run_pipeline(&config)?;

    println!();
    println!("=== Summary ===");
    println!("Total time:          {:.2}s", start.elapsed().as_secs_f64());
    println!(
        "Archives scanned:    {} of {}",
        report.scan.scanned(),
        report.scan.discovered
    );
    println!("Batches:             {}", report.scan.batches);
    println!("Peak open handles:   {}", report.scan.peak_open_handles);
    println!("Identifiers cleaned: {}", report.merge.identifiers);
    println!("Recipes merged:      {}", report.merge.recipes);
    println!(
        "Tags closed:         {} ({} iterations{})",
        report.closed_tags,
        report.resolve.iterations,
        if report.resolve.converged { "" } else { ", cap reached" }
    );
    println!(
        "Tagged items:        {} ({} categories)",
        report.index.items, report.index.categories
    );
    println!("Namespaces:          {}", report.aggregate.namespaces);
    print_stats(&report.stats);
    Ok(())
}

fn print_stats(stats: &StatsSnapshot) {
    println!();
    println!("Assets found:        {}", stats.assets_found);
    println!("Tags found:          {}", stats.tags_found);
    println!("Recipes found:       {}", stats.recipes_found);
    println!("Corrupt archives:    {}", stats.corrupt_archives);
    println!("Worker errors:       {}", stats.worker_errors);
    println!("Entry read errors:   {}", stats.entry_errors);
    println!("Malformed records:   {}", stats.malformed_records);
    println!("Unresolved refs:     {}", stats.unresolved_references);
}

fn run_clean(args: OutputArgs) -> Result<()> {
    let stats = ScanStats::new();
    let report = modscan::merge::merge_raw_outputs(&args.raw_dir(), &args.output, true, &stats)?;
    println!(
        "Cleaned {} identifiers in {} files, {} recipes",
        report.identifiers, report.asset_files, report.recipes
    );
    Ok(())
}

fn run_resolve(args: ResolveArgs) -> Result<()> {
    let stats = ScanStats::new();
    let (report, written) = modscan::pipeline::resolve_tags(
        &args.output.raw_dir(),
        &args.output.output,
        &args.tag_roots,
        &stats,
    )?;
    println!(
        "Closed {} tags in {} iterations ({} unresolved references)",
        written, report.iterations, report.unresolved
    );
    Ok(())
}

fn run_index(args: IndexArgs) -> Result<()> {
    let report = modscan::index::index_tags(&args.output)?;
    println!(
        "Indexed {} tag files: {} tagged items, {} categories",
        report.tag_files, report.items, report.categories
    );
    Ok(())
}

fn run_aggregate(args: AggregateArgs) -> Result<()> {
    let mut config = ScanConfig::new(Path::new("."), &args.output);
    config.namespace_filter = args.namespace;
    let report = modscan::pipeline::aggregate_outputs(&config)?;
    println!(
        "Aggregated {} identifiers into {} namespaces",
        report.identifiers, report.namespaces
    );
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {e}");
    }

    let result = match cli.command {
        Commands::Scan(args) => run_scan(args),
        Commands::Clean(args) => run_clean(args),
        Commands::Resolve(args) => run_resolve(args),
        Commands::Index(args) => run_index(args),
        Commands::Aggregate(args) => run_aggregate(args),
    };

    match result {
        Ok(()) => {
            info!("Completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Error: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
