use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use seedsweep::logging;
use seedsweep::search::parallel::{AggregatedResults, ExecutionReport, PoolConfig, ProgressSnapshot, WorkerPool};
use seedsweep::search::reference::ReferenceFactory;
use seedsweep::search::searcher::TaskStatus;
use seedsweep::search::{self, ResultKind, SearchDefinition, TargetRange, plan};

// --- Command Line Arguments ---

#[derive(Parser)]
#[command(name = "seedsweep")]
#[command(about = "seedsweep - parallel seed search")]
#[command(version)]
#[command(subcommand_required = true)]
#[command(arg_required_else_help = true)]
struct Args {
    /// Enable debug logging (RUST_LOG overrides)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Where the search definition comes from
#[derive(clap::Args, Debug)]
struct DefinitionArgs {
    /// JSON file holding a complete search definition
    #[arg(long, conflicts_with_all = ["kind", "end", "params"])]
    definition: Option<PathBuf>,
    /// Search kind (boot-seed, individual, egg, pattern, trainer-info)
    #[arg(long)]
    kind: Option<String>,
    /// First boot instant, inclusive
    #[arg(long, default_value = "0")]
    start: u64,
    /// Last boot instant, exclusive
    #[arg(long)]
    end: Option<u64>,
    /// Parameter combinations per instant
    #[arg(long, default_value = "1")]
    combinations: u64,
    /// Kind-specific parameters as a JSON object
    #[arg(long)]
    params: Option<String>,
}

impl DefinitionArgs {
    fn load(&self) -> Result<SearchDefinition> {
        if let Some(path) = &self.definition {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Failed to read definition file {}", path.display()))?;
            return SearchDefinition::from_json(&text)
                .with_context(|| format!("Invalid search definition in {}", path.display()));
        }

        let Some(kind) = &self.kind else {
            bail!("Either --definition or --kind must be given");
        };
        let Some(end) = self.end else {
            bail!("--end is required when the search is given by flags");
        };
        let params = match &self.params {
            Some(text) => serde_json::from_str(text).context("--params is not valid JSON")?,
            None => Value::Null,
        };

        Ok(SearchDefinition {
            kind: kind.clone(),
            params,
            range: TargetRange::new(self.start, end).with_combinations(self.combinations),
        })
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Plan and execute a search with the reference computation unit
    Run {
        #[command(flatten)]
        definition: DefinitionArgs,

        // --- Pool options ---
        /// Number of worker threads
        #[arg(long, short = 'j')]
        workers: Option<usize>,
        /// Request an accelerator-backed worker (falls back to CPU)
        #[arg(long)]
        gpu: bool,
        /// Units per searcher step
        #[arg(long, default_value_t = seedsweep::search::parallel::DEFAULT_CHUNK_SIZE)]
        chunk_size: u64,
        /// Timeout in seconds for the whole search
        #[arg(long)]
        timeout: Option<u64>,

        // --- Output ---
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
        /// Maximum number of results listed in text output
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Show how a search would be partitioned into tasks
    Plan {
        #[command(flatten)]
        definition: DefinitionArgs,
        /// Number of tasks (defaults to the CPU count)
        #[arg(long, short = 'j')]
        workers: Option<usize>,
        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },
}

struct RunOptions {
    workers: Option<usize>,
    gpu: bool,
    chunk_size: u64,
    timeout: Option<Duration>,
    json: bool,
    limit: usize,
}

// --- Run ---

fn run_command(definition: &SearchDefinition, options: &RunOptions) -> Result<()> {
    let mut config = PoolConfig::default()
        .with_gpu(options.gpu)
        .with_chunk_size(options.chunk_size)
        .with_timeout_option(options.timeout);
    if let Some(workers) = options.workers {
        config = config.with_workers(workers);
    }

    info!(
        kind = %definition.kind,
        start = definition.range.start,
        end = definition.range.end,
        combinations = definition.range.combinations,
        workers = config.max_workers,
        gpu = config.use_gpu,
        "Starting search"
    );

    let mut pool = WorkerPool::cpu_only(config, Arc::new(ReferenceFactory));

    // Ctrl-C stops the search cooperatively; partial results are still reported
    let cancel = pool.cancel_handle();
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupt received, cancelling search...");
        cancel.cancel();
    })
    .context("Failed to set signal handler")?;

    let mut last_decile = 0;
    let report = search::run_search(definition, &mut pool, |progress| {
        let decile = (progress.percentage / 10.0) as u64;
        if decile > last_decile {
            last_decile = decile;
            info!(
                percent = decile * 10,
                processed = progress.total_processed,
                units_per_sec = progress.units_per_second() as u64,
                eta_ms = ?progress.estimated_remaining_ms,
                "Progress"
            );
        }
    })
    .context("Search failed")?;
    pool.teardown();

    if options.json {
        let json = serde_json::to_string_pretty(&JsonReport::new(definition, &report))?;
        println!("{}", json);
    } else {
        print_report(definition, &report, options.limit)?;
    }
    Ok(())
}

fn status_name(status: &TaskStatus) -> String {
    match status {
        TaskStatus::Completed => "completed".into(),
        TaskStatus::Cancelled => "cancelled".into(),
        TaskStatus::Failed(err) => format!("failed: {}", err),
    }
}

/// One line per result, in kind order.
fn result_lines(results: &AggregatedResults) -> serde_json::Result<Vec<String>> {
    fn lines<T: Serialize>(items: &[T], out: &mut Vec<String>) -> serde_json::Result<()> {
        for item in items {
            out.push(serde_json::to_string(item)?);
        }
        Ok(())
    }

    let mut out = Vec::with_capacity(results.total());
    lines(&results.seed_matches, &mut out)?;
    lines(&results.individuals, &mut out)?;
    lines(&results.eggs, &mut out)?;
    lines(&results.pattern_matches, &mut out)?;
    lines(&results.trainer_infos, &mut out)?;
    Ok(out)
}

/// Print the execution report
fn print_report(definition: &SearchDefinition, report: &ExecutionReport, limit: usize) -> Result<()> {
    let progress = &report.progress;
    println!("\nSearch Report:");
    println!("  Kind: {}", definition.kind);
    println!(
        "  Tasks completed: {}/{}",
        report.completed_tasks(),
        report.tasks.len()
    );
    println!(
        "  Units processed: {}/{} ({:.1}%)",
        progress.total_processed, progress.total_count, progress.percentage
    );
    println!("  Elapsed time: {} ms", progress.elapsed_ms);
    println!("  Throughput: {:.0} units/s", progress.units_per_second());
    if report.cancelled {
        println!("  Cancelled: yes");
    }

    println!("  Results: {}", report.results.total());
    for (kind, count) in report.results.counts() {
        println!("    {}: {}", kind, count);
    }

    if !report.warnings.is_empty() {
        println!("\nWarnings:");
        for warning in &report.warnings {
            println!("  {}", warning);
        }
    }

    if !report.failures.is_empty() {
        println!("\nFailures:");
        for failure in &report.failures {
            println!("  {}", failure);
        }
    }

    let lines = result_lines(&report.results)?;
    if !lines.is_empty() && limit > 0 {
        println!("\nResults:");
        for line in lines.iter().take(limit) {
            println!("  {}", line);
        }
        if lines.len() > limit {
            println!("  ... {} more", lines.len() - limit);
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct JsonTask {
    id: usize,
    worker: Option<usize>,
    status: String,
    processed: u64,
    steps: u64,
    items: u64,
    elapsed_ms: u64,
}

#[derive(Serialize)]
struct JsonReport<'a> {
    definition: &'a SearchDefinition,
    complete: bool,
    cancelled: bool,
    progress: &'a ProgressSnapshot,
    counts: BTreeMap<ResultKind, usize>,
    results: &'a AggregatedResults,
    tasks: Vec<JsonTask>,
    failures: Vec<String>,
    warnings: Vec<String>,
}

impl<'a> JsonReport<'a> {
    fn new(definition: &'a SearchDefinition, report: &'a ExecutionReport) -> Self {
        Self {
            definition,
            complete: report.is_complete(),
            cancelled: report.cancelled,
            progress: &report.progress,
            counts: report.results.counts(),
            results: &report.results,
            tasks: report
                .tasks
                .iter()
                .map(|t| JsonTask {
                    id: t.task_id.0,
                    worker: t.worker_id,
                    status: status_name(&t.status),
                    processed: t.stats.processed,
                    steps: t.stats.steps,
                    items: t.stats.items,
                    elapsed_ms: t.stats.elapsed.as_millis() as u64,
                })
                .collect(),
            failures: report.failures.iter().map(|f| f.to_string()).collect(),
            warnings: report.warnings.iter().map(|w| w.to_string()).collect(),
        }
    }
}

// --- Plan ---

fn plan_command(definition: &SearchDefinition, parts: usize, json: bool) -> Result<()> {
    let tasks = plan(definition, parts).context("Planning failed")?;
    let range = definition.range;

    if json {
        let entries: Vec<Value> = tasks
            .iter()
            .map(|t| {
                serde_json::json!({
                    "id": t.id.0,
                    "kind": t.kind,
                    "offset": t.sub_range.offset,
                    "units": t.target_count,
                    "first_instant": range.locate(t.sub_range.offset).0,
                    "last_instant": range.locate(t.sub_range.end() - 1).0,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    println!("Plan for {} search ({} tasks):", definition.kind, tasks.len());
    for task in &tasks {
        let (first, _) = range.locate(task.sub_range.offset);
        let (last, _) = range.locate(task.sub_range.end() - 1);
        println!(
            "  Task {}: units [{}, {}) = {} units, instants {}..={}",
            task.id,
            task.sub_range.offset,
            task.sub_range.end(),
            task.target_count,
            first,
            last
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.verbose);

    match args.command {
        Commands::Run {
            definition,
            workers,
            gpu,
            chunk_size,
            timeout,
            json,
            limit,
        } => {
            let definition = definition.load()?;
            let options = RunOptions {
                workers,
                gpu,
                chunk_size,
                timeout: timeout.map(Duration::from_secs),
                json,
                limit,
            };
            run_command(&definition, &options)
        }
        Commands::Plan {
            definition,
            workers,
            json,
        } => {
            let definition = definition.load()?;
            plan_command(&definition, workers.unwrap_or_else(num_cpus::get), json)
        }
    }
}
