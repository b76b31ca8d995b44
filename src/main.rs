use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use globtrie::config::{Config, Fit};
use globtrie::{dump, pipeline};
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Index the edges of an input file across a pool of services.
#[derive(Parser, Debug)]
#[command(name = "globtrie", version, about)]
struct Cli {
    /// The path to the input file (Matrix Market or edge list).
    path: PathBuf,

    /// The number of edges to process (default: all).
    n_edges: Option<u64>,

    /// The number of threads to use as consumers.
    #[arg(short = 'c', long = "n_consumers", default_value_t = 1)]
    n_consumers: u32,

    /// The number of threads to use as producers.
    #[arg(short = 'p', long = "n_producers", default_value_t = 1)]
    n_producers: u32,

    /// The number of services to provision.
    #[arg(short = 'n', long = "n_services", default_value_t = 1)]
    n_services: u32,

    /// The consumer queue size, per producer.
    #[arg(short = 'q', long = "queue_size", default_value_t = 512)]
    queue_size: u32,

    /// Run the validation pass after the pipeline drains (default: on).
    #[arg(long, overrides_with = "no_validate")]
    validate: bool,

    /// Skip the validation pass.
    #[arg(long, overrides_with = "validate")]
    no_validate: bool,

    /// Dump the top-level routing table to a file.
    #[arg(long, value_name = "PATH")]
    tlt: Option<PathBuf>,

    /// Dump the per-service glob inventory to a file.
    #[arg(long, value_name = "PATH")]
    globs: Option<PathBuf>,

    /// The local fit algorithm {best,first}.
    #[arg(short = 'l', long, default_value_t = Fit::Best)]
    local_fit: Fit,

    /// The global fit algorithm {best,first}.
    #[arg(short = 'g', long, default_value_t = Fit::Best)]
    global_fit: Fit,

    /// The default glob capacity.
    #[arg(short = 'm', long, default_value_t = 256)]
    default_glob_capacity: u64,

    /// The prefix length at which to factor.
    #[arg(long, default_value_t = 64)]
    factor: u32,

    /// The prefix length at which to bubble.
    #[arg(long, default_value_t = u32::MAX)]
    bubble: u32,

    /// Generate verbose output.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Run debug code and generate debug output.
    #[arg(short, long, action = ArgAction::Count)]
    debug: u8,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.debug > 0 {
        "trace"
    } else if cli.verbose > 0 {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    let config = Config {
        local_fit: cli.local_fit,
        global_fit: cli.global_fit,
        glob_capacity: cli.default_glob_capacity as usize,
        factor: cli.factor,
        bubble: cli.bubble,
        verbose: cli.verbose > 0,
        debug: cli.debug > 0,
    };
    let run = pipeline::Run {
        n_producers: cli.n_producers,
        n_consumers: cli.n_consumers,
        n_services: cli.n_services,
        queue_size: cli.queue_size,
        n_edges: cli.n_edges.unwrap_or(u64::MAX),
    };
    let validate = cli.validate || !cli.no_validate;

    info!("local-fit: {}", config.local_fit);
    info!("global-fit: {}", config.global_fit);
    info!("default-glob-capacity: {}", config.glob_capacity);
    info!("factor: {}", config.factor);
    info!("bubble: {}", config.bubble);
    info!("n_consumers: {}", run.n_consumers);
    info!("n_producers: {}", run.n_producers);
    info!("n_services: {}", run.n_services);
    info!("n_edges: {}", run.n_edges);
    info!("queue_size: {}", run.queue_size);
    info!("validate: {validate}");

    let index = pipeline::run(&cli.path, &run, &config)?;
    info!(
        "indexed {} keys in {:?} ({} transferred, {} producer stalls, {} consumer stalls)",
        index.report.inserted,
        index.report.elapsed,
        index.report.transferred,
        index.report.producer_stalls,
        index.report.consumer_stalls,
    );

    if let Some(path) = &cli.tlt {
        let file = File::create(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        dump::write_table(&index, &mut BufWriter::new(file))
            .with_context(|| format!("failed to dump the routing table to {}", path.display()))?;
    }
    if let Some(path) = &cli.globs {
        let file = File::create(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        dump::write_globs(&index, &mut BufWriter::new(file))
            .with_context(|| format!("failed to dump the glob inventory to {}", path.display()))?;
    }

    if validate {
        let validated = pipeline::validate(&cli.path, &run, &index)?;
        info!("validated {validated} tuples");
    }

    Ok(())
}
