use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

use redis_replay::config::{parse_start_time, DEFAULT_SOCKET_TIMEOUT_MS};
use redis_replay::metrics::Percentile;
use redis_replay::replay::{self, RunSummary};
use redis_replay::session::{RedisExecutor, RedisSessionFactory};
use redis_replay::{OpType, ReplayConfig, Result, Style};

#[derive(Parser, Debug)]
#[command(name = "redis-replay")]
#[command(about = "Replay recorded ops against Redis and measure latency", long_about = None)]
#[command(version)]
struct Cli {
    /// The file of serialized ops (one JSON op per line)
    #[arg(long)]
    ops_filename: PathBuf,

    /// Redis server URL
    #[arg(long, env = "REPLAY_URL", default_value = "redis://127.0.0.1:6379/")]
    url: String,

    /// stress: replay ops as fast as possible; real: follow the recorded timestamps
    #[arg(long, value_enum)]
    style: Style,

    /// Number of workers sending ops to the database
    #[arg(long, default_value = "10")]
    workers: usize,

    /// Maximum ops to replay; 0 replays everything
    #[arg(long, default_value = "0")]
    max_ops: u64,

    /// Skip the first N ops (applied after --start-time)
    #[arg(long, default_value = "0")]
    skip_ops: usize,

    /// Socket timeout per command, in milliseconds
    #[arg(long, default_value_t = DEFAULT_SOCKET_TIMEOUT_MS)]
    socket_timeout_ms: u64,

    /// Fraction of ops whose latency is sampled (0.0–1.0)
    #[arg(long, default_value = "0.0")]
    sample_rate: f64,

    /// First op to replay: unix milliseconds or RFC 3339
    #[arg(long, value_parser = parse_start_time)]
    start_time: Option<u64>,

    /// Print per-op errors (retries are always logged as warnings)
    #[arg(long)]
    verbose: bool,

    /// Seconds between progress reports
    #[arg(long, default_value = "5")]
    report_interval_secs: u64,

    /// Write the final status as JSON to this path
    #[arg(long)]
    summary_json: Option<PathBuf>,
}

impl From<Cli> for ReplayConfig {
    fn from(cli: Cli) -> Self {
        ReplayConfig {
            ops_filename: cli.ops_filename,
            url: cli.url,
            style: cli.style,
            workers: cli.workers,
            max_ops: cli.max_ops,
            skip_ops: cli.skip_ops,
            socket_timeout_ms: cli.socket_timeout_ms,
            sample_rate: cli.sample_rate,
            start_time: cli.start_time,
            verbose: cli.verbose,
            report_interval_secs: cli.report_interval_secs,
            summary_json: cli.summary_json,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let config = ReplayConfig::from(Cli::parse());
    match run(config).await {
        Ok(summary) => {
            print_summary(&summary);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Replay failed: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: ReplayConfig) -> Result<RunSummary> {
    // ── 1. Validate before touching anything ─────────────────────
    config.validate()?;
    let config = Arc::new(config);

    // ── 2. Open and position the op source ───────────────────────
    let reader = replay::open_source(&config)?;

    // ── 3. Connect & replay ──────────────────────────────────────
    info!("Connecting {} workers to {}", config.workers, config.url);
    let factory = RedisSessionFactory::new(&config.url, config.socket_timeout())?;
    let interrupt = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    let summary = replay::run(config.clone(), reader, factory, RedisExecutor, interrupt).await?;

    // ── 4. Persist the summary if asked ──────────────────────────
    if let Some(path) = &config.summary_json {
        summary.write_json(path)?;
        info!("Summary written to {}", path.display());
    }
    Ok(summary)
}

fn print_summary(summary: &RunSummary) {
    let status = &summary.status;
    let p99 = |t: OpType| {
        status
            .all_time
            .get(&t)
            .map_or(0.0, |s| s.millis(Percentile::P99))
    };

    println!();
    println!("Replay {} complete", summary.run_id);
    println!("  Ops dispatched:  {}", summary.dispatched);
    println!("  Ops executed:    {}", status.ops_executed);
    println!("  Elapsed:         {:.2}s", status.elapsed_secs);
    println!("  Throughput:      {:.0} ops/sec", status.ops_per_sec);
    println!(
        "  Failures:        {} permanent, {} transient ({} retried)",
        status.permanent_failures, status.transient_failures, status.retries
    );
    for t in OpType::ALL.into_iter().filter(|&t| status.count(t) > 0) {
        println!("  {:<8} {:>10} ops   P99 {:.2}ms", t, status.count(t), p99(t));
    }
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr.with_max_level(Level::WARN).or_else(std::io::stdout))
        .init();
}
