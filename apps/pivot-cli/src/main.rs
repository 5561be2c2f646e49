mod render;

use std::{env, fs, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use pivot_board::PlacementApplier;
use pivot_network::ReqwestTransport;
use pivot_ops::init_tracing;
use pivot_session::{AnalysisSession, ReportView, SessionOutcome};
use pivot_types::{config::PivotConfig, failure::Failure, job::AnalysisParameters};
use tracing::{info, warn};

/// Submit a game for analysis and walk through its pivotal moments.
#[derive(Parser, Debug)]
#[command(name = "pivot", author, version, about, long_about = None)]
struct Args {
    /// PGN file to analyze
    pgn: PathBuf,

    /// Config file (falls back to $PIVOT_CONFIG, then configs/dev.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long)]
    depth: Option<u32>,

    #[arg(long)]
    max_pivots: Option<u32>,

    /// Minimum evaluation swing, in centipawns
    #[arg(long)]
    swing: Option<u32>,

    /// Minimum distance between reported moments, in plies
    #[arg(long)]
    min_gap: Option<u32>,

    #[arg(long)]
    multipv: Option<u32>,

    /// How many times to re-run a failed step before giving up
    #[arg(long, default_value_t = 2)]
    retries: u32,

    /// Print every position of each line instead of just the moves
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.clone());
    init_tracing(&config.ops)?;

    let pgn = fs::read_to_string(&args.pgn)
        .with_context(|| format!("reading {}", args.pgn.display()))?;
    let parameters = overrides(&args, config.analysis.parameters(pgn));

    let transport = ReqwestTransport::new(&config.api)?;
    let session = AnalysisSession::new(
        Arc::new(transport),
        config.polling.clone(),
        Arc::new(PlacementApplier::new()),
    );

    let mut outcome = session.run(parameters).await;
    let mut retries_left = args.retries;
    let view = loop {
        outcome = match outcome {
            Err(failure) if retries_left > 0 && failure.is_retryable() => {
                retries_left -= 1;
                warn!("{failure}; retrying ({retries_left} retries left)");
                retry(&session, failure).await
            }
            Ok(SessionOutcome::NotReady(job_id)) if retries_left > 0 => {
                retries_left -= 1;
                info!("Report for job {job_id} is not ready yet");
                tokio::time::sleep(config.polling.interval()).await;
                session.fetch_report().await
            }
            other => break finish(other)?,
        };
    };
    if let Some(mut view) = view {
        render::print_report(&mut view, args.verbose);
    }
    Ok(())
}

async fn retry(session: &AnalysisSession, failure: Failure) -> Result<SessionOutcome, Failure> {
    match failure.retry {
        Some(ref action) => session.retry(action).await,
        None => Err(failure),
    }
}

fn finish(outcome: Result<SessionOutcome, Failure>) -> Result<Option<ReportView>> {
    match outcome? {
        SessionOutcome::Ready(view) => Ok(Some(view)),
        SessionOutcome::NotReady(job_id) => {
            anyhow::bail!("report for job {job_id} never became available")
        }
        SessionOutcome::Cancelled => {
            info!("Analysis cancelled");
            Ok(None)
        }
    }
}

fn overrides(args: &Args, mut parameters: AnalysisParameters) -> AnalysisParameters {
    if let Some(depth) = args.depth {
        parameters.depth = depth;
    }
    if let Some(max_pivots) = args.max_pivots {
        parameters.max_pivots = max_pivots;
    }
    if let Some(swing) = args.swing {
        parameters.swing_threshold_cp = swing;
    }
    if let Some(gap) = args.min_gap {
        parameters.min_ply_gap = gap;
    }
    if let Some(multipv) = args.multipv {
        parameters.multipv = multipv;
    }
    parameters
}

fn load_config(from_args: Option<PathBuf>) -> PivotConfig {
    let from_env = env::var("PIVOT_CONFIG").ok().map(PathBuf::from);
    let path = from_args
        .or(from_env)
        .unwrap_or_else(|| "configs/dev.toml".into());
    match PivotConfig::from_file(&path) {
        Ok(cfg) => {
            if let Err(err) = cfg.validate() {
                eprintln!(
                    "Invalid config in '{}': {err}. Falling back to internal defaults.",
                    path.display()
                );
                PivotConfig::default()
            } else {
                cfg
            }
        }
        Err(err) => {
            eprintln!(
                "Failed to load config from '{}': {err}. Falling back to internal defaults.",
                path.display()
            );
            PivotConfig::default()
        }
    }
}
