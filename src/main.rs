//! CLI entry point: submits one dataset through the pipeline and streams
//! its progress until the job reaches a terminal state.

use anyhow::{Context, bail};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use dataset_pipeline::{
    BroadcastNotifier, FillMethod, InProcessBroker, JobStatus, OutlierMethod, PipelineConfig,
    PipelineOrchestrator, Stage, StageParameters, StageWorker,
};

/// Run a CSV dataset through the preprocessing pipeline.
#[derive(Parser, Debug)]
#[command(name = "dataset-pipeline", version, about)]
struct Cli {
    /// Input CSV dataset.
    input: PathBuf,

    /// How missing numeric values are filled.
    #[arg(long, value_enum, default_value_t = FillMethodArg::Mean)]
    fill_method: FillMethodArg,

    /// Constant used with --fill-method constant.
    #[arg(long)]
    fill_value: Option<f64>,

    /// How outliers are treated.
    #[arg(long, value_enum, default_value_t = OutlierMethodArg::Cap)]
    outlier_method: OutlierMethodArg,

    /// Percentage of feature columns kept by feature extraction (1-100).
    #[arg(long, default_value_t = 100)]
    top_percent: u8,

    /// Persist job progress to this JSON file instead of memory.
    #[arg(long)]
    store: Option<PathBuf>,

    /// Log level filter (e.g. info, debug, dataset_pipeline=trace).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Suppress all log output except errors.
    #[arg(long)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FillMethodArg {
    Mean,
    Constant,
    Linear,
}

impl From<FillMethodArg> for FillMethod {
    fn from(arg: FillMethodArg) -> Self {
        match arg {
            FillMethodArg::Mean => FillMethod::Mean,
            FillMethodArg::Constant => FillMethod::Constant,
            FillMethodArg::Linear => FillMethod::Linear,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutlierMethodArg {
    Cap,
    Mean,
    Median,
}

impl From<OutlierMethodArg> for OutlierMethod {
    fn from(arg: OutlierMethodArg) -> Self {
        match arg {
            OutlierMethodArg::Cap => OutlierMethod::Cap,
            OutlierMethodArg::Mean => OutlierMethod::Mean,
            OutlierMethodArg::Median => OutlierMethod::Median,
        }
    }
}

fn init_logging(cli: &Cli) {
    let directives = if cli.quiet { "error" } else { &cli.log_level };
    let filter = EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    init_logging(&cli);

    let mut builder = PipelineConfig::builder();
    if let Some(path) = &cli.store {
        builder = builder.store_path(path);
    }
    let config = builder.build()?;
    let broker = Arc::new(InProcessBroker::new());
    let store = config.open_store().context("opening progress store")?;
    let notifier = Arc::new(BroadcastNotifier::new(config.notifier_capacity));
    let mut events = notifier.subscribe();

    for stage in Stage::ALL {
        let worker = StageWorker::new(
            stage,
            config.clone(),
            broker.clone(),
            store.clone(),
            notifier.clone(),
        );
        tokio::spawn(worker.run());
    }

    let parameters = StageParameters {
        fill_method: cli.fill_method.into(),
        fill_value: cli.fill_value,
        outlier_method: cli.outlier_method.into(),
        top_percent: cli.top_percent,
    };
    let orchestrator = PipelineOrchestrator::new(config, broker, store.clone());
    let job_id = orchestrator
        .submit(&cli.input, parameters)
        .with_context(|| format!("submitting {}", cli.input.display()))?;
    println!("job {job_id}: submitted {}", cli.input.display());

    loop {
        match events.recv().await {
            Ok(event) => {
                println!(
                    "job {job_id}: [{:>3}%] {} - {}",
                    event.percentage_completed, event.status, event.message
                );
                if event.status.is_terminal() {
                    break;
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "progress events lost, catching up");
            }
            Err(RecvError::Closed) => break,
        }
    }

    let job = store
        .get(&job_id)?
        .context("job record disappeared before completion")?;
    match job.status {
        JobStatus::Completed => {
            let output = job
                .output_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            println!("job {job_id}: completed, output at {output}");
            Ok(())
        }
        status => bail!("job {job_id} ended in state '{status}'"),
    }
}
