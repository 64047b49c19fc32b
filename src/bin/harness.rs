#![forbid(unsafe_code)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use scenario_harness::config::load_experiment_config;
use scenario_harness::export::export_csv;
use scenario_harness::matrix::{csv_path, labels_log_path, raw_log_path};
use scenario_harness::rejudge::{parse_temps, rejudge_sample, RejudgeOptions};
use scenario_harness::runner::{run_experiment, EnvProviderFactory};

#[derive(Parser)]
#[command(name = "harness", version, about = "LLM scenario evaluation harness")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scenario-by-frame matrix and write JSONL logs
    Run {
        /// Path to config YAML
        #[arg(long)]
        config: PathBuf,
        /// Replicates per (scenario, frame, model, temperature)
        #[arg(long, default_value_t = 1)]
        replicates: usize,
        /// Suite name from config.suites (defaults to first suite)
        #[arg(long)]
        suite: Option<String>,
    },
    /// Merge JSONL logs and export a CSV
    ExportCsv {
        #[arg(long)]
        config: PathBuf,
        /// Run id to export (overrides config.run.run_id)
        #[arg(long)]
        run_id: Option<String>,
        /// Output CSV path (defaults to outputs/<run_id>/attempts.csv)
        #[arg(long)]
        out_csv: Option<PathBuf>,
    },
    /// Re-run the blind judge on a random sample of successful outputs
    RejudgeSample {
        #[arg(long)]
        config: PathBuf,
        /// Run id to sample from (under outputs/)
        #[arg(long)]
        run_id: String,
        /// Number of attempts to sample
        #[arg(long, default_value_t = 20)]
        n: usize,
        /// RNG seed for reproducible sampling
        #[arg(long, default_value_t = 0)]
        seed: u64,
        /// Comma-separated judge temperatures to sweep
        #[arg(long, default_value = "0.0,0.2,0.7")]
        judge_temperatures: String,
        /// Output JSONL path (defaults to outputs/<run_id>/judge_sweep.jsonl)
        #[arg(long)]
        out: Option<PathBuf>,
        /// Suite whose judge configuration to sweep (defaults to first suite)
        #[arg(long)]
        suite: Option<String>,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            replicates,
            suite,
        } => {
            let summary = run_experiment(&config, replicates, suite.as_deref()).await?;
            println!("run_id={}", summary.run_id);
            println!("outputs_dir={}", summary.output_dir.display());
        }
        Commands::ExportCsv {
            config,
            run_id,
            out_csv,
        } => {
            let cfg = load_experiment_config(&config)?;
            let run_id = match run_id.or_else(|| cfg.run.run_id.clone()) {
                Some(id) => id,
                None => {
                    return Err(
                        "run_id is required (set run.run_id in config or pass --run-id)".into(),
                    )
                }
            };
            let out_csv = out_csv.unwrap_or_else(|| csv_path(&cfg.run.output_dir, &run_id));
            export_csv(
                &raw_log_path(&cfg.run.output_dir, &run_id),
                &labels_log_path(&cfg.run.output_dir, &run_id),
                &out_csv,
            )?;
            println!("wrote_csv={}", out_csv.display());
        }
        Commands::RejudgeSample {
            config,
            run_id,
            n,
            seed,
            judge_temperatures,
            out,
            suite,
        } => {
            let cfg = load_experiment_config(&config)?;
            let judge_temps = parse_temps(&judge_temperatures)?;
            let out_path = rejudge_sample(
                &cfg,
                RejudgeOptions {
                    run_id,
                    n,
                    seed,
                    judge_temps,
                    out_path: out,
                    suite,
                },
                &EnvProviderFactory,
            )
            .await?;
            println!("judge_sweep_jsonl={}", out_path.display());
        }
    }

    Ok(())
}
