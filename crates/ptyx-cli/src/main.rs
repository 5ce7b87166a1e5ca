//! Ptyx command-line interface.
//!
//! Run reconstructions of synthetic datasets from TOML configuration files:
//! ```sh
//! ptyx-cli run job.toml
//! ptyx-cli validate job.toml
//! ptyx-cli algorithms
//! ```
//!
//! Exit status is 0 on success, 3 when the reconstruction diverged
//! numerically, and 1 for any other failure.

mod config;
mod runner;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use ptyx_core::{Algorithm, PtychoError};

#[derive(Parser)]
#[command(name = "ptyx-cli")]
#[command(about = "Ptyx: ptychographic phase retrieval")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a reconstruction from a TOML configuration file.
    Run {
        /// Path to the job configuration file.
        config: PathBuf,
        /// Output directory (overrides config file setting).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Validate a configuration file without running the reconstruction.
    Validate {
        /// Path to the job configuration file.
        config: PathBuf,
    },
    /// List the available reconstruction algorithms.
    Algorithms,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match execute(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            let numerical = e
                .downcast_ref::<PtychoError>()
                .is_some_and(PtychoError::is_numerical_failure);
            if numerical {
                ExitCode::from(3)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn execute(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run { config, output } => {
            println!("Ptyx Reconstruction");
            println!("===================");
            let job = config::load_config(&config)?;
            println!("Configuration: {}", config.display());

            let report = runner::run_reconstruction(&job)?;

            // Determine output directory
            let out_dir = output.unwrap_or_else(|| PathBuf::from(&job.output.directory));

            if job.output.save_cost_csv {
                runner::write_cost_csv(&report, &out_dir.join("costs.csv"), &job)?;
            }
            if job.output.save_json {
                runner::write_report_json(&report, &out_dir.join("report.json"))?;
            }

            if let Some(cost) = report.final_cost() {
                println!("Final cost: {:.6e}", cost);
            }
            println!("Reconstruction complete.");
            Ok(())
        }
        Commands::Validate { config } => {
            let _job = config::load_config(&config)?;
            println!("Configuration is valid: {}", config.display());
            Ok(())
        }
        Commands::Algorithms => {
            println!("Available algorithms:");
            println!();
            for algorithm in Algorithm::ALL {
                println!("  {:<8} {}", algorithm.name(), algorithm.description());
            }
            Ok(())
        }
    }
}
