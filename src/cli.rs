use std::io;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use crate::commands::{setup_plan, teardown_plan};
use crate::config::{DeployConfig, Flow, Overrides, resolve_config};
use crate::runner::SystemRunner;
use crate::setup::run_setup;
use crate::teardown::{TeardownOutcome, run_teardown};

#[derive(Debug, Parser)]
#[command(
    name = "eks-jenkins",
    version,
    about = "Provision an EKS cluster, deploy Jenkins onto it, and tear it down again"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// JSON file overriding the built-in defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Cluster name to pass to terraform and aws
    #[arg(long, global = true)]
    cluster_name: Option<String>,
    /// AWS region; defaults to AWS_DEFAULT_REGION, then us-west-1
    #[arg(long, global = true)]
    region: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Provision infrastructure, deploy Jenkins and bind its IAM role
    Setup {
        /// Also print the setup report as compact JSON
        #[arg(long)]
        raw: bool,
    },
    /// Destroy the infrastructure after an interactive confirmation
    Teardown,
    /// Print the commands a run would issue without executing them
    Plan {
        /// Plan the teardown instead of the setup
        #[arg(long)]
        teardown: bool,
        /// Emit compact JSON instead of pretty output
        #[arg(long)]
        raw: bool,
    },
}

impl Cli {
    fn config(&self, flow: Flow) -> anyhow::Result<DeployConfig> {
        let overrides = Overrides {
            cluster_name: self.cluster_name.clone(),
            region: self.region.clone(),
        };
        resolve_config(flow, self.config.as_deref(), &overrides, |key| {
            std::env::var(key).ok()
        })
    }
}

pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Setup { raw } => {
            let config = cli.config(Flow::Setup)?;
            let mut runner = SystemRunner::new(io::stdout());
            let report = run_setup(&config, &mut runner, &mut io::stdout())
                .with_context(|| format!("setting up cluster '{}'", config.cluster_name))?;

            if *raw {
                println!("{}", serde_json::to_string(&report)?);
            }
        }
        Commands::Teardown => {
            let config = cli.config(Flow::Teardown)?;
            let mut runner = SystemRunner::new(io::stdout());
            let outcome = run_teardown(
                &config,
                &mut runner,
                &mut io::stdin().lock(),
                &mut io::stdout(),
            )
            .with_context(|| format!("tearing down cluster '{}'", config.cluster_name))?;

            match outcome {
                TeardownOutcome::Completed { exit_code } if exit_code != 0 => {
                    tracing::warn!(exit_code, "teardown finished with errors");
                }
                _ => {}
            }
        }
        Commands::Plan { teardown, raw } => {
            let plan = if *teardown {
                teardown_plan(&cli.config(Flow::Teardown)?)
            } else {
                setup_plan(&cli.config(Flow::Setup)?)
            };

            if *raw {
                println!("{}", serde_json::to_string(&plan)?);
            } else {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            }
        }
    }

    Ok(())
}
