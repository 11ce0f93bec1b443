use std::io::{BufRead, Write};

use thiserror::Error;
use tracing::{info, warn};

use crate::commands;
use crate::config::DeployConfig;
use crate::console;
use crate::runner::{CommandRunner, RunError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownOutcome {
    Cancelled,
    Completed { exit_code: i32 },
}

#[derive(Debug, Error)]
pub enum TeardownError {
    #[error(transparent)]
    Run(#[from] RunError),
    #[error("reading confirmation: {0}")]
    Io(#[from] std::io::Error),
}

/// Only `yes`, in any case, confirms. The line terminator is ignored,
/// surrounding spaces are not.
pub fn is_confirmed(answer: &str) -> bool {
    answer
        .trim_end_matches(['\r', '\n'])
        .eq_ignore_ascii_case("yes")
}

/// Ask for confirmation on `input`, then run a best-effort destroy. A failed
/// destroy is reported but is not an error.
pub fn run_teardown<R, I, W>(
    config: &DeployConfig,
    runner: &mut R,
    input: &mut I,
    out: &mut W,
) -> Result<TeardownOutcome, TeardownError>
where
    R: CommandRunner,
    I: BufRead,
    W: Write,
{
    writeln!(
        out,
        "{}",
        console::failure(
            "WARNING: This will destroy all AWS resources created by this project (EKS Cluster, VPC, etc.)."
        )
    )?;
    write!(out, "Are you sure you want to continue? (yes/no): ")?;
    out.flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;
    if !is_confirmed(&answer) {
        writeln!(out, "Teardown cancelled.")?;
        info!("teardown cancelled by operator");
        return Ok(TeardownOutcome::Cancelled);
    }

    writeln!(out, "{}", console::heading("Tearing down all AWS resources"))?;
    let outcome = runner.run(&commands::terraform_destroy(config))?;
    if !outcome.success() {
        warn!(code = outcome.code, cluster = %config.cluster_name, "terraform destroy failed");
    }
    writeln!(out, "{}", console::success("Infrastructure teardown complete."))?;

    Ok(TeardownOutcome::Completed {
        exit_code: outcome.code,
    })
}
