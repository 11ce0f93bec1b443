use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

use crate::runner::{CommandRunner, Invocation, RunError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub timeout: Duration,
    pub interval: Duration,
}

#[derive(Debug, Error)]
pub enum ReadinessError {
    #[error("`{probe}` did not succeed within {waited:?} ({attempts} attempts)")]
    TimedOut {
        probe: String,
        waited: Duration,
        attempts: u32,
    },
    #[error(transparent)]
    Run(#[from] RunError),
}

/// Re-run `probe` until it exits zero, sleeping `interval` between attempts.
/// Gives up once another attempt would start after `timeout`. Returns the
/// number of attempts made.
pub fn wait_until_ready<R: CommandRunner>(
    runner: &mut R,
    probe: &Invocation,
    settings: PollSettings,
) -> Result<u32, ReadinessError> {
    let started = Instant::now();
    let mut attempts = 0;

    loop {
        attempts += 1;
        let outcome = runner.run(probe)?;
        if outcome.success() {
            debug!(probe = %probe.display(), attempts, "ready");
            return Ok(attempts);
        }

        let waited = started.elapsed();
        if waited + settings.interval > settings.timeout {
            return Err(ReadinessError::TimedOut {
                probe: probe.display(),
                waited,
                attempts,
            });
        }

        debug!(probe = %probe.display(), attempts, code = outcome.code, "not ready yet");
        thread::sleep(settings.interval);
    }
}
