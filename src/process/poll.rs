//! Bounded-retry polling that drives a process to a terminal state.

use std::time::Duration;

use serde_json::Value;
use tracing::{info, warn};

use super::{ManagedProcess, ProcessStatus, ProductRef};
use crate::error::ProcessError;

/// Server-recommended poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Default retry budget; with the default interval this is a 30-minute
/// ceiling.
pub const DEFAULT_MAX_RETRIES: u32 = 60;

/// Terminal report from [`PollingSupervisor::supervise`].
#[derive(Debug)]
pub enum PollOutcome {
    /// The job finished; `output` identifies the registered result.
    Successful { output: Option<ProductRef> },
    /// The job ended without success (failed or stopped); `error` is the
    /// payload reported by the service, when available.
    Failed {
        status: ProcessStatus,
        error: Option<Value>,
    },
    /// The retry budget ran out while the job was still in flight. The
    /// remote job keeps running; nothing is cancelled here — keep polling
    /// or call `stop()` separately.
    TimedOut { status: ProcessStatus },
}

/// Drives one process to completion with a fixed interval and a bounded
/// number of status checks.
///
/// The wait happens on the calling task: no background work is spawned,
/// and nothing guards against two callers polling the same process —
/// callers serialize access themselves.
pub struct PollingSupervisor {
    interval: Duration,
    max_retries: u32,
}

impl PollingSupervisor {
    pub fn new(interval: Duration, max_retries: u32) -> Self {
        Self {
            interval,
            max_retries,
        }
    }

    /// Submit the process (a no-op if already submitted) and poll until it
    /// leaves `Pending`/`Running` or the retry budget runs out.
    pub async fn supervise<P>(&self, process: &mut P) -> Result<PollOutcome, ProcessError>
    where
        P: ManagedProcess + ?Sized,
    {
        process.run().await?;
        info!("process submitted, waiting for completion");

        let mut checks = 0u32;
        let mut status;
        loop {
            status = process.check_status().await?;
            checks += 1;
            if !status.is_active() || checks >= self.max_retries {
                break;
            }
            tokio::time::sleep(self.interval).await;
        }

        if status == ProcessStatus::Successful {
            let output = process.output().cloned();
            match &output {
                Some(output) => info!(
                    output_id = output.id,
                    internal_name = output.internal_name.as_deref().unwrap_or("-"),
                    "process finished"
                ),
                None => info!("process finished"),
            }
            return Ok(PollOutcome::Successful { output });
        }

        if status.is_active() {
            warn!(
                checks,
                "process still {} after the retry budget; it keeps running remotely", status
            );
            return Ok(PollOutcome::TimedOut { status });
        }

        let error = process.error_payload().await?;
        warn!(status = %status, "process did not finish successfully");
        Ok(PollOutcome::Failed { status, error })
    }
}

impl Default for PollingSupervisor {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL, DEFAULT_MAX_RETRIES)
    }
}
