use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::constants;
use crate::error::{FormError, Result};
use crate::service::{AssistantHandle, AssistantService, RunHandle, RunStatus, ThreadHandle};

/// Await `call` unless `cancel` fires first.
///
/// A token that is already cancelled wins without polling `call`.
pub async fn until_cancelled<F: Future>(cancel: &CancellationToken, call: F) -> Result<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(FormError::Cancelled),
        out = call => Ok(out),
    }
}

/// Drives one remote run per turn and waits for it to settle.
///
/// Clones share one run guard, so at most one run is in flight through a
/// runner and its clones at any time.
#[derive(Debug, Clone)]
pub struct TurnRunner {
    /// Fixed delay between status polls, no backoff.
    pub poll_interval: Duration,
    /// Give up on a run after this long. `None` polls until the run settles.
    pub timeout: Option<Duration>,
    guard: Arc<Mutex<()>>,
}

impl Default for TurnRunner {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(constants::DEFAULT_POLL_INTERVAL_MS),
            None,
        )
    }
}

impl TurnRunner {
    pub fn new(poll_interval: Duration, timeout: Option<Duration>) -> Self {
        Self {
            poll_interval,
            timeout,
            guard: Arc::new(Mutex::new(())),
        }
    }

    /// Start a run of `assistant` over `thread` and poll until it reaches a terminal status.
    ///
    /// Fails with `RunInProgress` if another run started through this runner
    /// has not settled yet.
    #[instrument(skip(self, service, cancel), fields(thread = %thread))]
    pub async fn run_to_completion(
        &self,
        service: &dyn AssistantService,
        thread: &ThreadHandle,
        assistant: &AssistantHandle,
        cancel: &CancellationToken,
    ) -> Result<RunStatus> {
        if cancel.is_cancelled() {
            return Err(FormError::Cancelled);
        }
        let _running = self.guard.try_lock().map_err(|_| FormError::RunInProgress)?;

        let run = until_cancelled(cancel, service.create_run(thread, assistant)).await??;
        info!(run_id = %run, "Assistant run started");
        let started = Instant::now();

        loop {
            let polled = tokio::select! {
                _ = cancel.cancelled() => {
                    abandon(service, thread, &run).await;
                    return Err(FormError::Cancelled);
                }
                polled = self.poll_status(service, thread, &run, started) => polled,
            };
            let status = match polled {
                Ok(status) => status,
                Err(FormError::RunTimedOut { waited }) => {
                    warn!(run_id = %run, ?waited, "Status poll outlived the run deadline");
                    abandon(service, thread, &run).await;
                    return Err(FormError::RunTimedOut { waited });
                }
                Err(e) => return Err(e),
            };
            debug!(run_id = %run, %status, "Polled run status");

            if status.is_terminal() {
                info!(run_id = %run, %status, elapsed = ?started.elapsed(), "Run finished");
                return Ok(status);
            }

            if let Some(limit) = self.timeout {
                let waited = started.elapsed();
                if waited >= limit {
                    warn!(run_id = %run, ?waited, "Run exceeded its deadline");
                    abandon(service, thread, &run).await;
                    return Err(FormError::RunTimedOut { waited });
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    abandon(service, thread, &run).await;
                    return Err(FormError::Cancelled);
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    // One status request, bounded by whatever is left of the deadline.
    async fn poll_status(
        &self,
        service: &dyn AssistantService,
        thread: &ThreadHandle,
        run: &RunHandle,
        started: Instant,
    ) -> Result<RunStatus> {
        let poll = service.run_status(thread, run);
        let Some(limit) = self.timeout else {
            return Ok(poll.await?);
        };
        let left = limit.saturating_sub(started.elapsed());
        match tokio::time::timeout(left, poll).await {
            Ok(status) => Ok(status?),
            Err(_) => Err(FormError::RunTimedOut {
                waited: started.elapsed(),
            }),
        }
    }
}

// Best effort: the run is abandoned locally whether or not the remote cancel lands.
async fn abandon(service: &dyn AssistantService, thread: &ThreadHandle, run: &RunHandle) {
    if let Err(e) = service.cancel_run(thread, run).await {
        warn!(run_id = %run, error = %e, "Failed to cancel remote run");
    }
}
