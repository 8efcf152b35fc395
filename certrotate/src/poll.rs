use std::{future::Future, time::Duration};

use anyhow::Result;
use tokio::time::sleep;
use tracing::{debug, error, info};

/// Spacing and bound of a status polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_attempts: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// The probe reported a terminal state.
    Completed(T),
    /// The probe failed with an error that means there was nothing to wait for.
    Skipped,
    /// The attempts ran out before a terminal state was reached.
    TimedOut,
}

/// Repeatedly probes an asynchronous provider task until it is done.
///
/// Errors accepted by `is_benign` end the wait as [`PollOutcome::Skipped`], any other
/// error is returned to the caller. Running out of attempts is not an error: it is
/// logged and reported as [`PollOutcome::TimedOut`].
pub async fn poll_until<T, F, Fut>(
    policy: PollPolicy,
    what: &str,
    mut probe: F,
    is_done: impl Fn(&T) -> bool,
    is_benign: impl Fn(&anyhow::Error) -> bool,
) -> Result<PollOutcome<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    for attempt in 1..=policy.max_attempts {
        match probe().await {
            Ok(state) if is_done(&state) => {
                debug!(attempt, "{what} completed");
                return Ok(PollOutcome::Completed(state));
            }
            Ok(_) => {
                debug!(attempt, "{what} still in progress");
            }
            Err(err) if is_benign(&err) => {
                info!(attempt, "{what} has nothing to do: {err}");
                return Ok(PollOutcome::Skipped);
            }
            Err(err) => return Err(err),
        }
        if attempt < policy.max_attempts {
            sleep(policy.interval).await;
        }
    }
    error!(attempts = policy.max_attempts, "timed out waiting for {what}");
    Ok(PollOutcome::TimedOut)
}
