//! SSH readiness probe with exponential backoff.
//!
//! "Provider reports running" and "sshd accepts connections" are different
//! readiness signals; this bridges the gap without a fixed sleep.

use tokio::time::sleep;

use crate::provider::ProviderGateway;
use crate::session::{CommandRunner, RemoteSession};

use super::{NodeError, NodeLifecycle, ReadyPolicy};

/// Trivial remote command used as the readiness probe.
const READY_PROBE_COMMAND: &str = "true";

impl<G: ProviderGateway> NodeLifecycle<G> {
    /// Probes the node with a trivial remote command until it succeeds or
    /// the attempt budget is exhausted, backing off exponentially between
    /// attempts.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::NeverReady`] when the budget is exhausted,
    /// carrying the last session-level failure when one occurred.
    pub async fn wait_until_ready<R: CommandRunner>(
        &self,
        session: &RemoteSession<R>,
        policy: &ReadyPolicy,
    ) -> Result<(), NodeError<G::Error>> {
        let mut delay = policy.initial_delay;
        let mut last_error = None;

        for attempt in 1..=policy.max_attempts {
            match session.run(READY_PROBE_COMMAND) {
                Ok(output) if matches!(output.exit_code, Some(0)) => {
                    tracing::debug!(attempt, "node accepts remote commands");
                    return Ok(());
                }
                Ok(output) => {
                    tracing::debug!(attempt, exit_code = ?output.exit_code, "readiness probe refused");
                    last_error = None;
                }
                Err(err) => {
                    tracing::debug!(attempt, error = %err, "readiness probe failed to run");
                    last_error = Some(err);
                }
            }

            if attempt < policy.max_attempts {
                sleep(delay).await;
                delay = delay.saturating_mul(policy.backoff_multiplier);
            }
        }

        Err(NodeError::NeverReady {
            attempts: policy.max_attempts,
            source: last_error,
        })
    }
}
