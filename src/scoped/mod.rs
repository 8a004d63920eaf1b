//! Scoped acquisition contract: instance lifetime tied to a unit of work.
//!
//! A [`ScopedNodeManager`] wraps a [`NodeLifecycle`] with the guarantees a
//! caller needs to never leak a billable instance: a failed acquire rolls
//! back at most once, a failed release is always surfaced, and the
//! session-scoped helper tears the node down on every exit path.

use std::fmt::Display;
use std::time::Duration;

use tokio::time::sleep;

use crate::lifecycle::{NodeError, NodeLifecycle, ReadyPolicy};
use crate::provider::ProviderGateway;
use crate::session::{CommandRunner, ProcessCommandRunner, RemoteSession, SessionOptions};

/// Pause before the rollback destroy after a failed create. Providers that
/// partially provisioned an instance may not list it immediately.
const ROLLBACK_DELAY: Duration = Duration::from_secs(3);

/// Errors surfaced by the scoped acquisition contract.
#[derive(Debug, thiserror::Error)]
pub enum ScopedError<E>
where
    E: std::error::Error + 'static,
{
    /// Raised when the node could not be provisioned or never became
    /// usable. The note carries the rollback outcome when rollback also
    /// failed.
    #[error("failed to provision node: {note}")]
    Provision {
        /// Human-readable description, including any teardown note.
        note: String,
        /// Failure that aborted provisioning.
        #[source]
        source: NodeError<E>,
    },
    /// Raised when teardown of an acquired node failed. Never swallowed;
    /// the caller must know about a potentially orphaned instance.
    #[error("failed to release node")]
    Cleanup {
        /// Failure raised by the destroy reconciliation.
        #[source]
        source: NodeError<E>,
    },
}

/// Ties a node's lifetime to an acquire/release pair or a single closure.
#[derive(Debug)]
pub struct ScopedNodeManager<G: ProviderGateway, R: CommandRunner + Clone = ProcessCommandRunner> {
    lifecycle: NodeLifecycle<G>,
    runner: R,
    session_options: SessionOptions,
    ready_policy: ReadyPolicy,
    rollback_delay: Duration,
}

impl<G: ProviderGateway> ScopedNodeManager<G> {
    /// Creates a manager whose sessions use the system `ssh`/`scp` clients.
    #[must_use]
    pub fn new(lifecycle: NodeLifecycle<G>) -> Self {
        Self::with_runner(lifecycle, ProcessCommandRunner)
    }
}

impl<G, R> ScopedNodeManager<G, R>
where
    G: ProviderGateway,
    R: CommandRunner + Clone,
{
    /// Creates a manager with a caller-provided command runner.
    #[must_use]
    pub fn with_runner(lifecycle: NodeLifecycle<G>, runner: R) -> Self {
        Self {
            lifecycle,
            runner,
            session_options: SessionOptions::default(),
            ready_policy: ReadyPolicy::default(),
            rollback_delay: ROLLBACK_DELAY,
        }
    }

    /// Overrides the pause before the rollback destroy.
    ///
    /// This is primarily used by tests to keep failure scenarios fast.
    #[must_use]
    pub const fn with_rollback_delay(mut self, delay: Duration) -> Self {
        self.rollback_delay = delay;
        self
    }

    /// Overrides the readiness probe policy.
    #[must_use]
    pub const fn with_ready_policy(mut self, policy: ReadyPolicy) -> Self {
        self.ready_policy = policy;
        self
    }

    /// Overrides the SSH client options used for sessions.
    #[must_use]
    pub fn with_session_options(mut self, options: SessionOptions) -> Self {
        self.session_options = options;
        self
    }

    /// Returns the wrapped lifecycle.
    #[must_use]
    pub const fn node(&self) -> &NodeLifecycle<G> {
        &self.lifecycle
    }

    /// Returns the wrapped lifecycle mutably.
    pub const fn node_mut(&mut self) -> &mut NodeLifecycle<G> {
        &mut self.lifecycle
    }

    /// Provisions the node, rolling back at most once on failure.
    ///
    /// The rollback waits out the provider's consistency lag first, then
    /// destroys whatever the failed create left behind. A rollback that
    /// finds nothing is silent; a rollback that fails is noted in the
    /// returned message. The original create error is always the one
    /// propagated.
    ///
    /// # Errors
    ///
    /// Returns [`ScopedError::Provision`] carrying the create failure.
    pub async fn acquire(&mut self) -> Result<(), ScopedError<G::Error>> {
        match self.lifecycle.create().await {
            Ok(()) => Ok(()),
            Err(err) => {
                tracing::warn!(error = %err, "create failed; rolling back");
                sleep(self.rollback_delay).await;
                let note = self.destroy_with_note(&err).await;
                Err(ScopedError::Provision { note, source: err })
            }
        }
    }

    /// Destroys the node. Nothing to destroy is a success; any real
    /// teardown failure is surfaced.
    ///
    /// # Errors
    ///
    /// Returns [`ScopedError::Cleanup`] when the destroy reconciliation
    /// fails for any reason other than the node already being gone.
    pub async fn release(&mut self) -> Result<(), ScopedError<G::Error>> {
        match self.lifecycle.destroy().await {
            Ok(()) | Err(NodeError::NoResource) => Ok(()),
            Err(err) => Err(ScopedError::Cleanup { source: err }),
        }
    }

    /// Acquires the node, waits for SSH readiness, hands a session to the
    /// caller's closure, and releases the node afterwards. Every failure
    /// path tears the node down before returning.
    ///
    /// # Errors
    ///
    /// Returns [`ScopedError::Provision`] when the node never became usable
    /// or the closure failed, and [`ScopedError::Cleanup`] when the final
    /// release failed.
    pub async fn with_session<T, F, Fut>(&mut self, work: F) -> Result<T, ScopedError<G::Error>>
    where
        F: FnOnce(RemoteSession<R>) -> Fut,
        Fut: Future<Output = Result<T, NodeError<G::Error>>>,
    {
        self.acquire().await?;

        let session = match self
            .lifecycle
            .session_with(self.session_options.clone(), self.runner.clone())
        {
            Ok(session) => session,
            Err(err) => return Err(self.fail_with_teardown(err).await),
        };

        if let Err(err) = self
            .lifecycle
            .wait_until_ready(&session, &self.ready_policy)
            .await
        {
            return Err(self.fail_with_teardown(err).await);
        }

        let value = match work(session).await {
            Ok(value) => value,
            Err(err) => return Err(self.fail_with_teardown(err).await),
        };

        self.release().await?;
        Ok(value)
    }

    async fn fail_with_teardown(&mut self, err: NodeError<G::Error>) -> ScopedError<G::Error> {
        let note = self.destroy_with_note(&err).await;
        ScopedError::Provision { note, source: err }
    }

    async fn destroy_with_note<E: Display>(&mut self, err: &E) -> String {
        let teardown_error = match self.lifecycle.destroy().await {
            Ok(()) | Err(NodeError::NoResource) => None,
            Err(teardown) => Some(teardown),
        };
        append_teardown_note(err.to_string(), teardown_error.as_ref())
    }
}

fn append_teardown_note<E: Display>(message: String, teardown_error: Option<&E>) -> String {
    if let Some(teardown) = teardown_error {
        format!("{message} (teardown also failed: {teardown})")
    } else {
        message
    }
}

#[cfg(test)]
mod tests;
