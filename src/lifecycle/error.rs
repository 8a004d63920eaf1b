//! Error taxonomy for the node lifecycle.

use thiserror::Error;

use crate::keys::KeyError;
use crate::session::SessionError;

/// Errors raised by [`NodeLifecycle`](super::NodeLifecycle) operations,
/// generic over the provider gateway's transport error.
#[derive(Debug, Error)]
pub enum NodeError<E>
where
    E: std::error::Error + 'static,
{
    /// Blank name prefix, unresolvable image or size, missing key material.
    /// Fatal; never retried.
    #[error("invalid node configuration: {0}")]
    Configuration(String),
    /// An instance with the computed name already exists. Surfaced before
    /// any create call reaches the provider.
    #[error("an instance named '{name}' already exists")]
    DuplicateInstance {
        /// Name that collided.
        name: String,
    },
    /// Destroy was called with nothing to destroy. Distinct and tolerable;
    /// expected during cleanup after a failed create.
    #[error("no node to destroy")]
    NoResource,
    /// The destroy poll budget was exhausted without the instance reaching a
    /// terminal state. Carries the provider's delete-call error as its cause
    /// when one was captured.
    #[error("node '{name}' failed to terminate after {attempts} polls")]
    TerminationTimeout {
        /// Instance name that refused to terminate.
        name: String,
        /// Number of reconciliation polls performed.
        attempts: u32,
        /// Error captured from the delete call, if it raised one.
        #[source]
        source: Option<E>,
    },
    /// The readiness probe budget was exhausted without a successful remote
    /// command.
    #[error("node did not accept remote commands after {attempts} attempts")]
    NeverReady {
        /// Number of probe attempts performed.
        attempts: u32,
        /// Last session-level failure observed, if the probe ever spawned.
        #[source]
        source: Option<SessionError>,
    },
    /// Transport-level provider failure, surfaced verbatim.
    #[error("provider error: {0}")]
    Provider(#[source] E),
    /// Failure while constructing or using the remote session.
    #[error("remote session error: {0}")]
    Session(#[from] SessionError),
}

impl<E> From<KeyError> for NodeError<E>
where
    E: std::error::Error + 'static,
{
    fn from(value: KeyError) -> Self {
        Self::Configuration(value.to_string())
    }
}
