//! The node lifecycle state machine.
//!
//! A [`NodeLifecycle`] drives one instance through
//! `Uncreated → Creating → Running → Destroying → Terminated`, reconciling an
//! eventually consistent provider with callers that need deterministic
//! guarantees: create fails fast on name collisions, destroy re-observes the
//! provider until the instance is genuinely gone, and a delete call that
//! errors but still terminates the instance is treated as success.

use std::time::Duration;

use uuid::Uuid;

mod create;
mod destroy;
mod error;
mod profile;
mod ready;

use crate::keys::KeyPair;
use crate::provider::{
    CreateParams, ImageRef, InstanceHandle, ProviderGateway, SizeRef,
};
use crate::session::{
    CommandRunner, ProcessCommandRunner, RemoteSession, SessionOptions,
};

pub use error::NodeError;
pub use profile::KeyDeliveryProfile;

/// Boot image input: a provider identifier to resolve, or an already
/// resolved reference.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ImageSource {
    /// Identifier resolved through the gateway during `create`.
    Identifier(String),
    /// Pre-resolved provider reference.
    Resolved(ImageRef),
}

/// Instance size input.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SizeSource {
    /// First entry of the provider's size catalog.
    ProviderDefault,
    /// Identifier matched against the size catalog during `create`.
    Identifier(String),
    /// Pre-resolved provider reference.
    Resolved(SizeRef),
}

/// Caller-facing description of the node to provision.
///
/// Immutable after the lifecycle starts, except that `image` and `size` are
/// replaced by their resolved forms during `create` (an explicit, one-shot
/// resolve step rather than mutation-on-read).
#[derive(Clone, Debug, PartialEq)]
pub struct NodeSpec {
    /// Prefix for the generated instance name.
    pub name_prefix: String,
    /// User account used for SSH access.
    pub user: String,
    /// Boot image.
    pub image: ImageSource,
    /// Instance size.
    pub size: SizeSource,
    /// Extra creation parameters forwarded to the provider.
    pub params: CreateParams,
    /// Key pair for node access; generated during `create` when absent.
    pub key_pair: Option<KeyPair>,
}

impl NodeSpec {
    /// Starts a builder for a [`NodeSpec`].
    #[must_use]
    pub fn builder() -> NodeSpecBuilder {
        NodeSpecBuilder::default()
    }
}

/// Errors raised while building a [`NodeSpec`].
#[derive(Debug, thiserror::Error, Eq, PartialEq)]
pub enum NodeSpecError {
    /// Raised when a required field is missing or blank.
    #[error("missing or empty field: {0}")]
    Validation(String),
}

impl<E> From<NodeSpecError> for NodeError<E>
where
    E: std::error::Error + 'static,
{
    fn from(value: NodeSpecError) -> Self {
        Self::Configuration(value.to_string())
    }
}

/// Builder for [`NodeSpec`] with the defaults a throwaway build node wants.
#[derive(Clone, Debug, Default)]
pub struct NodeSpecBuilder {
    name_prefix: Option<String>,
    user: Option<String>,
    image: Option<ImageSource>,
    size: Option<SizeSource>,
    params: CreateParams,
    key_pair: Option<KeyPair>,
}

impl NodeSpecBuilder {
    /// Sets the instance name prefix (default `buran-node-`).
    #[must_use]
    pub fn name_prefix(mut self, value: impl Into<String>) -> Self {
        self.name_prefix = Some(value.into());
        self
    }

    /// Sets the SSH user (default `admin`).
    #[must_use]
    pub fn user(mut self, value: impl Into<String>) -> Self {
        self.user = Some(value.into());
        self
    }

    /// Sets the boot image by provider identifier.
    #[must_use]
    pub fn image_identifier(mut self, value: impl Into<String>) -> Self {
        self.image = Some(ImageSource::Identifier(value.into()));
        self
    }

    /// Sets an already resolved boot image.
    #[must_use]
    pub fn image(mut self, value: ImageRef) -> Self {
        self.image = Some(ImageSource::Resolved(value));
        self
    }

    /// Sets the instance size by identifier, matched against the provider's
    /// catalog during `create`.
    #[must_use]
    pub fn size_identifier(mut self, value: impl Into<String>) -> Self {
        self.size = Some(SizeSource::Identifier(value.into()));
        self
    }

    /// Sets an already resolved instance size.
    #[must_use]
    pub fn size(mut self, value: SizeRef) -> Self {
        self.size = Some(SizeSource::Resolved(value));
        self
    }

    /// Sets extra creation parameters.
    #[must_use]
    pub fn params(mut self, value: CreateParams) -> Self {
        self.params = value;
        self
    }

    /// Supplies a key pair instead of generating one.
    #[must_use]
    pub fn key_pair(mut self, value: KeyPair) -> Self {
        self.key_pair = Some(value);
        self
    }

    /// Builds the [`NodeSpec`].
    ///
    /// # Errors
    ///
    /// Returns [`NodeSpecError::Validation`] when the image is missing or
    /// the name prefix or user is blank.
    pub fn build(self) -> Result<NodeSpec, NodeSpecError> {
        let name_prefix = self
            .name_prefix
            .unwrap_or_else(|| String::from("buran-node-"));
        let user = self.user.unwrap_or_else(|| String::from("admin"));
        if name_prefix.trim().is_empty() {
            return Err(NodeSpecError::Validation(String::from("name_prefix")));
        }
        if user.trim().is_empty() {
            return Err(NodeSpecError::Validation(String::from("user")));
        }
        let image = self
            .image
            .ok_or_else(|| NodeSpecError::Validation(String::from("image")))?;

        Ok(NodeSpec {
            name_prefix,
            user,
            image,
            size: self.size.unwrap_or(SizeSource::ProviderDefault),
            params: self.params,
            key_pair: self.key_pair,
        })
    }
}

/// Lifecycle states; `Error` is reachable from `Creating` and `Destroying`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NodeState {
    /// No instance requested yet.
    Uncreated,
    /// Create issued; not yet running.
    Creating,
    /// Provider reported the instance running.
    Running,
    /// Destroy issued; reconciliation in progress.
    Destroying,
    /// Instance confirmed gone or terminated.
    Terminated,
    /// A create or destroy failed; the last-known handle is retained for
    /// diagnosis.
    Error,
}

/// Bounded reconciliation policy for `destroy`.
///
/// The canonical budget is 60 polls at 3-second spacing (about three
/// minutes); both knobs are configurable because providers disagree on how
/// long a delete may lag.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DestroyPolicy {
    /// Maximum number of refresh polls before giving up.
    pub max_polls: u32,
    /// Sleep between polls.
    pub interval: Duration,
}

impl Default for DestroyPolicy {
    fn default() -> Self {
        Self {
            max_polls: 60,
            interval: Duration::from_secs(3),
        }
    }
}

/// Exponential backoff policy for the SSH readiness probe.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ReadyPolicy {
    /// Maximum number of probe attempts.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    /// Integer multiplier applied to the delay after each attempt.
    pub backoff_multiplier: u32,
}

impl Default for ReadyPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_secs(1),
            backoff_multiplier: 2,
        }
    }
}

/// Drives a single instance from creation to confirmed teardown.
///
/// One lifecycle owns at most one live instance and is driven by one logical
/// task at a time; independent lifecycles are fully concurrent.
#[derive(Debug)]
pub struct NodeLifecycle<G: ProviderGateway> {
    gateway: G,
    spec: NodeSpec,
    profile: KeyDeliveryProfile,
    destroy_policy: DestroyPolicy,
    state: NodeState,
    name: Option<String>,
    handle: Option<InstanceHandle>,
    ip_address: Option<String>,
    imported_key_pair: Option<String>,
}

impl<G: ProviderGateway> NodeLifecycle<G> {
    /// Creates a lifecycle in the `Uncreated` state.
    #[must_use]
    pub fn new(gateway: G, spec: NodeSpec, profile: KeyDeliveryProfile) -> Self {
        Self {
            gateway,
            spec,
            profile,
            destroy_policy: DestroyPolicy::default(),
            state: NodeState::Uncreated,
            name: None,
            handle: None,
            ip_address: None,
            imported_key_pair: None,
        }
    }

    /// Overrides the destroy reconciliation policy.
    #[must_use]
    pub const fn with_destroy_policy(mut self, policy: DestroyPolicy) -> Self {
        self.destroy_policy = policy;
        self
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> NodeState {
        self.state
    }

    /// Returns the node specification.
    #[must_use]
    pub const fn spec(&self) -> &NodeSpec {
        &self.spec
    }

    /// Returns the last observed instance snapshot, if any.
    #[must_use]
    pub const fn handle(&self) -> Option<&InstanceHandle> {
        self.handle.as_ref()
    }

    /// Returns the resolved instance name once `create` has computed it.
    #[must_use]
    pub fn node_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns the best-guess reachable address, public IPs before private,
    /// caching the first non-null answer.
    pub fn ip_address(&mut self) -> Option<String> {
        if self.ip_address.is_none()
            && let Some(handle) = &self.handle
        {
            self.ip_address = handle
                .public_ips
                .iter()
                .chain(handle.private_ips.iter())
                .next()
                .cloned();
        }
        self.ip_address.clone()
    }

    /// Overrides the resolved address, or resets it to force recomputation.
    ///
    /// The override is the escape hatch for providers whose address only
    /// appears after a delay.
    pub fn set_ip_address(&mut self, address: Option<String>) {
        self.ip_address = address;
    }

    /// Builds a remote session from the resolved address and credentials
    /// using a caller-provided command runner.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Configuration`] when no address or key pair is
    /// available, or [`NodeError::Session`] when the identity file cannot be
    /// written.
    pub fn session_with<R: CommandRunner>(
        &mut self,
        options: SessionOptions,
        runner: R,
    ) -> Result<RemoteSession<R>, NodeError<G::Error>> {
        let address = self.ip_address().ok_or_else(|| {
            NodeError::Configuration(String::from("node has no reachable address"))
        })?;
        let user = self.spec.user.clone();
        let key_pair = self.key_pair()?;
        RemoteSession::new(address, user, &key_pair.private_key, options, runner)
            .map_err(NodeError::Session)
    }

    /// Builds a remote session backed by the system `ssh`/`scp` clients.
    ///
    /// # Errors
    ///
    /// See [`NodeLifecycle::session_with`].
    pub fn session(&mut self) -> Result<RemoteSession, NodeError<G::Error>> {
        self.session_with(SessionOptions::default(), ProcessCommandRunner)
    }

    /// Resolves the instance name once; stable across repeated lookups.
    pub(crate) fn resolve_name(&mut self) -> Result<String, NodeError<G::Error>> {
        if self.name.is_none() {
            if self.spec.name_prefix.trim().is_empty() {
                return Err(NodeError::Configuration(String::from(
                    "node name prefix must not be blank",
                )));
            }
            self.name = Some(format!("{}{}", self.spec.name_prefix, Uuid::new_v4()));
        }
        Ok(self.name.clone().unwrap_or_default())
    }

    pub(crate) fn key_pair(&self) -> Result<&KeyPair, NodeError<G::Error>> {
        self.spec.key_pair.as_ref().ok_or_else(|| {
            NodeError::Configuration(String::from(
                "no key pair available; the node has not been created",
            ))
        })
    }
}

#[cfg(test)]
mod tests;
