//! Provider gateway abstraction for disposable compute instances.
//!
//! The lifecycle core never talks to a cloud API directly; it drives the
//! [`ProviderGateway`] trait, which maps one-to-one onto the create / list /
//! delete / wait surface every compute provider exposes. Implementations own
//! the wire format and authentication; this module owns only the shapes the
//! state machine observes.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

/// Provider-resolved boot image reference.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImageRef {
    /// Provider specific image identifier.
    pub id: String,
    /// Human readable image name.
    pub name: String,
}

/// Provider-resolved instance size (flavour / commercial type).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SizeRef {
    /// Provider specific size identifier (for example `t3.micro`).
    pub id: String,
    /// Human readable size name.
    pub name: String,
}

/// Observed instance state as reported by the provider.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NodeStatus {
    /// Requested but not yet running.
    Pending,
    /// Running and billable.
    Running,
    /// Shutting down.
    Stopping,
    /// Terminal state; no longer billable.
    Terminated,
    /// Any state the gateway could not classify.
    Unknown,
}

/// Snapshot of a provider-managed instance.
///
/// Snapshots are replaced wholesale on refresh, never field-patched, so a
/// handle always reflects a single consistent observation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceHandle {
    /// Provider assigned identifier.
    pub id: String,
    /// Instance name as submitted at creation.
    pub name: String,
    /// Publicly routable addresses, most preferred first.
    pub public_ips: Vec<String>,
    /// Private network addresses.
    pub private_ips: Vec<String>,
    /// Last observed state.
    pub status: NodeStatus,
}

/// Extra creation parameters forwarded to the provider.
///
/// Key-delivery profiles inject entries here before the create call; the
/// `extra` mapping carries anything provider specific that the core does not
/// interpret.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CreateParams {
    /// Instance metadata entries (for example a bootstrap SSH key).
    pub metadata: BTreeMap<String, String>,
    /// Name of a provider-registered key pair to attach.
    pub key_pair_name: Option<String>,
    /// Security group names, as an explicit list.
    pub security_groups: Vec<String>,
    /// Whether the root block device is deleted with the instance.
    pub delete_root_volume_on_termination: Option<bool>,
    /// Uninterpreted provider-specific parameters.
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Future returned by gateway operations.
pub type GatewayFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Minimal interface a cloud provider must expose to the lifecycle core.
///
/// Every call may fail with a transport-level error; the core never retries
/// a single call on its own. "Not found" outcomes are expressed in return
/// values (`Option`, empty listings), not as errors, because eventually
/// consistent providers routinely disagree with themselves.
pub trait ProviderGateway {
    /// Transport or API error raised by the provider.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Creates an instance and returns its first observed snapshot.
    fn create_instance<'a>(
        &'a self,
        name: &'a str,
        size: &'a SizeRef,
        image: &'a ImageRef,
        params: &'a CreateParams,
    ) -> GatewayFuture<'a, InstanceHandle, Self::Error>;

    /// Lists all instances visible to the caller.
    fn list_instances(&self) -> GatewayFuture<'_, Vec<InstanceHandle>, Self::Error>;

    /// Requests deletion of an instance. May report a transport error even
    /// when the deletion succeeds asynchronously.
    fn delete_instance<'a>(
        &'a self,
        handle: &'a InstanceHandle,
    ) -> GatewayFuture<'a, (), Self::Error>;

    /// Blocks until the provider reports the given instances running.
    fn wait_until_running<'a>(
        &'a self,
        handles: &'a [InstanceHandle],
    ) -> GatewayFuture<'a, (), Self::Error>;

    /// Resolves an image identifier to a provider image reference.
    fn resolve_image<'a>(&'a self, identifier: &'a str)
    -> GatewayFuture<'a, ImageRef, Self::Error>;

    /// Lists the provider's size catalog.
    fn list_sizes(&self) -> GatewayFuture<'_, Vec<SizeRef>, Self::Error>;

    /// Registers a public key with the provider under `name`.
    fn import_key_pair<'a>(
        &'a self,
        name: &'a str,
        public_key: &'a str,
    ) -> GatewayFuture<'a, (), Self::Error>;

    /// Removes a previously registered key pair.
    fn delete_key_pair<'a>(&'a self, name: &'a str) -> GatewayFuture<'a, (), Self::Error>;
}
